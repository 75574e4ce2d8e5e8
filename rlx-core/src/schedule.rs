use serde::{Deserialize, Serialize};

/// A scalar that changes with the global step, e.g. exploration epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Constant(f64),
    Linear {
        init: f64,
        final_value: f64,
        duration: usize,
    },
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

impl Schedule {
    pub fn value(&self, step: usize) -> f64 {
        match *self {
            Self::Constant(value) => value,
            Self::Linear {
                init,
                final_value,
                duration,
            } => {
                if duration == 0 {
                    return final_value;
                }
                let mix = (step as f64 / duration as f64).clamp(0.0, 1.0);
                (1.0 - mix) * init + mix * final_value
            }
        }
    }
}

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn total_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

use crate::error::{Error, Result};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda(usize),
}

impl DeviceKind {
    pub fn to_device(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Ok(Device::cuda_if_available(ordinal)?),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device: DeviceKind,
    pub seed: u64,
    /// Rewards are zeroed and parameters are saved under `pretrained/`.
    pub pretraining: bool,
    pub num_train_steps: usize,
    pub log_interval: usize,
    pub eval_interval: usize,
    pub num_eval_episodes: usize,
    pub work_dir: Option<PathBuf>,
    pub init_model_path: Option<PathBuf>,
    pub tag: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::Cpu,
            seed: 1,
            pretraining: false,
            num_train_steps: 100_000,
            log_interval: 1_000,
            eval_interval: 10_000,
            num_eval_episodes: 10,
            work_dir: None,
            init_model_path: None,
            tag: "default".into(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_interval == 0 {
            return Err(Error::invalid("log_interval", "must be positive"));
        }
        if self.eval_interval == 0 {
            return Err(Error::invalid("eval_interval", "must be positive"));
        }
        if self.num_eval_episodes == 0 {
            return Err(Error::invalid("num_eval_episodes", "must be positive"));
        }
        Ok(())
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn output_dir(&self) -> PathBuf {
        let sub_dir = if self.pretraining { "pretrained" } else { "model" };
        self.work_dir().join(sub_dir)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_output_dir_follows_mode() {
        let mut config = AgentConfig {
            work_dir: Some(PathBuf::from("/tmp/run")),
            ..Default::default()
        };
        assert_eq!(config.output_dir(), PathBuf::from("/tmp/run/model"));
        config.pretraining = true;
        assert_eq!(config.output_dir(), PathBuf::from("/tmp/run/pretrained"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = AgentConfig {
            log_interval: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig {
                field: "log_interval",
                ..
            })
        ));
    }
}

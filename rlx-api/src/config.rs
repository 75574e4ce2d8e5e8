use anyhow::{Context, Result};
use rlx_agents::{OffPolicyConfig, OnPolicyConfig};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fs, path::Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ExperimentConfig {
    Ppo(OnPolicyConfig),
    Sac(OffPolicyConfig),
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Ppo(config) => config.validate()?,
            Self::Sac(config) => config.validate()?,
        }
        Ok(())
    }
}

pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

pub fn load_experiment(path: impl AsRef<Path>) -> Result<ExperimentConfig> {
    let config: ExperimentConfig = load_config(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() -> Result<()> {
        let json = r#"{
            "algorithm": "ppo",
            "num_train_steps": 512,
            "num_steps": 16,
            "ppo": {"n_epochs": 4}
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json)?;
        let ExperimentConfig::Ppo(config) = config else {
            anyhow::bail!("expected a PPO config");
        };
        assert_eq!(config.common.num_train_steps, 512);
        assert_eq!(config.num_steps, 16);
        assert_eq!(config.ppo.n_epochs, 4);
        assert_eq!(config.ppo.num_mini_batch, 8);
        Ok(())
    }
}

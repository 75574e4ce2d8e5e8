use anyhow::{Context, Result};
use rlx_agents::{DiscreteSac, OffPolicyAgent, OffPolicyConfig};
use rlx_core::{
    buffers::ReplayBuffer,
    env::VecEnv,
    logger::{Logger, TracingLogger},
    policies::OffPolicyDiscreteActorCritic,
};

pub type SacAgent<E> = OffPolicyAgent<E, DiscreteSac>;

#[derive(Default)]
pub struct SacAgentBuilder {
    pub config: OffPolicyConfig,
    pub logger: Option<Box<dyn Logger>>,
}

impl SacAgentBuilder {
    pub fn new(config: OffPolicyConfig) -> Self {
        Self {
            config,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Box::new(logger));
        self
    }

    pub fn build<E: VecEnv>(self, env: E, eval_env: Option<E>) -> Result<SacAgent<E>> {
        let Self { config, logger } = self;
        config.validate().context("invalid SAC configuration")?;
        let device = config.common.device.to_device()?;
        let sac_config = &config.sac;
        let policy = OffPolicyDiscreteActorCritic::new(
            &env.env_description(),
            &sac_config.encoder,
            sac_config.feature_dim,
            sac_config.hidden_dim,
            sac_config.exploration,
            &device,
        )
        .context("building the discrete actor-critic")?;
        let learner = DiscreteSac::new(policy, sac_config.clone())?;
        let storage = ReplayBuffer::new(config.storage_size, sac_config.batch_size, device)?;
        let logger =
            logger.unwrap_or_else(|| Box::new(TracingLogger::new(config.common.tag.clone())));
        let num_envs = env.num_envs();
        let agent = OffPolicyAgent::new(env, eval_env, learner, storage, &config, logger)?;
        tracing::debug!(num_envs, storage_size = config.storage_size, "SAC agent ready");
        Ok(agent)
    }
}

use anyhow::{Context, Result};
use rlx_agents::{OnPolicyAgent, OnPolicyConfig, Ppo};
use rlx_core::{
    env::VecEnv,
    logger::{Logger, TracingLogger},
    policies::OnPolicySharedActorCritic,
};

pub type PpoAgent<E> = OnPolicyAgent<E, Ppo<OnPolicySharedActorCritic>>;

#[derive(Default)]
pub struct PpoAgentBuilder {
    pub config: OnPolicyConfig,
    pub logger: Option<Box<dyn Logger>>,
}

impl PpoAgentBuilder {
    pub fn new(config: OnPolicyConfig) -> Self {
        Self {
            config,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Box::new(logger));
        self
    }

    pub fn build<E: VecEnv>(self, env: E, eval_env: Option<E>) -> Result<PpoAgent<E>> {
        let Self { config, logger } = self;
        config.validate().context("invalid PPO configuration")?;
        let device = config.common.device.to_device()?;
        let ppo_config = &config.ppo;
        let policy = OnPolicySharedActorCritic::new(
            &env.env_description(),
            &ppo_config.encoder,
            ppo_config.feature_dim,
            ppo_config.hidden_dim,
            &device,
        )
        .context("building the actor-critic")?;
        let learner = Ppo::new(policy, ppo_config.clone())?;
        let logger =
            logger.unwrap_or_else(|| Box::new(TracingLogger::new(config.common.tag.clone())));
        let num_envs = env.num_envs();
        let agent = OnPolicyAgent::new(env, eval_env, learner, &config, logger)?;
        tracing::debug!(num_envs, num_steps = config.num_steps, "PPO agent ready");
        Ok(agent)
    }
}

use crate::{common::AgentCore, evaluator::evaluate, sac::SacConfig};
use rlx_core::{
    agents::{Agent, Learner},
    buffers::{Storage, Transition},
    config::AgentConfig,
    env::VecEnv,
    error::{Error, Result},
    logger::Logger,
    metrics::Metrics,
    policies::Policy,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffPolicyConfig {
    #[serde(flatten)]
    pub common: AgentConfig,
    pub sac: SacConfig,
    pub num_init_steps: usize,
    pub storage_size: usize,
    pub update_every: usize,
}

impl Default for OffPolicyConfig {
    fn default() -> Self {
        Self {
            common: AgentConfig::default(),
            sac: SacConfig::default(),
            num_init_steps: 2000,
            storage_size: 1_000_000,
            update_every: 1,
        }
    }
}

impl OffPolicyConfig {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.sac.validate()?;
        if self.storage_size == 0 {
            return Err(Error::invalid("storage_size", "must be at least 1"));
        }
        if self.update_every == 0 {
            return Err(Error::invalid("update_every", "must be at least 1"));
        }
        Ok(())
    }
}

/// Collects transitions into a replay storage and updates the learner on a fixed
/// cadence once the warm-up phase is over.
pub struct OffPolicyAgent<E: VecEnv, L: Learner> {
    pub env: E,
    pub eval_env: Option<E>,
    pub learner: L,
    pub storage: L::Storage,
    pub core: AgentCore,
    num_init_steps: usize,
    update_every: usize,
    iterations: usize,
}

impl<E: VecEnv, L: Learner> OffPolicyAgent<E, L> {
    pub fn new(
        env: E,
        eval_env: Option<E>,
        learner: L,
        storage: L::Storage,
        config: &OffPolicyConfig,
        logger: Box<dyn Logger>,
    ) -> Result<Self> {
        config.validate()?;
        let core = AgentCore::new(config.common.clone(), logger)?;
        Ok(Self {
            env,
            eval_env,
            learner,
            storage,
            core,
            num_init_steps: config.num_init_steps,
            update_every: config.update_every,
            iterations: 0,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.env.close()?;
        if let Some(eval_env) = self.eval_env.as_mut() {
            eval_env.close()?;
        }
        Ok(())
    }
}

impl<E: VecEnv, L: Learner> Agent for OffPolicyAgent<E, L> {
    fn train(&mut self) -> Result<()> {
        self.core.load_initial_model(self.learner.policy_mut())?;
        let num_envs = self.env.num_envs();
        let (mut observations, _) = self.env.reset(self.core.config.seed)?;
        let mut last_update = Metrics::new();
        while self.core.global_step <= self.core.config.num_train_steps {
            if self.core.eval_due() && self.eval_env.is_some() {
                let metrics = self.eval()?;
                self.core.logger.eval(&metrics);
            }

            if self.core.global_step > self.num_init_steps
                && self.core.global_step <= self.num_init_steps + num_envs
            {
                tracing::debug!(global_step = self.core.global_step, "warm-up finished");
            }
            let policy = self.learner.policy();
            let actions = if self.core.global_step <= self.num_init_steps {
                policy.explore(&observations)?
            } else {
                policy
                    .act(&observations, true, self.core.global_step)?
                    .actions
            };
            let mut snapshot = self.env.step(&actions)?;
            self.core.global_step += num_envs;
            self.iterations += 1;
            if self.core.config.pretraining {
                snapshot.rewards.fill(0.);
            }

            self.storage.add(Transition {
                observations,
                actions,
                rewards: snapshot.rewards,
                terminateds: snapshot.terminateds,
                truncateds: snapshot.truncateds,
                info: snapshot.info.clone(),
                next_observations: snapshot.observations.clone(),
                values: None,
                log_probs: None,
            })?;

            if self.core.global_step >= self.num_init_steps
                && self.iterations % self.update_every == 0
            {
                last_update = self.update()?;
            }

            self.core.record_episodes(&snapshot.info);
            self.core.maybe_log_train(&last_update);
            observations = snapshot.observations;
        }

        self.core.logger.info("Training Accomplished!");
        self.core.save_checkpoint(self.learner.policy())?;
        self.close()
    }

    fn eval(&mut self) -> Result<Metrics> {
        let Some(eval_env) = self.eval_env.as_mut() else {
            return Err(Error::MissingComponent("evaluation environment".into()));
        };
        evaluate(eval_env, self.learner.policy(), &self.core)
    }

    fn update(&mut self) -> Result<Metrics> {
        let metrics = self
            .learner
            .update(&mut self.storage, self.core.global_step)?;
        self.storage.update(&metrics)?;
        Ok(metrics)
    }

    fn global_step(&self) -> usize {
        self.core.global_step
    }

    fn global_episode(&self) -> usize {
        self.core.global_episode
    }
}

use crate::{common::AgentCore, evaluator::evaluate, ppo::PpoConfig};
use candle_core::Tensor;
use rlx_core::{
    agents::{Agent, Learner},
    buffers::{RolloutBuffer, Storage, Transition},
    config::AgentConfig,
    env::VecEnv,
    error::{Error, Result},
    logger::Logger,
    metrics::Metrics,
    policies::{Policy, ValueFunction},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnPolicyConfig {
    #[serde(flatten)]
    pub common: AgentConfig,
    pub ppo: PpoConfig,
    pub num_steps: usize,
}

impl Default for OnPolicyConfig {
    fn default() -> Self {
        Self {
            common: AgentConfig::default(),
            ppo: PpoConfig::default(),
            num_steps: 128,
        }
    }
}

impl OnPolicyConfig {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.ppo.validate()?;
        if self.num_steps == 0 {
            return Err(Error::invalid("num_steps", "must be at least 1"));
        }
        Ok(())
    }
}

/// Collects fixed-horizon rollouts and hands each complete one to the learner.
pub struct OnPolicyAgent<E, L>
where
    E: VecEnv,
    L: Learner<Storage = RolloutBuffer>,
    L::Policy: ValueFunction,
{
    pub env: E,
    pub eval_env: Option<E>,
    pub learner: L,
    pub storage: RolloutBuffer,
    pub core: AgentCore,
    gamma: f32,
    gae_lambda: f32,
    normalize_advantages: bool,
    next_observations: Option<Tensor>,
}

impl<E, L> OnPolicyAgent<E, L>
where
    E: VecEnv,
    L: Learner<Storage = RolloutBuffer>,
    L::Policy: ValueFunction,
{
    pub fn new(
        env: E,
        eval_env: Option<E>,
        learner: L,
        config: &OnPolicyConfig,
        logger: Box<dyn Logger>,
    ) -> Result<Self> {
        config.validate()?;
        let core = AgentCore::new(config.common.clone(), logger)?;
        let storage = RolloutBuffer::new(config.num_steps, env.num_envs(), core.device.clone());
        Ok(Self {
            env,
            eval_env,
            learner,
            storage,
            core,
            gamma: config.ppo.gamma,
            gae_lambda: config.ppo.gae_lambda,
            normalize_advantages: config.ppo.normalize_advantages,
            next_observations: None,
        })
    }

    pub fn next_observations(&self) -> Option<&Tensor> {
        self.next_observations.as_ref()
    }

    fn close(&mut self) -> Result<()> {
        self.env.close()?;
        if let Some(eval_env) = self.eval_env.as_mut() {
            eval_env.close()?;
        }
        Ok(())
    }
}

impl<E, L> Agent for OnPolicyAgent<E, L>
where
    E: VecEnv,
    L: Learner<Storage = RolloutBuffer>,
    L::Policy: ValueFunction,
{
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

            let action = self
                .learner
                .policy()
                .act(&observations, true, self.core.global_step)?;
            let mut snapshot = self.env.step(&action.actions)?;
            self.core.global_step += num_envs;
            if self.core.config.pretraining {
                snapshot.rewards.fill(0.);
            }

            self.storage.add(Transition {
                observations,
                actions: action.actions,
                rewards: snapshot.rewards,
                terminateds: snapshot.terminateds,
                truncateds: snapshot.truncateds,
                info: snapshot.info.clone(),
                next_observations: snapshot.observations.clone(),
                values: action.values,
                log_probs: action.log_probs,
            })?;
            self.core.record_episodes(&snapshot.info);
            observations = snapshot.observations;
            self.next_observations = Some(observations.clone());

            if self.storage.is_full() {
                last_update = self.update()?;
            }
            self.core.maybe_log_train(&last_update);
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
        if !self.storage.is_empty() {
            let Some(next_observations) = self.next_observations.as_ref() else {
                return Err(Error::Storage(
                    "no observation to bootstrap the rollout from".into(),
                ));
            };
            let last_values = self.learner.policy().get_value(next_observations)?.detach();
            self.storage.compute_returns_and_advantages(
                &last_values,
                self.gamma,
                self.gae_lambda,
                self.normalize_advantages,
            )?;
        }
        let metrics = self
            .learner
            .update(&mut self.storage, self.core.global_step)?;
        tracing::debug!(global_step = self.core.global_step, %metrics, "rollout consumed");
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

use candle_core::{Device, Tensor};
use rlx_core::{
    agents::Learner,
    buffers::Storage,
    env::{Env, EnvironmentDescription, SnapShot, Space},
    error::Result,
    logger::Logger,
    metrics::Metrics,
    policies::{ParameterGroup, Policy, PolicyAction},
};
use std::{
    marker::PhantomData,
    sync::{Arc, Mutex},
};

/// Walk right along a corridor of `length` cells. Reaching the end pays 1 and
/// terminates; the episode is truncated after `max_steps`.
#[derive(Debug, Clone)]
pub struct CorridorEnv {
    pub length: usize,
    pub max_steps: usize,
    position: usize,
    steps: usize,
}

impl CorridorEnv {
    pub fn new(length: usize, max_steps: usize) -> Self {
        Self {
            length,
            max_steps,
            position: 0,
            steps: 0,
        }
    }

    fn observation(&self) -> Result<Tensor> {
        let progress = self.position as f32 / self.length as f32;
        Ok(Tensor::new(&[progress, 1.0 - progress], &Device::Cpu)?)
    }
}

impl Env for CorridorEnv {
    fn reset(&mut self, _seed: u64) -> Result<Tensor> {
        self.position = 0;
        self.steps = 0;
        self.observation()
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let action = action.to_dtype(candle_core::DType::U32)?.to_scalar::<u32>()?;
        self.steps += 1;
        if action == 1 {
            self.position += 1;
        } else {
            self.position = self.position.saturating_sub(1);
        }
        let terminated = self.position >= self.length;
        Ok(SnapShot {
            state: self.observation()?,
            reward: if terminated { 1. } else { 0. },
            terminated,
            truncated: !terminated && self.steps >= self.max_steps,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(Space::continous_from_dims(vec![2]), Space::Discrete(2))
    }
}

/// Pays 1 every step and truncates after `episode_length` steps.
#[derive(Debug, Clone)]
pub struct ConstantRewardEnv {
    pub episode_length: usize,
    pub obs_dim: usize,
    pub n_actions: usize,
    steps: usize,
}

impl ConstantRewardEnv {
    pub fn new(episode_length: usize) -> Self {
        Self {
            episode_length,
            obs_dim: 3,
            n_actions: 2,
            steps: 0,
        }
    }
}

impl Env for ConstantRewardEnv {
    fn reset(&mut self, _seed: u64) -> Result<Tensor> {
        self.steps = 0;
        Ok(Tensor::zeros(self.obs_dim, candle_core::DType::F32, &Device::Cpu)?)
    }

    fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
        self.steps += 1;
        Ok(SnapShot {
            state: Tensor::full(self.steps as f32, self.obs_dim, &Device::Cpu)?,
            reward: 1.,
            terminated: false,
            truncated: self.steps >= self.episode_length,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::continous_from_dims(vec![self.obs_dim]),
            Space::Discrete(self.n_actions),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub train: Vec<Metrics>,
    pub eval: Vec<Metrics>,
    pub info: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    pub record: Arc<Mutex<LogRecord>>,
}

impl RecordingLogger {
    pub fn snapshot(&self) -> LogRecord {
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn with_record(&self, f: impl FnOnce(&mut LogRecord)) {
        let mut record = self
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut record)
    }
}

impl Logger for RecordingLogger {
    fn train(&mut self, msg: &Metrics) {
        self.with_record(|record| record.train.push(msg.clone()));
    }

    fn eval(&mut self, msg: &Metrics) {
        self.with_record(|record| record.eval.push(msg.clone()));
    }

    fn info(&mut self, msg: &str) {
        self.with_record(|record| record.info.push(msg.to_owned()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    Explore,
    Policy { step: usize, training: bool },
}

#[derive(Debug, Clone)]
pub struct SpyPolicy {
    pub calls: Arc<Mutex<Vec<ActionSource>>>,
    device: Device,
}

impl Default for SpyPolicy {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            device: Device::Cpu,
        }
    }
}

impl SpyPolicy {
    pub fn calls(&self) -> Vec<ActionSource> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn push(&self, source: ActionSource) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(source);
    }

    fn zeros(&self, observations: &Tensor) -> Result<Tensor> {
        Ok(Tensor::zeros(
            observations.dim(0)?,
            candle_core::DType::U32,
            &self.device,
        )?)
    }
}

impl Policy for SpyPolicy {
    fn explore(&self, observations: &Tensor) -> Result<Tensor> {
        self.push(ActionSource::Explore);
        self.zeros(observations)
    }

    fn act(&self, observations: &Tensor, training: bool, step: usize) -> Result<PolicyAction> {
        self.push(ActionSource::Policy { step, training });
        Ok(PolicyAction::actions_only(self.zeros(observations)?))
    }

    fn parameter_groups(&self) -> Vec<ParameterGroup> {
        vec![]
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[derive(Debug, Clone)]
pub struct SpyLearner<S> {
    pub policy: SpyPolicy,
    pub updates: Arc<Mutex<Vec<usize>>>,
    storage: PhantomData<fn() -> S>,
}

impl<S> Default for SpyLearner<S> {
    fn default() -> Self {
        Self {
            policy: SpyPolicy::default(),
            updates: Arc::default(),
            storage: PhantomData,
        }
    }
}

impl<S> SpyLearner<S> {
    pub fn updates(&self) -> Vec<usize> {
        self.updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<S: Storage> Learner for SpyLearner<S> {
    type Policy = SpyPolicy;
    type Storage = S;

    fn policy(&self) -> &SpyPolicy {
        &self.policy
    }

    fn policy_mut(&mut self) -> &mut SpyPolicy {
        &mut self.policy
    }

    fn update(&mut self, storage: &mut S, global_step: usize) -> Result<Metrics> {
        self.updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(global_step);
        Ok(Metrics::new().with("stored", storage.len() as f64))
    }
}

pub mod sequential_vec_env;

use crate::error::Result;
use candle_core::Tensor;

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    Continous {
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        size: usize,
    },
}

impl Space {
    pub fn continous_from_dims(dims: Vec<usize>) -> Self {
        Self::Continous {
            min: None,
            max: None,
            size: dims.iter().product(),
        }
    }

    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) => *size,
            Self::Continous { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space) -> Self {
        Self {
            observation_space,
            action_space,
        }
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }
}

#[derive(Debug, Clone)]
pub struct SnapShot {
    pub state: Tensor,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

pub trait Env {
    fn reset(&mut self, seed: u64) -> Result<Tensor>;
    fn step(&mut self, action: &Tensor) -> Result<SnapShot>;
    fn env_description(&self) -> EnvironmentDescription;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeInfo {
    pub rewards: Vec<f32>,
    pub lengths: Vec<usize>,
}

impl EpisodeInfo {
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    pub episode: Option<EpisodeInfo>,
    /// The true last observation of every sub-environment that was auto-reset this step.
    pub final_observations: Vec<Option<Tensor>>,
}

#[derive(Debug, Clone)]
pub struct VecSnapShot {
    pub observations: Tensor,
    pub rewards: Vec<f32>,
    pub terminateds: Vec<bool>,
    pub truncateds: Vec<bool>,
    pub info: StepInfo,
}

/// N sub-environments advanced together. Finished sub-environments are reset by the
/// implementation; callers never reset them by hand.
pub trait VecEnv {
    fn num_envs(&self) -> usize;

    fn env_description(&self) -> EnvironmentDescription;

    fn reset(&mut self, seed: u64) -> Result<(Tensor, StepInfo)>;

    fn step(&mut self, actions: &Tensor) -> Result<VecSnapShot>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

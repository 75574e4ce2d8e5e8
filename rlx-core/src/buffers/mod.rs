pub mod mini_batching;
pub mod replay_buffer;
pub mod rollout_buffer;

use crate::{env::StepInfo, error::Result, metrics::Metrics};
use candle_core::Tensor;

pub use replay_buffer::{ReplayBatch, ReplayBuffer};
pub use rollout_buffer::{RolloutBatch, RolloutBuffer};

#[derive(Debug, Clone)]
pub struct Transition {
    pub observations: Tensor,
    pub actions: Tensor,
    pub rewards: Vec<f32>,
    pub terminateds: Vec<bool>,
    pub truncateds: Vec<bool>,
    pub info: StepInfo,
    pub next_observations: Tensor,
    pub values: Option<Tensor>,
    pub log_probs: Option<Tensor>,
}

impl Transition {
    pub fn num_envs(&self) -> usize {
        self.rewards.len()
    }
}

pub trait Storage {
    type Batch;
    type Generator<'a>: Iterator<Item = Result<Self::Batch>>
    where
        Self: 'a;

    fn add(&mut self, transition: Transition) -> Result<()>;

    fn generator(&self, num_mini_batches: usize) -> Result<Self::Generator<'_>>;

    fn update(&mut self, _metrics: &Metrics) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn bools_to_f32(flags: &[bool]) -> Vec<f32> {
    flags.iter().map(|f| if *f { 1. } else { 0. }).collect()
}

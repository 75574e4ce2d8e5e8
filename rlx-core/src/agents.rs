use crate::{buffers::Storage, error::Result, metrics::Metrics, policies::Policy};

/// The update rule of an agent. Owns the policy and its optimizers and turns the
/// content of a storage into one round of parameter updates.
pub trait Learner {
    type Policy: Policy;
    type Storage: Storage;

    fn policy(&self) -> &Self::Policy;

    fn policy_mut(&mut self) -> &mut Self::Policy;

    fn update(&mut self, storage: &mut Self::Storage, global_step: usize) -> Result<Metrics>;
}

pub trait Agent {
    fn train(&mut self) -> Result<()>;

    fn eval(&mut self) -> Result<Metrics>;

    fn update(&mut self) -> Result<Metrics>;

    fn global_step(&self) -> usize;

    fn global_episode(&self) -> usize;
}

use super::{Storage, Transition, bools_to_f32};
use crate::{
    error::{Error, Result},
    rng,
};
use candle_core::{Device, IndexOp, Tensor};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReplayBatch {
    pub observations: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub terminateds: Tensor,
    pub truncateds: Tensor,
    pub next_observations: Tensor,
}

/// Fixed-capacity ring of single-environment transitions, sampled with replacement.
#[derive(Debug)]
pub struct ReplayBuffer {
    capacity: usize,
    batch_size: usize,
    device: Device,
    observations: Vec<Tensor>,
    actions: Vec<Tensor>,
    rewards: Vec<f32>,
    terminateds: Vec<bool>,
    truncateds: Vec<bool>,
    next_observations: Vec<Tensor>,
    position: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, batch_size: usize, device: Device) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid("storage_size", "must be at least 1"));
        }
        if batch_size == 0 {
            return Err(Error::invalid("batch_size", "must be at least 1"));
        }
        Ok(Self {
            capacity,
            batch_size,
            device,
            observations: Vec::with_capacity(capacity),
            actions: Vec::with_capacity(capacity),
            rewards: Vec::with_capacity(capacity),
            terminateds: Vec::with_capacity(capacity),
            truncateds: Vec::with_capacity(capacity),
            next_observations: Vec::with_capacity(capacity),
            position: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    fn push(
        &mut self,
        observation: Tensor,
        action: Tensor,
        reward: f32,
        terminated: bool,
        truncated: bool,
        next_observation: Tensor,
    ) {
        if self.rewards.len() < self.capacity {
            self.observations.push(observation);
            self.actions.push(action);
            self.rewards.push(reward);
            self.terminateds.push(terminated);
            self.truncateds.push(truncated);
            self.next_observations.push(next_observation);
        } else {
            let pos = self.position;
            self.observations[pos] = observation;
            self.actions[pos] = action;
            self.rewards[pos] = reward;
            self.terminateds[pos] = terminated;
            self.truncateds[pos] = truncated;
            self.next_observations[pos] = next_observation;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    pub fn sample(&self) -> Result<ReplayBatch> {
        let len = self.len();
        let idxs: Vec<usize> =
            rng::with_rng(|rng| (0..self.batch_size).map(|_| rng.random_range(0..len)).collect());
        let pick = |data: &[Tensor]| -> Result<Tensor> {
            let rows: Vec<&Tensor> = idxs.iter().map(|i| &data[*i]).collect();
            Ok(Tensor::stack(&rows, 0)?)
        };
        let rewards: Vec<f32> = idxs.iter().map(|i| self.rewards[*i]).collect();
        let terminateds: Vec<bool> = idxs.iter().map(|i| self.terminateds[*i]).collect();
        let truncateds: Vec<bool> = idxs.iter().map(|i| self.truncateds[*i]).collect();
        let n = idxs.len();
        Ok(ReplayBatch {
            observations: pick(&self.observations)?,
            actions: pick(&self.actions)?,
            rewards: Tensor::from_vec(rewards, n, &self.device)?,
            terminateds: Tensor::from_vec(bools_to_f32(&terminateds), n, &self.device)?,
            truncateds: Tensor::from_vec(bools_to_f32(&truncateds), n, &self.device)?,
            next_observations: pick(&self.next_observations)?,
        })
    }
}

pub struct ReplayBatchIterator<'a> {
    buffer: &'a ReplayBuffer,
    remaining: usize,
}

impl Iterator for ReplayBatchIterator<'_> {
    type Item = Result<ReplayBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.buffer.is_empty() {
            return None;
        }
        self.remaining -= 1;
        Some(self.buffer.sample())
    }
}

impl Storage for ReplayBuffer {
    type Batch = ReplayBatch;
    type Generator<'a> = ReplayBatchIterator<'a>;

    fn add(&mut self, transition: Transition) -> Result<()> {
        let num_envs = transition.num_envs();
        let Transition {
            observations,
            actions,
            rewards,
            terminateds,
            truncateds,
            info,
            next_observations,
            ..
        } = transition;
        let lengths = [
            ("terminateds", terminateds.len()),
            ("truncateds", truncateds.len()),
            ("observations", observations.dim(0)?),
            ("actions", actions.dim(0)?),
            ("next_observations", next_observations.dim(0)?),
        ];
        for (name, len) in lengths {
            if len != num_envs {
                return Err(Error::Storage(format!(
                    "transition has {len} {name} for {num_envs} rewards"
                )));
            }
        }
        for (idx, reward) in rewards.iter().enumerate() {
            // auto-reset envs report their real last observation out of band
            let next_observation = match info.final_observations.get(idx) {
                Some(Some(final_observation)) => final_observation.clone(),
                _ => next_observations.i(idx)?,
            };
            self.push(
                observations.i(idx)?,
                actions.i(idx)?,
                *reward,
                terminateds[idx],
                truncateds[idx],
                next_observation,
            );
        }
        Ok(())
    }

    fn generator(&self, num_mini_batches: usize) -> Result<Self::Generator<'_>> {
        Ok(ReplayBatchIterator {
            buffer: self,
            remaining: num_mini_batches,
        })
    }

    fn len(&self) -> usize {
        self.rewards.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::env::StepInfo;
    use candle_core::DType;

    fn single(reward: f32, final_obs: Option<f32>) -> Result<Transition> {
        let device = Device::Cpu;
        Ok(Transition {
            observations: Tensor::new(&[[reward]], &device)?,
            actions: Tensor::new(&[1u32], &device)?,
            rewards: vec![reward],
            terminateds: vec![final_obs.is_some()],
            truncateds: vec![false],
            info: StepInfo {
                episode: None,
                final_observations: vec![
                    final_obs.map(|v| Tensor::new(&[v], &device)).transpose()?,
                ],
            },
            next_observations: Tensor::zeros((1, 1), DType::F32, &device)?,
            values: None,
            log_probs: None,
        })
    }

    #[test]
    fn test_ring_overwrites_oldest() -> Result<()> {
        let mut buffer = ReplayBuffer::new(4, 2, Device::Cpu)?;
        for r in 0..6 {
            buffer.add(single(r as f32, None)?)?;
        }
        assert_eq!(buffer.len(), buffer.capacity());
        let mut rewards = buffer.rewards().to_vec();
        rewards.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(rewards, vec![2., 3., 4., 5.]);
        Ok(())
    }

    #[test]
    fn test_sampling_sizes() -> Result<()> {
        let mut buffer = ReplayBuffer::new(16, 5, Device::Cpu)?;
        for r in 0..3 {
            buffer.add(single(r as f32, None)?)?;
        }
        let batches = buffer.generator(4)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(batches.len(), 4);
        for batch in batches {
            // with replacement: more samples than stored transitions
            assert_eq!(batch.rewards.dims1()?, 5);
            assert_eq!(batch.observations.dims(), &[5, 1]);
            let rewards: Vec<f32> = batch.rewards.to_vec1()?;
            assert!(rewards.iter().all(|r| *r < 3.));
        }
        Ok(())
    }

    #[test]
    fn test_final_observation_replaces_next_observation() -> Result<()> {
        let mut buffer = ReplayBuffer::new(1, 1, Device::Cpu)?;
        buffer.add(single(1., Some(42.))?)?;
        let batch = buffer.sample()?;
        let next: Vec<f32> = batch.next_observations.flatten_all()?.to_vec1()?;
        assert_eq!(next, vec![42.]);
        let term: Vec<f32> = batch.terminateds.to_vec1()?;
        assert_eq!(term, vec![1.]);
        Ok(())
    }

    #[test]
    fn test_mismatched_transition_is_rejected() -> Result<()> {
        let mut buffer = ReplayBuffer::new(4, 2, Device::Cpu)?;
        let mut short_flags = single(1., None)?;
        short_flags.terminateds.clear();
        assert!(matches!(buffer.add(short_flags), Err(Error::Storage(_))));

        let mut extra_obs = single(1., None)?;
        extra_obs.next_observations = Tensor::zeros((2, 1), DType::F32, &Device::Cpu)?;
        assert!(matches!(buffer.add(extra_obs), Err(Error::Storage(_))));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_replay_yields_nothing() -> Result<()> {
        let buffer = ReplayBuffer::new(8, 4, Device::Cpu)?;
        assert_eq!(buffer.generator(3)?.count(), 0);
        Ok(())
    }
}

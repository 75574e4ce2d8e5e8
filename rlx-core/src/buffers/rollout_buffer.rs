use super::{Storage, Transition, bools_to_f32, mini_batching::RolloutBatchIterator};
use crate::{
    error::{Error, Result},
    metrics::Metrics,
};
use candle_core::{Device, Tensor};

#[derive(Debug, Clone)]
pub struct RolloutBatch {
    pub observations: Tensor,
    pub actions: Tensor,
    pub values: Tensor,
    pub returns: Tensor,
    pub terminateds: Tensor,
    pub truncateds: Tensor,
    pub old_log_probs: Tensor,
    pub advantages: Tensor,
}

#[derive(Debug)]
pub(crate) struct FlatRollout {
    pub observations: Tensor,
    pub actions: Tensor,
    pub values: Tensor,
    pub returns: Tensor,
    pub terminateds: Tensor,
    pub truncateds: Tensor,
    pub log_probs: Tensor,
    pub advantages: Tensor,
}

/// Fixed-horizon on-policy storage holding `num_steps` vectorized steps.
#[derive(Debug)]
pub struct RolloutBuffer {
    num_steps: usize,
    num_envs: usize,
    device: Device,
    observations: Vec<Tensor>,
    actions: Vec<Tensor>,
    rewards: Vec<Vec<f32>>,
    terminateds: Vec<Vec<bool>>,
    truncateds: Vec<Vec<bool>>,
    values: Vec<Vec<f32>>,
    log_probs: Vec<Tensor>,
    advantages: Option<Vec<f32>>,
    returns: Option<Vec<f32>>,
    flat: Option<FlatRollout>,
}

impl RolloutBuffer {
    pub fn new(num_steps: usize, num_envs: usize, device: Device) -> Self {
        Self {
            num_steps,
            num_envs,
            device,
            observations: Vec::with_capacity(num_steps),
            actions: Vec::with_capacity(num_steps),
            rewards: Vec::with_capacity(num_steps),
            terminateds: Vec::with_capacity(num_steps),
            truncateds: Vec::with_capacity(num_steps),
            values: Vec::with_capacity(num_steps),
            log_probs: Vec::with_capacity(num_steps),
            advantages: None,
            returns: None,
            flat: None,
        }
    }

    pub fn stored_steps(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_full(&self) -> bool {
        self.stored_steps() >= self.num_steps
    }

    pub fn advantages(&self) -> Option<&[f32]> {
        self.advantages.as_deref()
    }

    pub fn returns(&self) -> Option<&[f32]> {
        self.returns.as_deref()
    }

    /// Generalized advantage estimation over the stored steps. A terminated or
    /// truncated step does not bootstrap from the step after it.
    pub fn compute_returns_and_advantages(
        &mut self,
        last_values: &Tensor,
        gamma: f32,
        gae_lambda: f32,
        normalize: bool,
    ) -> Result<()> {
        let last_values: Vec<f32> = last_values.flatten_all()?.to_vec1()?;
        if last_values.len() != self.num_envs {
            return Err(Error::Storage(format!(
                "expected {} bootstrap values, got {}",
                self.num_envs,
                last_values.len()
            )));
        }
        let total_steps = self.stored_steps();
        let n = self.num_envs;
        let mut advantages = vec![0f32; total_steps * n];
        let mut returns = vec![0f32; total_steps * n];
        let mut last_gae_lam = vec![0f32; n];
        for step in (0..total_steps).rev() {
            for env in 0..n {
                let done = self.terminateds[step][env] || self.truncateds[step][env];
                let next_non_terminal = if done { 0f32 } else { 1. };
                let next_value = if step == total_steps - 1 {
                    last_values[env]
                } else {
                    self.values[step + 1][env]
                };
                let value = self.values[step][env];
                let delta =
                    self.rewards[step][env] + gamma * next_value * next_non_terminal - value;
                last_gae_lam[env] =
                    delta + gamma * gae_lambda * next_non_terminal * last_gae_lam[env];
                advantages[step * n + env] = last_gae_lam[env];
                returns[step * n + env] = last_gae_lam[env] + value;
            }
        }
        if normalize {
            normalize_advantage(&mut advantages);
        }
        self.flat = if total_steps == 0 {
            None
        } else {
            Some(self.flatten(&advantages, &returns)?)
        };
        self.advantages = Some(advantages);
        self.returns = Some(returns);
        Ok(())
    }

    fn flatten(&self, advantages: &[f32], returns: &[f32]) -> Result<FlatRollout> {
        let total = advantages.len();
        let flat_f32 = |data: Vec<f32>| Tensor::from_vec(data, total, &self.device);
        let values = self.values.iter().flatten().copied().collect();
        let terminateds = bools_to_f32(&self.terminateds.concat());
        let truncateds = bools_to_f32(&self.truncateds.concat());
        Ok(FlatRollout {
            observations: Tensor::cat(&self.observations, 0)?,
            actions: Tensor::cat(&self.actions, 0)?,
            values: flat_f32(values)?,
            returns: flat_f32(returns.to_vec())?,
            terminateds: flat_f32(terminateds)?,
            truncateds: flat_f32(truncateds)?,
            log_probs: Tensor::cat(&self.log_probs, 0)?.flatten_all()?,
            advantages: flat_f32(advantages.to_vec())?,
        })
    }

    pub fn reset(&mut self) {
        self.observations.clear();
        self.actions.clear();
        self.rewards.clear();
        self.terminateds.clear();
        self.truncateds.clear();
        self.values.clear();
        self.log_probs.clear();
        self.advantages = None;
        self.returns = None;
        self.flat = None;
    }
}

impl Storage for RolloutBuffer {
    type Batch = RolloutBatch;
    type Generator<'a> = RolloutBatchIterator<'a>;

    fn add(&mut self, transition: Transition) -> Result<()> {
        if self.is_full() {
            return Err(Error::Storage(format!(
                "rollout horizon of {} steps already reached",
                self.num_steps
            )));
        }
        if transition.num_envs() != self.num_envs {
            return Err(Error::Storage(format!(
                "expected {} sub-environments, got {}",
                self.num_envs,
                transition.num_envs()
            )));
        }
        let Some(values) = transition.values else {
            return Err(Error::MissingComponent(
                "rollout transitions need value estimates".into(),
            ));
        };
        let Some(log_probs) = transition.log_probs else {
            return Err(Error::MissingComponent(
                "rollout transitions need action log-probabilities".into(),
            ));
        };
        self.observations.push(transition.observations);
        self.actions.push(transition.actions);
        self.rewards.push(transition.rewards);
        self.terminateds.push(transition.terminateds);
        self.truncateds.push(transition.truncateds);
        self.values.push(values.flatten_all()?.to_vec1()?);
        self.log_probs.push(log_probs);
        // a new step invalidates previously computed advantages
        self.advantages = None;
        self.returns = None;
        self.flat = None;
        Ok(())
    }

    fn generator(&self, num_mini_batches: usize) -> Result<Self::Generator<'_>> {
        if num_mini_batches == 0 {
            return Err(Error::invalid("num_mini_batch", "must be at least 1"));
        }
        if self.is_empty() {
            return Ok(RolloutBatchIterator::empty());
        }
        let Some(flat) = &self.flat else {
            return Err(Error::Storage(
                "advantages must be computed before iterating the rollout".into(),
            ));
        };
        Ok(RolloutBatchIterator::new(
            flat,
            self.len(),
            num_mini_batches,
            &self.device,
        ))
    }

    // the rollout was consumed by the learner
    fn update(&mut self, _metrics: &Metrics) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn len(&self) -> usize {
        self.stored_steps() * self.num_envs
    }
}

pub fn normalize_advantage(advantage: &mut [f32]) {
    if advantage.is_empty() {
        return;
    }
    let mean = advantage.iter().sum::<f32>() / advantage.len() as f32;
    let variance =
        advantage.iter().map(|x| (*x - mean).powi(2)).sum::<f32>() / advantage.len() as f32;
    let std = variance.sqrt() + 1e-8;
    for x in advantage.iter_mut() {
        *x = (*x - mean) / std;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::env::StepInfo;
    use candle_core::DType;
    use std::collections::HashSet;

    fn transition(step: usize, num_envs: usize, reward: f32, done: bool) -> Result<Transition> {
        let device = Device::Cpu;
        let obs: Vec<f32> = (0..num_envs).map(|e| (step * num_envs + e) as f32).collect();
        Ok(Transition {
            observations: Tensor::from_vec(obs, (num_envs, 1), &device)?,
            actions: Tensor::zeros(num_envs, DType::U32, &device)?,
            rewards: vec![reward; num_envs],
            terminateds: vec![done; num_envs],
            truncateds: vec![false; num_envs],
            info: StepInfo::default(),
            next_observations: Tensor::zeros((num_envs, 1), DType::F32, &device)?,
            values: Some(Tensor::zeros(num_envs, DType::F32, &device)?),
            log_probs: Some(Tensor::zeros(num_envs, DType::F32, &device)?),
        })
    }

    #[test]
    fn test_generator_partitions_every_transition_once() -> Result<()> {
        let (num_steps, num_envs) = (7, 3);
        let mut buffer = RolloutBuffer::new(num_steps, num_envs, Device::Cpu);
        for step in 0..num_steps {
            buffer.add(transition(step, num_envs, 1., false)?)?;
        }
        buffer.compute_returns_and_advantages(
            &Tensor::zeros(num_envs, DType::F32, &Device::Cpu)?,
            0.99,
            0.95,
            true,
        )?;
        for num_mini_batches in [1, 4, 8, 21] {
            let mut seen = HashSet::new();
            let mut total = 0;
            let mut batches = 0;
            for batch in buffer.generator(num_mini_batches)? {
                let batch = batch?;
                let obs: Vec<f32> = batch.observations.flatten_all()?.to_vec1()?;
                assert_eq!(batch.advantages.dims1()?, obs.len());
                assert_eq!(batch.returns.dims1()?, obs.len());
                assert_eq!(batch.old_log_probs.dims1()?, obs.len());
                total += obs.len();
                batches += 1;
                for o in obs {
                    assert!(seen.insert(o as usize), "duplicate transition {o}");
                }
            }
            assert_eq!(total, num_steps * num_envs);
            assert_eq!(batches, num_mini_batches);
        }
        Ok(())
    }

    #[test]
    fn test_gae_matches_hand_computation() -> Result<()> {
        let mut buffer = RolloutBuffer::new(3, 1, Device::Cpu);
        let device = Device::Cpu;
        for (step, (reward, done)) in [(1f32, false), (0., true), (2., false)].iter().enumerate() {
            let mut t = transition(step, 1, *reward, *done)?;
            t.values = Some(Tensor::new(&[0.5f32], &device)?);
            buffer.add(t)?;
        }
        let (gamma, lambda) = (0.9f32, 0.8f32);
        let last_values = Tensor::new(&[1f32], &device)?;
        buffer.compute_returns_and_advantages(&last_values, gamma, lambda, false)?;
        let adv = buffer.advantages().expect("advantages");
        let a2 = 2. + gamma * 1. - 0.5;
        let a1 = 0. - 0.5;
        let a0 = (1. + gamma * 0.5 - 0.5) + gamma * lambda * a1;
        assert!((adv[2] - a2).abs() < 1e-6);
        assert!((adv[1] - a1).abs() < 1e-6);
        assert!((adv[0] - a0).abs() < 1e-6);
        let ret = buffer.returns().expect("returns");
        assert!((ret[0] - (a0 + 0.5)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_empty_rollout_yields_nothing() -> Result<()> {
        let buffer = RolloutBuffer::new(4, 2, Device::Cpu);
        assert_eq!(buffer.generator(8)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_generator_requires_advantages() -> Result<()> {
        let mut buffer = RolloutBuffer::new(4, 2, Device::Cpu);
        buffer.add(transition(0, 2, 1., false)?)?;
        assert!(matches!(buffer.generator(2), Err(Error::Storage(_))));
        Ok(())
    }

    #[test]
    fn test_add_past_horizon_fails_and_update_resets() -> Result<()> {
        let mut buffer = RolloutBuffer::new(1, 2, Device::Cpu);
        buffer.add(transition(0, 2, 1., false)?)?;
        assert!(buffer.add(transition(1, 2, 1., false)?).is_err());
        buffer.update(&Metrics::new())?;
        assert!(buffer.is_empty());
        buffer.add(transition(0, 2, 1., false)?)?;
        assert_eq!(buffer.len(), 2);
        Ok(())
    }

    #[test]
    fn test_add_requires_policy_extras() -> Result<()> {
        let mut buffer = RolloutBuffer::new(2, 1, Device::Cpu);
        let mut t = transition(0, 1, 1., false)?;
        t.values = None;
        assert!(matches!(buffer.add(t), Err(Error::MissingComponent(_))));
        Ok(())
    }
}

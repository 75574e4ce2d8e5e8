use super::rollout_buffer::{FlatRollout, RolloutBatch};
use crate::{error::Result, rng};
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;

/// Walks a shuffled permutation of the rollout in `num_mini_batches` contiguous
/// chunks whose sizes differ by at most one.
pub struct RolloutBatchIterator<'a> {
    rollout: Option<&'a FlatRollout>,
    indicies: Vec<u32>,
    num_mini_batches: usize,
    current_batch: usize,
    current: usize,
    device: Device,
}

impl<'a> RolloutBatchIterator<'a> {
    pub(crate) fn new(
        rollout: &'a FlatRollout,
        total: usize,
        num_mini_batches: usize,
        device: &Device,
    ) -> Self {
        let mut indicies: Vec<u32> = (0..total as u32).collect();
        rng::with_rng(|rng| indicies.shuffle(rng));
        Self {
            rollout: Some(rollout),
            indicies,
            num_mini_batches,
            current_batch: 0,
            current: 0,
            device: device.clone(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            rollout: None,
            indicies: vec![],
            num_mini_batches: 0,
            current_batch: 0,
            current: 0,
            device: Device::Cpu,
        }
    }

    fn batch_len(&self, batch_idx: usize) -> usize {
        let total = self.indicies.len();
        let base = total / self.num_mini_batches;
        let remainder = total % self.num_mini_batches;
        base + usize::from(batch_idx < remainder)
    }

    fn select(&self, rollout: &FlatRollout, batch_indicies: &[u32]) -> Result<RolloutBatch> {
        let ids = Tensor::from_slice(batch_indicies, batch_indicies.len(), &self.device)?;
        Ok(RolloutBatch {
            observations: rollout.observations.index_select(&ids, 0)?,
            actions: rollout.actions.index_select(&ids, 0)?,
            values: rollout.values.index_select(&ids, 0)?,
            returns: rollout.returns.index_select(&ids, 0)?,
            terminateds: rollout.terminateds.index_select(&ids, 0)?,
            truncateds: rollout.truncateds.index_select(&ids, 0)?,
            old_log_probs: rollout.log_probs.index_select(&ids, 0)?,
            advantages: rollout.advantages.index_select(&ids, 0)?,
        })
    }
}

impl Iterator for RolloutBatchIterator<'_> {
    type Item = Result<RolloutBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let rollout = self.rollout?;
        while self.current_batch < self.num_mini_batches {
            let len = self.batch_len(self.current_batch);
            self.current_batch += 1;
            if len == 0 {
                continue;
            }
            let start = self.current;
            self.current += len;
            return Some(self.select(rollout, &self.indicies[start..start + len]));
        }
        None
    }
}

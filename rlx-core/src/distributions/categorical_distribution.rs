use crate::{error::Result, rng};
use candle_core::{D, DType, Device, Error, Tensor};
use candle_nn::ops::{log_softmax, softmax};
use rand::distr::Distribution as RandDistribution;
use rand::distr::weighted::WeightedIndex;

/// Batched categorical distribution parameterized by unnormalized logits of shape
/// `(batch, n_actions)`. Actions are `u32` indices of shape `(batch,)`.
#[derive(Debug, Clone)]
pub struct Categorical {
    logits: Tensor,
}

impl Categorical {
    pub fn new(logits: Tensor) -> Self {
        Self { logits }
    }

    pub fn probs(&self) -> Result<Tensor> {
        Ok(softmax(&self.logits, D::Minus1)?)
    }

    pub fn log_probs_all(&self) -> Result<Tensor> {
        Ok(log_softmax(&self.logits, D::Minus1)?)
    }

    pub fn sample(&self) -> Result<Tensor> {
        let action_probs: Vec<Vec<f32>> = self.probs()?.to_vec2()?;
        let actions = action_probs
            .iter()
            .map(|probs| {
                let distribution = WeightedIndex::new(probs).map_err(Error::wrap)?;
                Ok(rng::with_rng(|rng| distribution.sample(rng)) as u32)
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = actions.len();
        Ok(Tensor::from_vec(actions, batch, self.logits.device())?)
    }

    pub fn mode(&self) -> Result<Tensor> {
        Ok(self.logits.argmax(D::Minus1)?)
    }

    pub fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        let actions = actions.to_dtype(DType::U32)?.unsqueeze(1)?;
        Ok(self.log_probs_all()?.gather(&actions, 1)?.squeeze(1)?)
    }

    pub fn entropy(&self) -> Result<Tensor> {
        let log_probs = self.log_probs_all()?;
        let probs = log_probs.exp()?;
        Ok(probs.mul(&log_probs)?.sum(D::Minus1)?.neg()?)
    }
}

pub fn uniform_actions(batch: usize, n_actions: usize, device: &Device) -> Result<Tensor> {
    let actions = rng::with_rng(|rng| {
        use rand::Rng;
        (0..batch)
            .map(|_| rng.random_range(0..n_actions) as u32)
            .collect::<Vec<_>>()
    });
    Ok(Tensor::from_vec(actions, batch, device)?)
}

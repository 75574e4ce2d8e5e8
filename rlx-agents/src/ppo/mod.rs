use candle_core::Tensor;
use rlx_core::{
    agents::Learner,
    buffers::{RolloutBuffer, Storage},
    encoders::EncoderKind,
    error::{Error, Result},
    metrics::{Metrics, MetricsAccumulator},
    policies::{ActorCritic, OptimizerWithMaxGrad, adam_params, find_group, joint_backward_step},
    tensors::{Entropy, PolicyLoss, ValueLoss},
};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    pub encoder: EncoderKind,
    pub feature_dim: usize,
    pub hidden_dim: usize,
    pub lr: f64,
    pub eps: f64,
    pub clip_range: f32,
    pub n_epochs: usize,
    pub num_mini_batch: usize,
    pub vf_coef: f64,
    pub ent_coef: f64,
    pub max_grad_norm: f32,
    pub gamma: f32,
    pub gae_lambda: f32,
    pub normalize_advantages: bool,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderKind::default(),
            feature_dim: 256,
            hidden_dim: 256,
            lr: 5e-4,
            eps: 1e-5,
            clip_range: 0.2,
            n_epochs: 3,
            num_mini_batch: 8,
            vf_coef: 0.5,
            ent_coef: 0.01,
            max_grad_norm: 0.5,
            gamma: 0.99,
            gae_lambda: 0.95,
            normalize_advantages: true,
        }
    }
}

impl PpoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_mini_batch == 0 {
            return Err(Error::invalid("num_mini_batch", "must be at least 1"));
        }
        if self.lr <= 0. {
            return Err(Error::invalid("lr", "must be positive"));
        }
        if !(0. ..=1.).contains(&self.gamma) {
            return Err(Error::invalid("gamma", "must lie in [0, 1]"));
        }
        if !(0. ..=1.).contains(&self.gae_lambda) {
            return Err(Error::invalid("gae_lambda", "must lie in [0, 1]"));
        }
        if self.clip_range <= 0. {
            return Err(Error::invalid("clip_range", "must be positive"));
        }
        Ok(())
    }
}

/// `-mean(min(ratio * A, clip(ratio, 1 - eps, 1 + eps) * A))`
pub fn actor_loss(ratio: &Tensor, advantages: &Tensor, clip_range: f32) -> Result<PolicyLoss> {
    let clip_range = clip_range as f64;
    let unclipped = (ratio * advantages)?;
    let clipped = (ratio.clamp(1. - clip_range, 1. + clip_range)? * advantages)?;
    Ok(PolicyLoss(
        Tensor::minimum(&unclipped, &clipped)?.mean_all()?.neg()?,
    ))
}

/// `0.5 * mean(max((V - R)^2, (clip(V - V_old, -eps, eps) + V_old - R)^2))`
pub fn critic_loss(
    values: &Tensor,
    old_values: &Tensor,
    returns: &Tensor,
    clip_range: f32,
) -> Result<ValueLoss> {
    let clip_range = clip_range as f64;
    let unclipped = (values - returns)?.sqr()?;
    let clipped_values = ((values - old_values)?.clamp(-clip_range, clip_range)? + old_values)?;
    let clipped = (clipped_values - returns)?.sqr()?;
    Ok(ValueLoss(
        Tensor::maximum(&unclipped, &clipped)?.mean_all()?.affine(0.5, 0.)?,
    ))
}

/// Proximal policy optimization over a shared-encoder actor-critic.
pub struct Ppo<P: ActorCritic> {
    pub policy: P,
    pub config: PpoConfig,
    encoder_optimizer: OptimizerWithMaxGrad,
    actor_critic_optimizer: OptimizerWithMaxGrad,
}

impl<P: ActorCritic> Ppo<P> {
    pub fn new(policy: P, config: PpoConfig) -> Result<Self> {
        config.validate()?;
        let groups = policy.parameter_groups();
        let params = adam_params(config.lr, config.eps);
        let max_grad_norm = Some(config.max_grad_norm);
        let encoder_optimizer = OptimizerWithMaxGrad::new(
            find_group(&groups, "encoder")?,
            params.clone(),
            max_grad_norm,
        )?;
        let actor_critic_optimizer = OptimizerWithMaxGrad::new(
            find_group(&groups, "actor_critic")?,
            params,
            max_grad_norm,
        )?;
        Ok(Self {
            policy,
            config,
            encoder_optimizer,
            actor_critic_optimizer,
        })
    }
}

impl<P: ActorCritic> Learner for Ppo<P> {
    type Policy = P;
    type Storage = RolloutBuffer;

    fn policy(&self) -> &P {
        &self.policy
    }

    fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    fn update(&mut self, storage: &mut RolloutBuffer, _global_step: usize) -> Result<Metrics> {
        let mut accumulator = MetricsAccumulator::new(&["actor_loss", "critic_loss", "entropy"]);
        for _ in 0..self.config.n_epochs {
            for batch in storage.generator(self.config.num_mini_batch)? {
                let batch = batch?;
                let evaluation = self
                    .policy
                    .get_action_and_value(&batch.observations, &batch.actions)?;
                let ratio = (&evaluation.log_probs - &batch.old_log_probs)?.exp()?;
                let policy_loss = actor_loss(&ratio, &batch.advantages, self.config.clip_range)?;
                let value_loss = critic_loss(
                    &evaluation.values,
                    &batch.values,
                    &batch.returns,
                    self.config.clip_range,
                )?;
                let entropy = Entropy(evaluation.entropy.mean_all()?);
                let loss = ((value_loss.affine(self.config.vf_coef, 0.)? + policy_loss.deref())?
                    - entropy.affine(self.config.ent_coef, 0.)?)?;
                joint_backward_step(
                    &loss,
                    &mut [
                        &mut self.encoder_optimizer,
                        &mut self.actor_critic_optimizer,
                    ],
                )?;
                accumulator.record(&[
                    ("actor_loss", policy_loss.to_scalar::<f32>()? as f64),
                    ("critic_loss", value_loss.to_scalar::<f32>()? as f64),
                    ("entropy", entropy.to_scalar::<f32>()? as f64),
                ]);
            }
        }
        Ok(accumulator.mean())
    }
}

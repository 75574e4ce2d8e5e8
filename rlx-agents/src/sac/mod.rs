use candle_core::{D, DType, Tensor};
use candle_nn::{Init, VarMap, loss::mse};
use rlx_core::{
    agents::Learner,
    buffers::{ReplayBatch, ReplayBuffer, Storage},
    encoders::EncoderKind,
    error::{Error, Result},
    metrics::{Metrics, MetricsAccumulator},
    policies::{
        OffPolicyDiscreteActorCritic, OptimizerWithMaxGrad, Policy, adam_params, find_group,
        joint_backward_step,
    },
    schedule::Schedule,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SacConfig {
    pub encoder: EncoderKind,
    pub feature_dim: usize,
    pub hidden_dim: usize,
    pub lr: f64,
    pub eps: f64,
    pub batch_size: usize,
    pub discount: f32,
    pub critic_tau: f64,
    pub actor_update_freq: usize,
    pub critic_target_update_freq: usize,
    pub init_temperature: f64,
    pub learnable_temperature: bool,
    pub target_entropy_ratio: f64,
    pub num_mini_batches: usize,
    pub exploration: Schedule,
}

impl Default for SacConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderKind::default(),
            feature_dim: 256,
            hidden_dim: 256,
            lr: 5e-4,
            eps: 1e-8,
            batch_size: 256,
            discount: 0.99,
            critic_tau: 0.01,
            actor_update_freq: 1,
            critic_target_update_freq: 1,
            init_temperature: 0.1,
            learnable_temperature: true,
            target_entropy_ratio: 0.98,
            num_mini_batches: 1,
            exploration: Schedule::Constant(0.),
        }
    }
}

impl SacConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid("batch_size", "must be at least 1"));
        }
        if self.actor_update_freq == 0 {
            return Err(Error::invalid("actor_update_freq", "must be at least 1"));
        }
        if self.critic_target_update_freq == 0 {
            return Err(Error::invalid(
                "critic_target_update_freq",
                "must be at least 1",
            ));
        }
        if !(0. ..=1.).contains(&self.critic_tau) {
            return Err(Error::invalid("critic_tau", "must lie in [0, 1]"));
        }
        if self.init_temperature <= 0. {
            return Err(Error::invalid("init_temperature", "must be positive"));
        }
        if self.num_mini_batches == 0 {
            return Err(Error::invalid("num_mini_batches", "must be at least 1"));
        }
        Ok(())
    }
}

struct Temperature {
    log_alpha: Tensor,
    optimizer: Option<OptimizerWithMaxGrad>,
}

impl Temperature {
    fn new(config: &SacConfig, device: &candle_core::Device) -> Result<Self> {
        let varmap = VarMap::new();
        let log_alpha = varmap.get(
            (),
            "log_alpha",
            Init::Const(config.init_temperature.ln()),
            DType::F32,
            device,
        )?;
        let optimizer = if config.learnable_temperature {
            Some(OptimizerWithMaxGrad::new(
                varmap,
                adam_params(config.lr, config.eps),
                None,
            )?)
        } else {
            None
        };
        Ok(Self {
            log_alpha,
            optimizer,
        })
    }

    fn alpha(&self) -> Result<f64> {
        Ok(self.log_alpha.exp()?.to_scalar::<f32>()? as f64)
    }
}

/// Soft actor-critic for discrete action spaces. Expectations over actions are
/// taken in closed form from the policy probabilities.
pub struct DiscreteSac {
    pub policy: OffPolicyDiscreteActorCritic,
    pub config: SacConfig,
    encoder_optimizer: OptimizerWithMaxGrad,
    actor_optimizer: OptimizerWithMaxGrad,
    critic_optimizer: OptimizerWithMaxGrad,
    temperature: Temperature,
    target_entropy: f64,
    num_updates: usize,
}

impl DiscreteSac {
    pub fn new(policy: OffPolicyDiscreteActorCritic, config: SacConfig) -> Result<Self> {
        config.validate()?;
        let groups = policy.parameter_groups();
        find_group(&groups, "critic_target")?;
        let params = adam_params(config.lr, config.eps);
        let encoder_optimizer =
            OptimizerWithMaxGrad::new(find_group(&groups, "encoder")?, params.clone(), None)?;
        let actor_optimizer =
            OptimizerWithMaxGrad::new(find_group(&groups, "actor")?, params.clone(), None)?;
        let critic_optimizer =
            OptimizerWithMaxGrad::new(find_group(&groups, "critic")?, params, None)?;
        let temperature = Temperature::new(&config, policy.device())?;
        let target_entropy = config.target_entropy_ratio * (policy.n_actions() as f64).ln();
        Ok(Self {
            policy,
            config,
            encoder_optimizer,
            actor_optimizer,
            critic_optimizer,
            temperature,
            target_entropy,
            num_updates: 0,
        })
    }

    pub fn alpha(&self) -> Result<f64> {
        self.temperature.alpha()
    }

    pub fn target_entropy(&self) -> f64 {
        self.target_entropy
    }

    fn critic_target(&self, batch: &ReplayBatch, alpha: f64) -> Result<Tensor> {
        let next_features = self.policy.encode(&batch.next_observations)?.detach();
        let next_dist = self.policy.distribution(&next_features)?;
        let next_probs = next_dist.probs()?;
        let next_log_probs = next_dist.log_probs_all()?;
        let (target_q1, target_q2) = self.policy.critic_target.forward(&next_features)?;
        let soft_q = (target_q1.minimum(&target_q2)? - next_log_probs.affine(alpha, 0.)?)?;
        let next_value = (next_probs * soft_q)?.sum(D::Minus1)?;
        let not_done = batch.terminateds.affine(-1., 1.)?;
        let discounted = (next_value * not_done)?.affine(self.config.discount as f64, 0.)?;
        Ok((&batch.rewards + discounted)?.detach())
    }

    fn update_critic(&mut self, batch: &ReplayBatch, alpha: f64) -> Result<f32> {
        let target = self.critic_target(batch, alpha)?;
        let features = self.policy.encode(&batch.observations)?;
        let (q1, q2) = self.policy.critic.forward(&features)?;
        let actions = batch.actions.to_dtype(DType::U32)?.unsqueeze(1)?;
        let q1 = q1.gather(&actions, 1)?.squeeze(1)?;
        let q2 = q2.gather(&actions, 1)?.squeeze(1)?;
        let loss = (mse(&q1, &target)? + mse(&q2, &target)?)?;
        joint_backward_step(
            &loss,
            &mut [&mut self.encoder_optimizer, &mut self.critic_optimizer],
        )?;
        Ok(loss.to_scalar::<f32>()?)
    }

    fn update_actor(&mut self, batch: &ReplayBatch, alpha: f64) -> Result<(f32, f32)> {
        let features = self.policy.encode(&batch.observations)?.detach();
        let dist = self.policy.distribution(&features)?;
        let probs = dist.probs()?;
        let log_probs = dist.log_probs_all()?;
        let (q1, q2) = self.policy.critic.forward(&features)?;
        let min_q = q1.minimum(&q2)?.detach();
        let loss = (&probs * (log_probs.affine(alpha, 0.)? - min_q)?)?
            .sum(D::Minus1)?
            .mean_all()?;
        self.actor_optimizer.backward_step(&loss)?;
        let entropy = dist.entropy()?.mean_all()?.to_scalar::<f32>()?;
        Ok((loss.to_scalar::<f32>()?, entropy))
    }

    fn update_temperature(&mut self, entropy: f32) -> Result<Option<f32>> {
        let Some(optimizer) = self.temperature.optimizer.as_mut() else {
            return Ok(None);
        };
        let loss = self
            .temperature
            .log_alpha
            .affine(entropy as f64 - self.target_entropy, 0.)?;
        optimizer.backward_step(&loss)?;
        Ok(Some(loss.to_scalar::<f32>()?))
    }
}

impl Learner for DiscreteSac {
    type Policy = OffPolicyDiscreteActorCritic;
    type Storage = ReplayBuffer;

    fn policy(&self) -> &OffPolicyDiscreteActorCritic {
        &self.policy
    }

    fn policy_mut(&mut self) -> &mut OffPolicyDiscreteActorCritic {
        &mut self.policy
    }

    fn update(&mut self, storage: &mut ReplayBuffer, _global_step: usize) -> Result<Metrics> {
        let mut accumulator = MetricsAccumulator::new(&["critic_loss"]);
        let mut actor_accumulator = MetricsAccumulator::new(&["actor_loss", "entropy"]);
        let mut alpha_accumulator = MetricsAccumulator::new(&["alpha_loss"]);
        for batch in storage.generator(self.config.num_mini_batches)? {
            let batch = batch?;
            let alpha = self.alpha()?;
            let critic_loss = self.update_critic(&batch, alpha)?;
            accumulator.record(&[("critic_loss", critic_loss as f64)]);
            if self.num_updates % self.config.actor_update_freq == 0 {
                let (actor_loss, entropy) = self.update_actor(&batch, alpha)?;
                actor_accumulator.record(&[
                    ("actor_loss", actor_loss as f64),
                    ("entropy", entropy as f64),
                ]);
                if let Some(alpha_loss) = self.update_temperature(entropy)? {
                    alpha_accumulator.record(&[("alpha_loss", alpha_loss as f64)]);
                }
            }
            if self.num_updates % self.config.critic_target_update_freq == 0 {
                self.policy.soft_update_target(self.config.critic_tau)?;
            }
            self.num_updates += 1;
        }
        let mut metrics = accumulator.mean();
        for (name, value) in actor_accumulator.mean().iter() {
            metrics.insert(name, value);
        }
        if self.config.learnable_temperature {
            for (name, value) in alpha_accumulator.mean().iter() {
                metrics.insert(name, value);
            }
        }
        metrics.insert("alpha", self.alpha()?);
        Ok(metrics)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;
    use rlx_core::{
        buffers::Transition,
        env::{EnvironmentDescription, Space, StepInfo},
    };

    fn sac(config: SacConfig) -> Result<DiscreteSac> {
        let description =
            EnvironmentDescription::new(Space::continous_from_dims(vec![3]), Space::Discrete(2));
        let policy = OffPolicyDiscreteActorCritic::new(
            &description,
            &config.encoder,
            8,
            16,
            config.exploration,
            &Device::Cpu,
        )?;
        DiscreteSac::new(policy, config)
    }

    fn filled_buffer(batch_size: usize) -> Result<ReplayBuffer> {
        let device = Device::Cpu;
        let mut buffer = ReplayBuffer::new(64, batch_size, device.clone())?;
        for step in 0..8 {
            buffer.add(Transition {
                observations: Tensor::randn(0f32, 1., (2, 3), &device)?,
                actions: Tensor::new(&[0u32, 1], &device)?,
                rewards: vec![1., -1.],
                terminateds: vec![step % 4 == 3, false],
                truncateds: vec![false, false],
                info: StepInfo::default(),
                next_observations: Tensor::randn(0f32, 1., (2, 3), &device)?,
                values: None,
                log_probs: None,
            })?;
        }
        Ok(buffer)
    }

    #[test]
    fn test_target_entropy_scales_log_actions() -> Result<()> {
        let sac = sac(SacConfig::default())?;
        assert!((sac.target_entropy() - 0.98 * 2f64.ln()).abs() < 1e-9);
        assert!((sac.alpha()? - 0.1).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_update_reports_losses() -> Result<()> {
        let mut sac = sac(SacConfig {
            batch_size: 4,
            num_mini_batches: 2,
            ..Default::default()
        })?;
        let mut buffer = filled_buffer(4)?;
        let metrics = sac.update(&mut buffer, 0)?;
        for name in ["critic_loss", "actor_loss", "entropy", "alpha", "alpha_loss"] {
            assert!(
                metrics.get(name).is_some_and(f64::is_finite),
                "missing {name}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_fixed_temperature_stays_put() -> Result<()> {
        let mut sac = sac(SacConfig {
            batch_size: 4,
            learnable_temperature: false,
            init_temperature: 0.5,
            ..Default::default()
        })?;
        let mut buffer = filled_buffer(4)?;
        let metrics = sac.update(&mut buffer, 0)?;
        assert!(metrics.get("alpha_loss").is_none());
        assert!((sac.alpha()? - 0.5).abs() < 1e-6);
        Ok(())
    }

    fn snapshot(sac: &DiscreteSac, group: &str) -> Result<Vec<Vec<f32>>> {
        let varmap = find_group(&sac.policy.parameter_groups(), group)?;
        let data = varmap.data().lock().unwrap();
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();
        let mut values = vec![];
        for name in names {
            values.push(data[name].as_tensor().flatten_all()?.to_vec1::<f32>()?);
        }
        Ok(values)
    }

    #[test]
    fn test_delayed_actor_and_target_updates() -> Result<()> {
        let mut sac = sac(SacConfig {
            batch_size: 4,
            num_mini_batches: 1,
            actor_update_freq: 2,
            critic_target_update_freq: 2,
            critic_tau: 0.5,
            ..Default::default()
        })?;
        let mut buffer = filled_buffer(4)?;
        let mut moved = vec![];
        for _ in 0..3 {
            let actor = snapshot(&sac, "actor")?;
            let target = snapshot(&sac, "critic_target")?;
            sac.update(&mut buffer, 0)?;
            moved.push((
                actor != snapshot(&sac, "actor")?,
                target != snapshot(&sac, "critic_target")?,
            ));
        }
        assert_eq!(moved, vec![(true, true), (false, false), (true, true)]);
        Ok(())
    }

    #[test]
    fn test_empty_replay_leaves_networks_alone() -> Result<()> {
        let mut sac = sac(SacConfig::default())?;
        let mut buffer = ReplayBuffer::new(8, 4, Device::Cpu)?;
        let metrics = sac.update(&mut buffer, 0)?;
        assert_eq!(metrics.get("critic_loss"), Some(0.0));
        Ok(())
    }
}

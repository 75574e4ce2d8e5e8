use super::{ParameterGroup, Policy, PolicyAction, shared_actor_critic::discrete_actions};
use crate::{
    distributions::{Categorical, categorical_distribution::uniform_actions},
    encoders::{Encoder, EncoderKind},
    env::EnvironmentDescription,
    error::Result,
    rng,
    schedule::Schedule,
    utils::build_sequential::{Mlp, build_sequential},
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct DoubleCritic {
    pub q1: Mlp,
    pub q2: Mlp,
}

impl DoubleCritic {
    fn build(
        feature_dim: usize,
        hidden_dim: usize,
        n_actions: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let layers = [hidden_dim, hidden_dim, n_actions];
        Ok(Self {
            q1: build_sequential(feature_dim, &layers, &vb.pp("q1"), "layer")?,
            q2: build_sequential(feature_dim, &layers, &vb.pp("q2"), "layer")?,
        })
    }

    pub fn forward(&self, features: &Tensor) -> Result<(Tensor, Tensor)> {
        Ok((self.q1.forward(features)?, self.q2.forward(features)?))
    }
}

/// Stochastic discrete actor with a double critic and its slowly tracking target copy.
pub struct OffPolicyDiscreteActorCritic {
    pub encoder: Encoder,
    pub actor: Mlp,
    pub critic: DoubleCritic,
    pub critic_target: DoubleCritic,
    pub exploration: Schedule,
    encoder_varmap: VarMap,
    actor_varmap: VarMap,
    critic_varmap: VarMap,
    critic_target_varmap: VarMap,
    n_actions: usize,
    device: Device,
}

impl OffPolicyDiscreteActorCritic {
    pub fn new(
        env_description: &EnvironmentDescription,
        encoder_kind: &EncoderKind,
        feature_dim: usize,
        hidden_dim: usize,
        exploration: Schedule,
        device: &Device,
    ) -> Result<Self> {
        let n_actions = discrete_actions(env_description)?;
        let encoder_varmap = VarMap::new();
        let encoder = Encoder::build(
            encoder_kind,
            env_description.observation_size(),
            feature_dim,
            &VarBuilder::from_varmap(&encoder_varmap, DType::F32, device),
        )?;
        let features = encoder.feature_dim();

        let actor_varmap = VarMap::new();
        let actor_vb = VarBuilder::from_varmap(&actor_varmap, DType::F32, device);
        let actor = build_sequential(
            features,
            &[hidden_dim, hidden_dim, n_actions],
            &actor_vb,
            "layer",
        )?;

        let critic_varmap = VarMap::new();
        let critic_vb = VarBuilder::from_varmap(&critic_varmap, DType::F32, device);
        let critic = DoubleCritic::build(features, hidden_dim, n_actions, &critic_vb)?;
        let critic_target_varmap = VarMap::new();
        let target_vb = VarBuilder::from_varmap(&critic_target_varmap, DType::F32, device);
        let critic_target = DoubleCritic::build(features, hidden_dim, n_actions, &target_vb)?;

        let policy = Self {
            encoder,
            actor,
            critic,
            critic_target,
            exploration,
            encoder_varmap,
            actor_varmap,
            critic_varmap,
            critic_target_varmap,
            n_actions,
            device: device.clone(),
        };
        policy.soft_update_target(1.0)?;
        Ok(policy)
    }

    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    pub fn encode(&self, observations: &Tensor) -> Result<Tensor> {
        Ok(self.encoder.forward(observations)?)
    }

    pub fn distribution(&self, features: &Tensor) -> Result<Categorical> {
        Ok(Categorical::new(self.actor.forward(features)?))
    }

    /// `target <- tau * critic + (1 - tau) * target`, variable by variable.
    pub fn soft_update_target(&self, tau: f64) -> Result<()> {
        let source = self
            .critic_varmap
            .data()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let target = self
            .critic_target_varmap
            .data()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (name, target_var) in target.iter() {
            let Some(source_var) = source.get(name) else {
                continue;
            };
            let mixed = (source_var.as_tensor().affine(tau, 0.)?
                + target_var.as_tensor().affine(1. - tau, 0.)?)?;
            target_var.set(&mixed.detach())?;
        }
        Ok(())
    }
}

impl Policy for OffPolicyDiscreteActorCritic {
    fn explore(&self, observations: &Tensor) -> Result<Tensor> {
        uniform_actions(observations.dim(0)?, self.n_actions, &self.device)
    }

    fn act(&self, observations: &Tensor, training: bool, step: usize) -> Result<PolicyAction> {
        let dist = self.distribution(&self.encode(observations)?)?;
        if !training {
            return Ok(PolicyAction::actions_only(dist.mode()?));
        }
        let epsilon = self.exploration.value(step);
        let mut actions: Vec<u32> = dist.sample()?.to_vec1()?;
        if epsilon > 0. {
            let n_actions = self.n_actions;
            rng::with_rng(|rng| {
                for action in actions.iter_mut() {
                    if rng.random_bool(epsilon.clamp(0., 1.)) {
                        *action = rng.random_range(0..n_actions) as u32;
                    }
                }
            });
        }
        let batch = actions.len();
        Ok(PolicyAction::actions_only(Tensor::from_vec(
            actions,
            batch,
            &self.device,
        )?))
    }

    fn parameter_groups(&self) -> Vec<ParameterGroup> {
        vec![
            ParameterGroup {
                name: "encoder",
                varmap: self.encoder_varmap.clone(),
            },
            ParameterGroup {
                name: "actor",
                varmap: self.actor_varmap.clone(),
            },
            ParameterGroup {
                name: "critic",
                varmap: self.critic_varmap.clone(),
            },
            ParameterGroup {
                name: "critic_target",
                varmap: self.critic_target_varmap.clone(),
            },
        ]
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

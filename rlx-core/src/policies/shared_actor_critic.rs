use super::{ActionEvaluation, ActorCritic, ParameterGroup, Policy, PolicyAction, ValueFunction};
use crate::{
    distributions::{Categorical, categorical_distribution::uniform_actions},
    encoders::{Encoder, EncoderKind},
    env::{EnvironmentDescription, Space},
    error::{Error, Result},
    utils::build_sequential::{Mlp, build_sequential},
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap};

pub struct OnPolicySharedActorCritic {
    pub encoder: Encoder,
    pub actor: Mlp,
    pub critic: Mlp,
    encoder_varmap: VarMap,
    actor_critic_varmap: VarMap,
    n_actions: usize,
    device: Device,
}

pub(crate) fn discrete_actions(env_description: &EnvironmentDescription) -> Result<usize> {
    match env_description.action_space {
        Space::Discrete(n_actions) if n_actions > 0 => Ok(n_actions),
        Space::Discrete(_) => Err(Error::invalid("action_space", "no actions to choose from")),
        Space::Continous { .. } => Err(Error::Unimplemented(
            "continuous action spaces are not supported, only discrete ones".into(),
        )),
    }
}

impl OnPolicySharedActorCritic {
    pub fn new(
        env_description: &EnvironmentDescription,
        encoder_kind: &EncoderKind,
        feature_dim: usize,
        hidden_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        let n_actions = discrete_actions(env_description)?;
        let encoder_varmap = VarMap::new();
        let encoder_vb = VarBuilder::from_varmap(&encoder_varmap, DType::F32, device);
        let encoder = Encoder::build(
            encoder_kind,
            env_description.observation_size(),
            feature_dim,
            &encoder_vb,
        )?;
        let actor_critic_varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&actor_critic_varmap, DType::F32, device);
        let features = encoder.feature_dim();
        let actor = build_sequential(features, &[hidden_dim, n_actions], &vb.pp("actor"), "layer")?;
        let critic = build_sequential(features, &[hidden_dim, 1], &vb.pp("critic"), "layer")?;
        Ok(Self {
            encoder,
            actor,
            critic,
            encoder_varmap,
            actor_critic_varmap,
            n_actions,
            device: device.clone(),
        })
    }

    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn heads(&self, observations: &Tensor) -> Result<(Categorical, Tensor)> {
        let features = self.encoder.forward(observations)?;
        let logits = self.actor.forward(&features)?;
        let values = self.critic.forward(&features)?.squeeze(1)?;
        Ok((Categorical::new(logits), values))
    }
}

impl Policy for OnPolicySharedActorCritic {
    fn explore(&self, observations: &Tensor) -> Result<Tensor> {
        uniform_actions(observations.dim(0)?, self.n_actions, &self.device)
    }

    fn act(&self, observations: &Tensor, training: bool, _step: usize) -> Result<PolicyAction> {
        let (dist, values) = self.heads(observations)?;
        let actions = if training {
            dist.sample()?
        } else {
            dist.mode()?
        };
        let log_probs = dist.log_prob(&actions)?;
        Ok(PolicyAction {
            actions,
            values: Some(values.detach()),
            log_probs: Some(log_probs.detach()),
        })
    }

    fn parameter_groups(&self) -> Vec<ParameterGroup> {
        vec![
            ParameterGroup {
                name: "encoder",
                varmap: self.encoder_varmap.clone(),
            },
            ParameterGroup {
                name: "actor_critic",
                varmap: self.actor_critic_varmap.clone(),
            },
        ]
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

impl ValueFunction for OnPolicySharedActorCritic {
    fn get_value(&self, observations: &Tensor) -> Result<Tensor> {
        let features = self.encoder.forward(observations)?;
        Ok(self.critic.forward(&features)?.squeeze(1)?)
    }
}

impl ActorCritic for OnPolicySharedActorCritic {
    fn get_action_and_value(
        &self,
        observations: &Tensor,
        actions: &Tensor,
    ) -> Result<ActionEvaluation> {
        let (dist, values) = self.heads(observations)?;
        Ok(ActionEvaluation {
            values,
            log_probs: dist.log_prob(actions)?,
            entropy: dist.entropy()?,
        })
    }
}

pub mod off_policy_actor_critic;
pub mod shared_actor_critic;

use crate::{
    error::{Error, Result},
    utils::clip_grad::clip_grad_norm,
};
use candle_core::{Device, Tensor, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use std::{
    collections::HashMap,
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};

pub use off_policy_actor_critic::{DoubleCritic, OffPolicyDiscreteActorCritic};
pub use shared_actor_critic::OnPolicySharedActorCritic;

/// What a policy decided for a batch of observations. On-policy policies also
/// report the value estimates and log-probabilities the rollout storage needs.
#[derive(Debug, Clone)]
pub struct PolicyAction {
    pub actions: Tensor,
    pub values: Option<Tensor>,
    pub log_probs: Option<Tensor>,
}

impl PolicyAction {
    pub fn actions_only(actions: Tensor) -> Self {
        Self {
            actions,
            values: None,
            log_probs: None,
        }
    }
}

#[derive(Debug)]
pub struct ActionEvaluation {
    pub values: Tensor,
    pub log_probs: Tensor,
    pub entropy: Tensor,
}

#[derive(Clone)]
pub struct ParameterGroup {
    pub name: &'static str,
    pub varmap: VarMap,
}

impl Debug for ParameterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterGroup")
            .field("name", &self.name)
            .field("num_vars", &self.varmap.all_vars().len())
            .finish()
    }
}

pub trait Policy {
    fn explore(&self, observations: &Tensor) -> Result<Tensor>;

    fn act(&self, observations: &Tensor, training: bool, step: usize) -> Result<PolicyAction>;

    fn parameter_groups(&self) -> Vec<ParameterGroup>;

    fn device(&self) -> &Device;

    fn save(&self, dir: &Path, pretraining: bool) -> Result<PathBuf> {
        save_parameter_groups(&self.parameter_groups(), dir, pretraining)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        load_parameter_groups(&self.parameter_groups(), path, self.device())
    }
}

pub trait ValueFunction {
    fn get_value(&self, observations: &Tensor) -> Result<Tensor>;
}

pub trait ActorCritic: Policy + ValueFunction {
    fn get_action_and_value(
        &self,
        observations: &Tensor,
        actions: &Tensor,
    ) -> Result<ActionEvaluation>;
}

pub fn find_group(groups: &[ParameterGroup], name: &str) -> Result<VarMap> {
    groups
        .iter()
        .find(|g| g.name == name)
        .map(|g| g.varmap.clone())
        .ok_or_else(|| Error::MissingComponent(format!("parameter group `{name}`")))
}

fn group_tensors(group: &ParameterGroup) -> Vec<(String, candle_core::Var)> {
    let data = group
        .varmap
        .data()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    data.iter()
        .map(|(name, var)| (format!("{}/{name}", group.name), var.clone()))
        .collect()
}

/// Writes all groups into one safetensors file, keyed `<group>/<variable>`. The file is
/// written next to its destination and renamed into place.
pub fn save_parameter_groups(
    groups: &[ParameterGroup],
    dir: &Path,
    pretraining: bool,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
    let file_name = if pretraining {
        "pretrained.safetensors"
    } else {
        "agent.safetensors"
    };
    let path = dir.join(file_name);
    let tmp_path = dir.join(format!("{file_name}.tmp"));
    let tensors: HashMap<String, Tensor> = groups
        .iter()
        .flat_map(group_tensors)
        .map(|(name, var)| (name, var.as_tensor().clone()))
        .collect();
    candle_core::safetensors::save(&tensors, &tmp_path)?;
    fs::rename(&tmp_path, &path).map_err(|err| Error::io(&path, err))?;
    Ok(path)
}

pub fn load_parameter_groups(
    groups: &[ParameterGroup],
    path: &Path,
    device: &Device,
) -> Result<()> {
    if !path.exists() {
        return Err(Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no saved parameters"),
        ));
    }
    let tensors = candle_core::safetensors::load(path, device)?;
    for (name, var) in groups.iter().flat_map(group_tensors) {
        let Some(saved) = tensors.get(&name) else {
            return Err(Error::MissingComponent(format!(
                "parameter `{name}` in {}",
                path.display()
            )));
        };
        var.set(saved)?;
    }
    Ok(())
}

pub fn adam_params(lr: f64, eps: f64) -> ParamsAdamW {
    ParamsAdamW {
        lr,
        eps,
        weight_decay: 0.,
        ..Default::default()
    }
}

pub struct OptimizerWithMaxGrad {
    pub optimizer: AdamW,
    pub max_grad_norm: Option<f32>,
    pub varmap: VarMap,
}

impl Debug for OptimizerWithMaxGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("learning_rate", &self.optimizer.learning_rate())
            .field("max_grad_norm", &self.max_grad_norm)
            .finish()
    }
}

impl OptimizerWithMaxGrad {
    pub fn new(varmap: VarMap, params: ParamsAdamW, max_grad_norm: Option<f32>) -> Result<Self> {
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        Ok(Self {
            optimizer,
            max_grad_norm,
            varmap,
        })
    }

    pub fn clip(&self, grads: &mut GradStore) -> Result<()> {
        if let Some(max_norm) = self.max_grad_norm {
            clip_grad_norm(grads, &self.varmap, max_norm)?;
        }
        Ok(())
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.optimizer.step(grads)?;
        Ok(())
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        joint_backward_step(loss, &mut [self])
    }
}

pub fn joint_backward_step(
    loss: &Tensor,
    optimizers: &mut [&mut OptimizerWithMaxGrad],
) -> Result<()> {
    let mut grads = loss.backward()?;
    for optimizer in optimizers.iter() {
        optimizer.clip(&mut grads)?;
    }
    for optimizer in optimizers.iter_mut() {
        optimizer.step(&grads)?;
    }
    Ok(())
}

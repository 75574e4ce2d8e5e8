use crate::{
    error::{Error, Result},
    utils::build_sequential::{Mlp, build_sequential},
};
use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EncoderKind {
    Identity,
    Mlp { hidden_layers: Vec<usize> },
}

impl Default for EncoderKind {
    fn default() -> Self {
        Self::Mlp {
            hidden_layers: vec![64],
        }
    }
}

#[derive(Debug, Clone)]
pub enum Encoder {
    Identity { feature_dim: usize },
    Mlp { net: Mlp },
}

impl Encoder {
    pub fn build(
        kind: &EncoderKind,
        obs_dim: usize,
        feature_dim: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        if obs_dim == 0 {
            return Err(Error::invalid("observation_space", "observation size is zero"));
        }
        match kind {
            EncoderKind::Identity => Ok(Self::Identity {
                feature_dim: obs_dim,
            }),
            EncoderKind::Mlp { hidden_layers } => {
                let layers: Vec<usize> = hidden_layers
                    .iter()
                    .copied()
                    .chain(std::iter::once(feature_dim))
                    .collect();
                let net = build_sequential(obs_dim, &layers, vb, "layer")?;
                Ok(Self::Mlp { net })
            }
        }
    }

    pub fn feature_dim(&self) -> usize {
        match self {
            Self::Identity { feature_dim } => *feature_dim,
            Self::Mlp { net } => net.out_dim(),
        }
    }
}

impl Module for Encoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Identity { .. } => Ok(xs.clone()),
            Self::Mlp { net } => net.forward(xs)?.relu(),
        }
    }
}

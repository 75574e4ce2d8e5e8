pub mod common;
pub mod evaluator;
pub mod off_policy;
pub mod on_policy;
pub mod ppo;
pub mod sac;

pub use off_policy::{OffPolicyAgent, OffPolicyConfig};
pub use on_policy::{OnPolicyAgent, OnPolicyConfig};
pub use ppo::{Ppo, PpoConfig};
pub use sac::{DiscreteSac, SacConfig};

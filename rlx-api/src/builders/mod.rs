pub mod ppo;
pub mod sac;

pub use ppo::PpoAgentBuilder;
pub use sac::SacAgentBuilder;

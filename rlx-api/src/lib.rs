pub mod builders;
pub mod config;
pub mod logging;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use builders::{PpoAgentBuilder, SacAgentBuilder};
pub use config::{ExperimentConfig, load_config, load_experiment};
pub use logging::init_tracing;

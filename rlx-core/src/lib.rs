pub mod agents;
pub mod buffers;
pub mod config;
pub mod distributions;
pub mod encoders;
pub mod env;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod policies;
pub mod rng;
pub mod schedule;
pub mod tensors;
pub mod timer;
pub mod utils;

pub use error::{Error, Result};

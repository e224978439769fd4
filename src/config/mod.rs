//! Configuration types and environment loading.

pub mod env;
pub mod types;

pub use env::{apply_env_overrides, from_env};
pub use types::RabbitMqConfig;

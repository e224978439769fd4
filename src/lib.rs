//! Queuekeeper - self-healing RabbitMQ publisher connection manager.
//!
//! Owns one logical broker connection, recovers it after loss with bounded
//! exponential backoff and jitter, and exposes a best-effort persistent
//! publish plus a health snapshot for readiness probes.
//!
//! ```no_run
//! use queuekeeper::{config, ConnectionManager};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(config::from_env()?);
//! manager.connect().await?;
//! manager.publish("chat.responses", &serde_json::json!({"foo": "bar"})).await?;
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod manager;
pub mod state;
pub mod transport;

pub use backoff::RetryConfig;
pub use config::RabbitMqConfig;
pub use error::{ConfigError, ConnectionError, PublishError, TransportError};
pub use manager::ConnectionManager;
pub use state::{ConnectionStatus, HealthStatus};
pub use transport::{
    AmqpConnector, BrokerChannel, BrokerConnection, BrokerConnector, BrokerHandle, LifecycleEvent,
};

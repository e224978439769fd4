//! Broker transport abstraction.
//!
//! The manager is written against these traits rather than a concrete AMQP
//! client. A connector produces, per successful dial, a connection handle,
//! a channel handle, and a stream of lifecycle events the manager's watcher
//! task consumes to detect connection loss.

pub mod amqp;

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::TransportError;

pub use amqp::AmqpConnector;

/// Broker-reported lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Transport-level error; treated as connection loss.
    Error { message: String },
    /// Connection closed without an explicit error.
    Closed,
    /// Broker back-pressure engaged; log-only.
    Blocked { reason: String },
    /// Broker back-pressure released; log-only.
    Unblocked,
}

/// Everything one successful dial yields.
///
/// Dropping the receiver detaches the manager from the old connection's
/// events; dropping the handles releases the underlying resources.
pub struct BrokerHandle<Conn, Chan> {
    pub connection: Conn,
    pub channel: Chan,
    pub events: mpsc::UnboundedReceiver<LifecycleEvent>,
}

/// Dials a broker and hands back connection, channel, and lifecycle events.
pub trait BrokerConnector: Send + Sync + 'static {
    type Connection: BrokerConnection;
    type Channel: BrokerChannel;

    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<BrokerHandle<Self::Connection, Self::Channel>, TransportError>>
           + Send;
}

/// A live broker connection; only closed, never otherwise driven, by the
/// manager.
pub trait BrokerConnection: Send + Sync + 'static {
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A publish channel multiplexed over the connection.
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    /// Declare `queue` as durable. Idempotent; safe to repeat per publish.
    fn ensure_queue(&self, queue: &str)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send `payload` to `queue`. `persistent` asks the broker to write
    /// the message to stable storage; no publisher confirm is awaited.
    fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        persistent: bool,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

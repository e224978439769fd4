//! AMQP 0.9.1 transport backed by `lapin`.

use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{BrokerChannel, BrokerConnection, BrokerConnector, BrokerHandle, LifecycleEvent};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Connector for real RabbitMQ brokers.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl BrokerConnector for AmqpConnector {
    type Connection = Connection;
    type Channel = Channel;

    async fn connect(
        &self,
        url: &str,
    ) -> Result<BrokerHandle<Connection, Channel>, TransportError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(to_transport)?;

        // lapin reports broker-initiated close through the error callback,
        // and handles connection.blocked frames internally, so Error is the
        // only event this transport emits.
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        connection.on_error(move |err| {
            let _ = event_tx.send(LifecycleEvent::Error {
                message: err.to_string(),
            });
        });

        let channel = connection.create_channel().await.map_err(to_transport)?;

        Ok(BrokerHandle {
            connection,
            channel,
            events: event_rx,
        })
    }
}

impl BrokerConnection for Connection {
    async fn close(&self) -> Result<(), TransportError> {
        Connection::close(self, REPLY_SUCCESS, "shutdown")
            .await
            .map_err(to_transport)
    }
}

impl BrokerChannel for Channel {
    async fn ensure_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map(|_| ())
        .map_err(to_transport)
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        persistent: bool,
    ) -> Result<(), TransportError> {
        let delivery_mode = if persistent { 2 } else { 1 };
        // Publish to the default exchange; the routing key is the queue
        // name. The returned confirm promise is intentionally dropped.
        self.basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default().with_delivery_mode(delivery_mode),
        )
        .await
        .map(|_| ())
        .map_err(to_transport)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Channel::close(self, REPLY_SUCCESS, "shutdown")
            .await
            .map_err(to_transport)
    }
}

fn to_transport(err: lapin::Error) -> TransportError {
    TransportError::new(err.to_string())
}

//! Broker connection lifecycle supervision and publishing.
//!
//! `ConnectionManager` owns one logical broker connection: it dials the
//! broker, watches transport lifecycle events for connection loss, and runs
//! a supervisory reconnect loop with exponential backoff. Publishing is
//! best-effort and fail-fast; callers own their retry policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RabbitMqConfig;
use crate::error::{ConnectionError, PublishError};
use crate::state::{ConnectionState, ConnectionStatus, HealthStatus};
use crate::transport::{
    AmqpConnector, BrokerChannel, BrokerConnection, BrokerConnector, BrokerHandle, LifecycleEvent,
};

/// Supervises a single logical broker connection and publishes to it.
///
/// Cheap to clone; all clones share the same connection and state.
/// Construction performs no network I/O; call [`connect`](Self::connect)
/// once at startup.
pub struct ConnectionManager<C: BrokerConnector = AmqpConnector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: BrokerConnector> {
    connector: C,
    config: RabbitMqConfig,
    state: Mutex<ConnectionState>,
    connection: Mutex<Option<C::Connection>>,
    channel: Mutex<Option<C::Channel>>,
    /// Supervisory reconnect task; at most one alive at a time.
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every successful connect so watchers of replaced
    /// connections cannot trigger loss handling.
    epoch: AtomicU64,
    /// One-way shutdown latch.
    shutdown: watch::Sender<bool>,
}

impl<C: BrokerConnector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionManager<AmqpConnector> {
    /// Manager for a real RabbitMQ broker.
    pub fn new(config: RabbitMqConfig) -> Self {
        Self::with_connector(config, AmqpConnector)
    }
}

impl<C: BrokerConnector> ConnectionManager<C> {
    /// Manager over an arbitrary transport.
    pub fn with_connector(config: RabbitMqConfig, connector: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state: Mutex::new(ConnectionState::new()),
                connection: Mutex::new(None),
                channel: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                epoch: AtomicU64::new(0),
                shutdown: watch::Sender::new(false),
            }),
        }
    }

    /// Establish the broker connection and assert the default durable
    /// queue.
    ///
    /// On failure the error is returned without scheduling a retry: a
    /// failed first-time connect is the startup caller's problem, and
    /// during reconnection the supervisory loop owns scheduling.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        if self.is_shutting_down() {
            return Err(ConnectionError::ShutDown);
        }

        let is_reconnect = {
            let mut state = self.state();
            let was_reconnecting = state.status == ConnectionStatus::Reconnecting;
            state.status = ConnectionStatus::Connecting;
            was_reconnecting
        };

        info!(
            url = %self.inner.config.url,
            reconnect = is_reconnect,
            "rabbitmq_connecting"
        );

        match self.try_connect().await {
            Ok(handle) => {
                let BrokerHandle {
                    connection,
                    channel,
                    events,
                } = handle;

                *lock(&self.inner.connection) = Some(connection);
                *lock(&self.inner.channel) = Some(channel);
                self.state().mark_connected();

                let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                self.spawn_lifecycle_watcher(events, epoch);

                info!(
                    queue = %self.inner.config.queue,
                    reconnect = is_reconnect,
                    "rabbitmq_connected"
                );
                Ok(())
            }
            Err(err) => {
                let status = if is_reconnect {
                    ConnectionStatus::Reconnecting
                } else {
                    ConnectionStatus::Disconnected
                };
                self.state().mark_failure(status);

                warn!(
                    error = %err,
                    reconnect = is_reconnect,
                    "rabbitmq_connection_failed"
                );
                Err(err)
            }
        }
    }

    async fn try_connect(
        &self,
    ) -> Result<BrokerHandle<C::Connection, C::Channel>, ConnectionError> {
        let limit = Duration::from_millis(self.inner.config.connect_timeout_ms);
        let handle = tokio::time::timeout(
            limit,
            self.inner.connector.connect(&self.inner.config.url),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(limit))?
        .map_err(ConnectionError::ConnectFailed)?;

        handle
            .channel
            .ensure_queue(&self.inner.config.queue)
            .await
            .map_err(|source| ConnectionError::QueueDeclareFailed {
                queue: self.inner.config.queue.clone(),
                source,
            })?;

        Ok(handle)
    }

    /// Serialize `message` as JSON and publish it persistently to `queue`.
    ///
    /// Fails fast when no channel exists (never connected, reconnecting, or
    /// shut down). Never retried or queued internally.
    pub async fn publish<T: Serialize>(
        &self,
        queue: &str,
        message: &T,
    ) -> Result<(), PublishError> {
        let Some(channel) = lock(&self.inner.channel).clone() else {
            warn!(queue, "rabbitmq_publish_failed");
            return Err(PublishError::ChannelNotInitialized);
        };

        let payload = serde_json::to_vec(message)?;

        if let Err(source) = channel.ensure_queue(queue).await {
            warn!(queue, bytes = payload.len(), error = %source, "rabbitmq_publish_failed");
            return Err(PublishError::QueueDeclareFailed {
                queue: queue.to_string(),
                source,
            });
        }

        match channel.publish(queue, &payload, true).await {
            Ok(()) => {
                debug!(queue, bytes = payload.len(), "rabbitmq_published");
                Ok(())
            }
            Err(source) => {
                warn!(queue, bytes = payload.len(), error = %source, "rabbitmq_publish_failed");
                Err(PublishError::SendFailed {
                    queue: queue.to_string(),
                    source,
                })
            }
        }
    }

    /// Point-in-time health snapshot; safe to call from anywhere.
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::from_state(&self.state(), &self.inner.config.retry)
    }

    /// Current channel handle, if connected. Read-only legacy interop
    /// accessor; consumers must not drive the channel's lifecycle.
    pub fn channel(&self) -> Option<C::Channel> {
        lock(&self.inner.channel).clone()
    }

    /// Whether `close()` has been called. One-way latch.
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Shut the manager down: cancel any pending retry, close channel and
    /// connection, and settle into `Disconnected`.
    ///
    /// Best-effort: close failures are logged, never returned. A closed
    /// manager stays closed; construct a new one to reconnect.
    pub async fn close(&self) {
        info!("rabbitmq_shutdown_initiated");

        // Latch before anything else so no reconnect work can start, then
        // cancel any pending retry timer synchronously.
        self.inner.shutdown.send_replace(true);
        if let Some(task) = lock(&self.inner.reconnect_task).take() {
            task.abort();
        }

        let channel = lock(&self.inner.channel).take();
        if let Some(channel) = channel {
            if let Err(err) = channel.close().await {
                warn!(error = %err, "rabbitmq_channel_close_failed");
            }
        }

        let connection = lock(&self.inner.connection).take();
        if let Some(connection) = connection {
            if let Err(err) = connection.close().await {
                warn!(error = %err, "rabbitmq_connection_close_failed");
            }
        }

        self.state().status = ConnectionStatus::Disconnected;
        info!("rabbitmq_shutdown_complete");
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        lock(&self.inner.state)
    }

    /// Watch one connection's lifecycle events until it is lost, replaced,
    /// or shutdown begins.
    fn spawn_lifecycle_watcher(
        &self,
        mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
        epoch: u64,
    ) {
        let manager = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                    event = events.recv() => match event {
                        Some(LifecycleEvent::Error { message }) => {
                            warn!(error = %message, "rabbitmq_connection_error");
                            manager.handle_connection_loss(&message, epoch);
                            return;
                        }
                        Some(LifecycleEvent::Closed) | None => {
                            warn!("rabbitmq_connection_closed");
                            manager.handle_connection_loss("connection closed", epoch);
                            return;
                        }
                        Some(LifecycleEvent::Blocked { reason }) => {
                            warn!(reason = %reason, "rabbitmq_connection_blocked");
                        }
                        Some(LifecycleEvent::Unblocked) => {
                            info!("rabbitmq_connection_unblocked");
                        }
                    }
                }
            }
        });
    }

    /// React to an asynchronous connection loss.
    ///
    /// Guarded so overlapping error/close notifications, stale watchers of
    /// replaced connections, and shutdown never start a second reconnect
    /// loop.
    fn handle_connection_loss(&self, cause: &str, epoch: u64) {
        if self.is_shutting_down() {
            return;
        }
        if epoch != self.inner.epoch.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut state = self.state();
            if state.status == ConnectionStatus::Reconnecting {
                return;
            }
            state.mark_failure(ConnectionStatus::Reconnecting);
        }

        // The dead handles are useless now; drop them so publish fails
        // fast while the loop recovers.
        lock(&self.inner.channel).take();
        lock(&self.inner.connection).take();

        warn!(cause = %cause, "rabbitmq_connection_lost");
        self.spawn_reconnect_loop();
    }

    fn spawn_reconnect_loop(&self) {
        let mut slot = lock(&self.inner.reconnect_task);
        // No overlapping retry chains: a prior loop (and its pending
        // timer) dies before the new one starts.
        if let Some(task) = slot.take() {
            task.abort();
        }
        let manager = self.clone();
        *slot = Some(tokio::spawn(async move {
            manager.run_reconnect_loop().await;
        }));
    }

    /// Supervisory loop: sleep with backoff, attempt, repeat until
    /// connected, exhausted, or shut down. Failures here are observable
    /// only through logs and `health_status()`.
    async fn run_reconnect_loop(self) {
        let retry = &self.inner.config.retry;
        let mut shutdown_rx = self.inner.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            let attempt = self.state().reconnect_attempts;
            if retry.is_exhausted(attempt) {
                {
                    let mut state = self.state();
                    state.status = ConnectionStatus::Disconnected;
                    state.exhausted = true;
                }
                error!(
                    attempts = attempt,
                    max_attempts = retry.max_attempts,
                    "rabbitmq_reconnect_failed_max_attempts"
                );
                return;
            }

            let delay = retry.delay_for_attempt(attempt);
            info!(
                attempt = attempt + 1,
                max_attempts = %retry.max_attempts_display(),
                delay_ms = delay.as_millis() as u64,
                "rabbitmq_reconnect_scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let attempt = {
                let mut state = self.state();
                state.reconnect_attempts += 1;
                state.reconnect_attempts
            };
            info!(
                attempt,
                max_attempts = %retry.max_attempts_display(),
                "rabbitmq_reconnect_attempt"
            );

            match self.connect().await {
                Ok(()) => {
                    info!(attempt, "rabbitmq_reconnect_success");
                    return;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "rabbitmq_reconnect_attempt_failed");
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

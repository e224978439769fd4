//! Connection lifecycle state and health reporting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backoff::RetryConfig;

/// Lifecycle phase of the managed broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Mutable connection state, owned by the manager and mutated only behind
/// its lock.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub status: ConnectionStatus,
    /// Set on every successful connection establishment.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Set on every connect failure or connection loss.
    pub last_error_at: Option<DateTime<Utc>>,
    /// Reconnection attempts since the last successful connection; gates
    /// the retry ceiling.
    pub reconnect_attempts: u32,
    /// Consecutive connect failures or connection losses; observability
    /// only.
    pub consecutive_failures: u32,
    /// Latched when the retry ceiling was reached; the manager will not
    /// self-heal past this point.
    pub exhausted: bool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_connected_at: None,
            last_error_at: None,
            reconnect_attempts: 0,
            consecutive_failures: 0,
            exhausted: false,
        }
    }

    /// Record a successful connection.
    pub fn mark_connected(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.last_connected_at = Some(Utc::now());
        self.reconnect_attempts = 0;
        self.consecutive_failures = 0;
        self.exhausted = false;
    }

    /// Record a connect failure or connection loss.
    pub fn mark_failure(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.last_error_at = Some(Utc::now());
        self.consecutive_failures += 1;
    }
}

/// Point-in-time health snapshot, suitable for a readiness endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: ConnectionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub consecutive_failures: u32,
    /// Human-readable rendering of `status`.
    pub message: String,
}

impl HealthStatus {
    pub(crate) fn from_state(state: &ConnectionState, retry: &RetryConfig) -> Self {
        let message = match state.status {
            ConnectionStatus::Connected => "connected to broker".to_string(),
            ConnectionStatus::Connecting => "establishing broker connection".to_string(),
            ConnectionStatus::Reconnecting => format!(
                "reconnecting to broker (attempt {}/{})",
                state.reconnect_attempts,
                retry.max_attempts_display()
            ),
            ConnectionStatus::Disconnected if state.exhausted => format!(
                "disconnected: reconnection attempts exhausted after {} attempts",
                state.reconnect_attempts
            ),
            ConnectionStatus::Disconnected => "disconnected from broker".to_string(),
        };

        Self {
            status: state.status,
            last_connected_at: state.last_connected_at,
            last_error_at: state.last_error_at,
            reconnect_attempts: state.reconnect_attempts,
            consecutive_failures: state.consecutive_failures,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_names() {
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn mark_connected_resets_counters() {
        let mut state = ConnectionState::new();
        state.reconnect_attempts = 4;
        state.consecutive_failures = 7;
        state.exhausted = true;

        state.mark_connected();

        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.exhausted);
        assert!(state.last_connected_at.is_some());
    }

    #[test]
    fn reconnecting_message_shows_attempt_and_ceiling() {
        let mut state = ConnectionState::new();
        state.status = ConnectionStatus::Reconnecting;
        state.reconnect_attempts = 3;

        let retry = RetryConfig::default();
        let health = HealthStatus::from_state(&state, &retry);
        assert_eq!(health.message, "reconnecting to broker (attempt 3/10)");

        let unlimited = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        let health = HealthStatus::from_state(&state, &unlimited);
        assert_eq!(health.message, "reconnecting to broker (attempt 3/∞)");
    }

    #[test]
    fn exhausted_message_mentions_exhaustion() {
        let mut state = ConnectionState::new();
        state.status = ConnectionStatus::Disconnected;
        state.reconnect_attempts = 10;
        state.exhausted = true;

        let health = HealthStatus::from_state(&state, &RetryConfig::default());
        assert!(health.message.contains("exhausted"));
    }
}

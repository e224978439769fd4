//! Exponential backoff with jitter for broker reconnection.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Retry tuning for the reconnection loop.
///
/// Immutable once the manager is constructed. `max_attempts == 0` means
/// retry forever.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of reconnection attempts (0 = unlimited).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first reconnection attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Ceiling on the delay between attempts, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for each successive attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Randomize each delay by ±25% to avoid synchronized retry storms.
    #[serde(default = "default_jitter_enabled")]
    pub jitter_enabled: bool,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    32_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_enabled() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_enabled: default_jitter_enabled(),
        }
    }
}

impl RetryConfig {
    /// True once `attempts` has reached the configured ceiling.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }

    /// Delay before the given (zero-based) reconnection attempt.
    ///
    /// Attempt 0 uses `initial_delay_ms`; each successive attempt grows by
    /// `backoff_multiplier`, capped at `max_delay_ms`. With jitter enabled
    /// the delay is scaled by a uniform factor in [0.75, 1.25] and floored
    /// to whole milliseconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = (self.initial_delay_ms as f64)
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = raw.min(self.max_delay_ms as f64);

        let millis = if self.jitter_enabled {
            let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
            (capped * factor).floor()
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }

    /// Render the attempt ceiling for logs and health messages.
    pub fn max_attempts_display(&self) -> String {
        if self.max_attempts == 0 {
            "∞".to_string()
        } else {
            self.max_attempts.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: bool) -> RetryConfig {
        RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 32_000,
            backoff_multiplier: 2.0,
            jitter_enabled: jitter,
        }
    }

    #[test]
    fn first_delay_is_initial_delay() {
        assert_eq!(
            config(false).delay_for_attempt(0),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn delays_are_monotonic_and_capped() {
        let cfg = config(false);
        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = cfg.delay_for_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            assert!(delay <= Duration::from_millis(cfg.max_delay_ms));
            previous = delay;
        }
        assert_eq!(cfg.delay_for_attempt(19), Duration::from_millis(32_000));
    }

    #[test]
    fn doubling_sequence_without_jitter() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 800,
            backoff_multiplier: 2.0,
            jitter_enabled: false,
        };
        let delays: Vec<u64> = (0..5)
            .map(|a| cfg.delay_for_attempt(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 800]);
    }

    #[test]
    fn jitter_stays_within_quarter_band() {
        let cfg = config(true);
        for attempt in 0..8 {
            let raw = cfg.delay_for_attempt_raw(attempt);
            for _ in 0..200 {
                let delay = cfg.delay_for_attempt(attempt).as_millis() as f64;
                assert!(
                    delay >= (raw * 0.75).floor() && delay <= raw * 1.25,
                    "attempt {attempt}: {delay}ms outside [{}, {}]",
                    raw * 0.75,
                    raw * 1.25
                );
            }
        }
    }

    #[test]
    fn exhaustion_check() {
        let cfg = config(false);
        assert!(!cfg.is_exhausted(9));
        assert!(cfg.is_exhausted(10));

        let unlimited = RetryConfig {
            max_attempts: 0,
            ..config(false)
        };
        assert!(!unlimited.is_exhausted(u32::MAX));
    }

    #[test]
    fn unlimited_attempts_render_as_infinity() {
        let unlimited = RetryConfig {
            max_attempts: 0,
            ..config(false)
        };
        assert_eq!(unlimited.max_attempts_display(), "∞");
        assert_eq!(config(false).max_attempts_display(), "10");
    }

    impl RetryConfig {
        fn delay_for_attempt_raw(&self, attempt: u32) -> f64 {
            ((self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32))
                .min(self.max_delay_ms as f64)
        }
    }
}

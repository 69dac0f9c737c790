//! Circuit breaker guarding one logical outbound client.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N terminal failures]--> OPEN (rejecting) --[cooldown elapsed]--> CLOSED
//! ```
//!
//! While open, calls are rejected before any network attempt. Once the
//! cooldown has elapsed the breaker is cleared lazily on the next check.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive terminal failures before opening the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Invariant: `open_until.is_some()` implies `consecutive_failures >= threshold`.
#[derive(Debug, Default)]
struct CircuitBreakerInner {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    last_error_message: Option<String>,
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub time_until_closed: Option<Duration>,
}

/// Thread-safe circuit breaker. Clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, clearing an expired open circuit first.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_close(&mut inner);
        if inner.open_until.is_some() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_close(&mut inner);

        let time_until_closed = inner
            .open_until
            .map(|until| until.saturating_duration_since(Instant::now()));

        CircuitBreakerStats {
            name: self.name.clone(),
            state: if inner.open_until.is_some() {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error_message.clone(),
            time_until_closed,
        }
    }

    /// Pre-flight check. Returns [`AppError::CircuitOpen`] while the cooldown
    /// is running; clears the circuit once it has elapsed.
    pub fn check(&self) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        self.maybe_close(&mut inner);

        match inner.open_until {
            Some(until) => Err(AppError::CircuitOpen {
                name: self.name.clone(),
                retry_after: until.saturating_duration_since(Instant::now()),
            }),
            None => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        if inner.consecutive_failures > 0 {
            tracing::debug!(
                circuit = %self.name,
                previous_failures = inner.consecutive_failures,
                "Circuit breaker failure count reset"
            );
        }
        inner.consecutive_failures = 0;
        inner.open_until = None;
        inner.last_error_message = None;
    }

    /// Record one terminal failure. Opens the circuit once the threshold is reached.
    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_error_message = Some(error.to_string());

        if inner.consecutive_failures >= self.config.failure_threshold {
            if inner.open_until.is_none() {
                tracing::warn!(
                    circuit = %self.name,
                    failures = inner.consecutive_failures,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    error = %error,
                    "Circuit breaker opening after {} consecutive failures",
                    inner.consecutive_failures
                );
            }
            inner.open_until = Some(Instant::now() + self.config.cooldown);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        *inner = CircuitBreakerInner::default();
    }

    fn maybe_close(&self, inner: &mut CircuitBreakerInner) {
        if let Some(until) = inner.open_until
            && Instant::now() >= until
        {
            tracing::info!(circuit = %self.name, "Circuit breaker cooldown elapsed, closing");
            *inner = CircuitBreakerInner::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> AppError {
        AppError::NetworkError("test".into())
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        for _ in 0..4 {
            cb.record_failure(&failure());
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure(&failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.check(), Err(AppError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        for _ in 0..4 {
            cb.record_failure(&failure());
        }
        cb.record_success();
        for _ in 0..4 {
            cb.record_failure(&failure());
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_closes_after_cooldown() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(300),
        };
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&failure());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_reports_retry_after() {
        let cb = CircuitBreaker::new(
            "grants",
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(60),
            },
        );
        cb.record_failure(&failure());

        match cb.check() {
            Err(AppError::CircuitOpen { name, retry_after }) => {
                assert_eq!(name, "grants");
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(
            cb.stats().time_until_closed,
            Some(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );

        cb.record_failure(&failure());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.stats().last_error.is_none());
    }
}

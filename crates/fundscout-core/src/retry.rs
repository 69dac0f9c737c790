//! Retry policy with exponential backoff and jitter.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Transport failure classes a [`RetryPolicy`] can opt into retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// Connection refused, reset, DNS failure.
    Connection,
    /// Any other failure while sending the request or reading the body.
    Request,
}

/// Immutable retry configuration for one client.
///
/// `max_retries` is the total number of attempts made for one call.
/// Delay schedule: `min(max_delay, initial_delay * backoff_factor^(attempt - 1))`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    retryable_status_codes: HashSet<u16>,
    retryable_errors: HashSet<TransportErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retryable_status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retryable_errors: [TransportErrorKind::Timeout, TransportErrorKind::Connection]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Build a validated policy.
    ///
    /// Fails with [`AppError::ConfigError`] if `initial_delay` is zero,
    /// `max_delay < initial_delay`, or `backoff_factor < 1`.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self, AppError> {
        if initial_delay.is_zero() {
            return Err(AppError::ConfigError(
                "retry initial delay must be greater than zero".into(),
            ));
        }
        if max_delay < initial_delay {
            return Err(AppError::ConfigError(format!(
                "retry max delay ({}ms) must be >= initial delay ({}ms)",
                max_delay.as_millis(),
                initial_delay.as_millis()
            )));
        }
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(AppError::ConfigError(format!(
                "retry backoff factor must be >= 1, got {backoff_factor}"
            )));
        }

        Ok(Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor,
            ..Self::default()
        })
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_retryable_errors(
        mut self,
        kinds: impl IntoIterator<Item = TransportErrorKind>,
    ) -> Self {
        self.retryable_errors = kinds.into_iter().collect();
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Number of attempts actually made per call. A policy of zero still
    /// issues the call once.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_enabled(&self) -> bool {
        self.jitter
    }

    /// Un-jittered delay after the given (1-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = seconds.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay actually slept: jittered into `[0.5 * delay, delay]` when enabled.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }
        delay.mul_f64(0.5 + fastrand::f64() * 0.5)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Whether a failure is retryable by class, ignoring the attempt budget.
    pub fn is_retryable_error(&self, error: &AppError) -> bool {
        match error {
            AppError::HttpStatus { status, .. } => self.is_retryable_status(*status),
            other => other
                .transport_kind()
                .is_some_and(|kind| self.retryable_errors.contains(&kind)),
        }
    }

    /// Whether another attempt should follow the failed `attempt`.
    pub fn should_retry(&self, error: &AppError, attempt: u32) -> bool {
        attempt < self.max_attempts() && self.is_retryable_error(error)
    }
}

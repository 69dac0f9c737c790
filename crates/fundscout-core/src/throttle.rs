//! Per-source request throttling for polite scraping.
//!
//! One [`RateLimiter`] is created per scraper instance from the source's
//! [`ThrottleConfig`]. Before each fetch the scraper awaits
//! [`RateLimiter::acquire`], which enforces:
//!
//! - a fixed minimum delay since the previous request, plus uniform jitter;
//! - every `pause_every`-th request, an extra randomized pause in
//!   `[pause_min, pause_max]`.
//!
//! All waits are `tokio::time::sleep`, so only the calling task is suspended.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for one source's limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    pub jitter: Duration,

    /// Every Nth request takes an extra pause. `0` disables.
    pub pause_every: u32,

    pub pause_min: Duration,
    pub pause_max: Duration,
}

impl ThrottleConfig {
    /// Create a config with the given inter-request delay, no jitter, no pauses.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
            pause_every: 0,
            pause_min: Duration::ZERO,
            pause_max: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_pause(mut self, every: u32, min: Duration, max: Duration) -> Self {
        self.pause_every = every;
        self.pause_min = min;
        self.pause_max = max.max(min);
        self
    }

    /// Effective delay for a single wait (delay + random jitter).
    fn effective_delay(&self) -> Duration {
        self.delay + random_between(Duration::ZERO, self.jitter)
    }

    fn pause_duration(&self) -> Duration {
        random_between(self.pause_min, self.pause_max)
    }

    fn is_pause_request(&self, request_number: u64) -> bool {
        self.pause_every > 0 && request_number % u64::from(self.pause_every) == 0
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 500ms jitter, a 3-8 second pause every 5th request.
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
            .with_jitter(Duration::from_millis(500))
            .with_pause(5, Duration::from_secs(3), Duration::from_secs(8))
    }
}

/// Counters exposed in run-log metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    pub requests: u64,
    pub pauses: u64,
    pub total_wait_ms: u64,
}

#[derive(Debug, Default)]
struct LimiterState {
    last_request: Option<Instant>,
    stats: ThrottleStats,
}

/// Serialises one scraper's requests and spaces them out.
///
/// Clones share state. The lock is held while sleeping so concurrent callers
/// on the same limiter queue up instead of bursting.
#[derive(Clone)]
pub struct RateLimiter {
    config: ThrottleConfig,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(LimiterState::default())),
        }
    }

    /// Limiter that never waits. Useful for tests and one-off fetches.
    pub fn unthrottled() -> Self {
        Self::new(ThrottleConfig::new(Duration::ZERO))
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Wait until the next request may be issued. Returns the time waited.
    pub async fn acquire(&self) -> Duration {
        let mut state = self.state.lock().await;
        state.stats.requests += 1;
        let request_number = state.stats.requests;

        let mut wait = match state.last_request {
            Some(last) => self.config.effective_delay().saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };

        if self.config.is_pause_request(request_number) {
            let pause = self.config.pause_duration();
            state.stats.pauses += 1;
            tracing::debug!(
                request = request_number,
                pause_ms = pause.as_millis() as u64,
                "Self-throttle pause"
            );
            wait += pause;
        }

        if !wait.is_zero() {
            tracing::trace!(sleep_ms = wait.as_millis() as u64, "Throttling request");
            tokio::time::sleep(wait).await;
        }

        state.stats.total_wait_ms += wait.as_millis() as u64;
        state.last_request = Some(Instant::now());
        wait
    }

    pub async fn stats(&self) -> ThrottleStats {
        self.state.lock().await.stats
    }
}

fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span_ms = (max - min).as_millis() as u64;
    min + Duration::from_millis(fastrand::u64(0..=span_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_delay_without_jitter() {
        let config = ThrottleConfig::new(Duration::from_secs(1));
        assert_eq!(config.effective_delay(), Duration::from_secs(1));
    }

    #[test]
    fn effective_delay_with_jitter_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = config.effective_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn pause_duration_is_bounded() {
        let config = ThrottleConfig::new(Duration::ZERO).with_pause(
            3,
            Duration::from_secs(2),
            Duration::from_secs(5),
        );
        for _ in 0..100 {
            let p = config.pause_duration();
            assert!(p >= Duration::from_secs(2) && p <= Duration::from_secs(5));
        }
        assert!(!config.is_pause_request(1));
        assert!(!config.is_pause_request(2));
        assert!(config.is_pause_request(3));
        assert!(config.is_pause_request(6));
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_is_not_delayed() {
        let limiter = RateLimiter::new(ThrottleConfig::new(Duration::from_secs(2)));
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_requests_are_spaced() {
        let limiter = RateLimiter::new(ThrottleConfig::new(Duration::from_millis(500)));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(start.elapsed(), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn every_nth_request_pauses() {
        let limiter = RateLimiter::new(ThrottleConfig::new(Duration::ZERO).with_pause(
            2,
            Duration::from_secs(3),
            Duration::from_secs(3),
        ));

        let waits = [
            limiter.acquire().await,
            limiter.acquire().await,
            limiter.acquire().await,
            limiter.acquire().await,
        ];

        assert_eq!(
            waits,
            [
                Duration::ZERO,
                Duration::from_secs(3),
                Duration::ZERO,
                Duration::from_secs(3)
            ]
        );
        let stats = limiter.stats().await;
        assert_eq!(stats.requests, 4);
        assert_eq!(stats.pauses, 2);
        assert_eq!(stats.total_wait_ms, 6_000);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_counts_toward_delay() {
        let limiter = RateLimiter::new(ThrottleConfig::new(Duration::from_secs(1)));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(limiter.acquire().await, Duration::from_millis(400));
    }

    #[test]
    fn default_config_is_sensible() {
        let config = ThrottleConfig::default();
        assert_eq!(config.delay, Duration::from_secs(1));
        assert_eq!(config.jitter, Duration::from_millis(500));
        assert_eq!(config.pause_every, 5);
    }
}

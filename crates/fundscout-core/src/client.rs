//! Resilient outbound HTTP client.
//!
//! Wraps any [`HttpTransport`] with, in order:
//!
//! 1. URL resolution against the client's base URL
//! 2. a domain allow-list guard (no network call on rejection)
//! 3. a circuit breaker pre-flight check (no network call while open)
//! 4. a bounded retry loop with exponential backoff and jitter
//! 5. aggregated [`ConnectionMetrics`]

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::allowlist::DomainAllowList;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::context::ErrorWindow;
use crate::error::AppError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestSpec};
use crate::metrics::{ConnectionMetrics, MetricsRecorder};
use crate::retry::RetryPolicy;

/// Per-client settings, usually derived from [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
    pub allow_list: DomainAllowList,
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn new(allow_list: DomainAllowList) -> Self {
        Self {
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            allow_list,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub name: String,
    pub status: HealthStatus,
    pub circuit_open: bool,
    pub error: Option<String>,
}

/// HTTP client for one logical external service.
///
/// Owns its circuit breaker and metrics exclusively; two clients never share
/// them. Safe to share behind an `Arc` across tasks.
pub struct ResilientClient<T: HttpTransport> {
    name: String,
    base_url: String,
    transport: T,
    settings: ClientSettings,
    breaker: CircuitBreaker,
    metrics: MetricsRecorder,
    error_window: Option<ErrorWindow>,
}

impl<T: HttpTransport> ResilientClient<T> {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        transport: T,
        settings: ClientSettings,
    ) -> Self {
        let name = name.into();
        let breaker = CircuitBreaker::new(name.clone(), settings.circuit.clone());
        Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            settings,
            breaker,
            metrics: MetricsRecorder::new(),
            error_window: None,
        }
    }

    /// Report terminal failures into a shared rolling error window.
    pub fn with_error_window(mut self, window: ErrorWindow) -> Self {
        self.error_window = Some(window);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        let mut snapshot = self.metrics.snapshot();
        snapshot.consecutive_failures = self.breaker.stats().consecutive_failures;
        snapshot
    }

    /// Clear metrics and circuit state.
    pub fn reset(&self) {
        self.metrics.reset();
        self.breaker.reset();
    }

    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<HttpResponse, AppError> {
        let spec = params
            .iter()
            .fold(RequestSpec::get(endpoint), |spec, (k, v)| {
                spec.with_param(*k, *v)
            });
        self.execute(spec).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<HttpResponse, AppError> {
        self.execute(RequestSpec::new(HttpMethod::Post, endpoint).with_body(body))
            .await
    }

    pub async fn put(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<HttpResponse, AppError> {
        self.execute(RequestSpec::new(HttpMethod::Put, endpoint).with_body(body))
            .await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<HttpResponse, AppError> {
        self.execute(RequestSpec::new(HttpMethod::Delete, endpoint))
            .await
    }

    /// Lightweight GET against the base URL.
    pub async fn health_check(&self) -> HealthReport {
        let result = self.execute(RequestSpec::get("")).await;
        let circuit_open = self.breaker.state() == CircuitState::Open;

        match result {
            Ok(_) => HealthReport {
                name: self.name.clone(),
                status: HealthStatus::Healthy,
                circuit_open,
                error: None,
            },
            Err(e) => HealthReport {
                name: self.name.clone(),
                status: HealthStatus::Unhealthy,
                circuit_open,
                error: Some(e.to_string()),
            },
        }
    }

    /// Execute a call with allow-list, circuit breaker and retry handling.
    pub async fn execute(&self, spec: RequestSpec) -> Result<HttpResponse, AppError> {
        let url = self.resolve_url(&spec.endpoint, &spec.params)?;

        if let Err(e) = self.settings.allow_list.check_url(&url) {
            tracing::warn!(client = %self.name, url = %url, "Blocked request to non-allow-listed domain");
            return Err(e);
        }

        self.breaker.check()?;

        let endpoint_key = url.path().to_string();
        let request = HttpRequest {
            method: spec.method,
            url: url.to_string(),
            headers: spec.headers,
            body: spec.body,
            timeout: spec.timeout.unwrap_or(self.settings.timeout),
        };

        let started = Instant::now();
        let mut attempt: u32 = 1;
        loop {
            let failure = match self.transport.send(request.clone()).await {
                Ok(response) if response.is_success() => {
                    self.metrics.record_success(&endpoint_key, started.elapsed());
                    self.breaker.record_success();
                    tracing::debug!(
                        client = %self.name,
                        method = %request.method,
                        url = %request.url,
                        status = response.status,
                        attempt,
                        "Request succeeded"
                    );
                    return Ok(response);
                }
                Ok(response) => AppError::HttpStatus {
                    status: response.status,
                    url: request.url.clone(),
                },
                Err(e) => e,
            };

            if self.settings.retry.should_retry(&failure, attempt) {
                let delay = self.settings.retry.backoff_for_attempt(attempt);
                self.metrics.record_retry();
                tracing::warn!(
                    client = %self.name,
                    url = %request.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            self.metrics.record_failure(&endpoint_key, started.elapsed());
            self.breaker.record_failure(&failure);
            if let Some(window) = &self.error_window {
                window.record(&self.name, &failure);
            }
            tracing::warn!(
                client = %self.name,
                url = %request.url,
                attempts = attempt,
                error = %failure,
                "Request failed"
            );
            return Err(failure);
        }
    }

    /// The absolute URL a GET for `endpoint` would hit.
    pub fn url_for(&self, endpoint: &str) -> Result<Url, AppError> {
        self.resolve_url(endpoint, &[])
    }

    /// Base + endpoint, or the endpoint verbatim when already absolute.
    fn resolve_url(&self, endpoint: &str, params: &[(String, String)]) -> Result<Url, AppError> {
        let raw = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        };

        let mut url =
            Url::parse(&raw).map_err(|e| AppError::HttpError(format!("Invalid URL '{raw}': {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }
}

//! Process-wide scraping context.
//!
//! [`ScrapeContext`] is built once at startup and handed to whatever needs
//! outbound HTTP. It owns the immutable [`AppConfig`], the named
//! [`ClientRegistry`] and a rolling [`ErrorWindow`] of recent failures.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use serde::Serialize;

use crate::client::{ClientSettings, ResilientClient};
use crate::config::{AppConfig, ScraperSourceConfig};
use crate::error::AppError;
use crate::http::HttpTransport;

/// One terminal request failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub client: String,
    pub message: String,
}

/// Bounded, time-windowed log of recent terminal failures across clients.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ErrorWindow {
    capacity: usize,
    window: TimeDelta,
    entries: Arc<Mutex<VecDeque<ErrorRecord>>>,
}

impl ErrorWindow {
    pub const DEFAULT_CAPACITY: usize = 200;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned error window mutex");
            poisoned.into_inner()
        })
    }

    pub fn record(&self, client: &str, error: &AppError) {
        self.record_at(client, error.to_string(), Utc::now());
    }

    fn record_at(&self, client: &str, message: String, at: DateTime<Utc>) {
        let mut entries = self.lock();
        entries.push_back(ErrorRecord {
            at,
            client: client.to_string(),
            message,
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Self::prune(&mut entries, self.window, at);
    }

    fn prune(entries: &mut VecDeque<ErrorRecord>, window: TimeDelta, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(window) else {
            return;
        };
        while entries.front().is_some_and(|e| e.at < cutoff) {
            entries.pop_front();
        }
    }

    /// Failures still inside the window, oldest first.
    pub fn recent(&self) -> Vec<ErrorRecord> {
        let mut entries = self.lock();
        Self::prune(&mut entries, self.window, Utc::now());
        entries.iter().cloned().collect()
    }

    /// Failure count per client name inside the window.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.recent() {
            *counts.entry(record.client).or_insert(0) += 1;
        }
        counts
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for ErrorWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_WINDOW)
    }
}

/// Named, memoized [`ResilientClient`]s.
///
/// The first call for a name creates the client; concurrent first calls
/// initialise it once and all receive the same instance. A client's base
/// URL is fixed by that first call.
#[derive(Clone)]
pub struct ClientRegistry<T: HttpTransport + 'static> {
    transport: T,
    settings: ClientSettings,
    errors: ErrorWindow,
    clients: Cache<String, Arc<ResilientClient<T>>>,
}

impl<T: HttpTransport + 'static> ClientRegistry<T> {
    pub fn new(transport: T, settings: ClientSettings, errors: ErrorWindow) -> Self {
        Self {
            transport,
            settings,
            errors,
            clients: Cache::builder().build(),
        }
    }

    /// Get the client registered under `name`, creating it on first use.
    pub async fn client(&self, name: &str, base_url: &str) -> Arc<ResilientClient<T>> {
        self.clients
            .get_with(name.to_string(), async {
                tracing::debug!(client = %name, %base_url, "Creating resilient client");
                Arc::new(
                    ResilientClient::new(
                        name,
                        base_url,
                        self.transport.clone(),
                        self.settings.clone(),
                    )
                    .with_error_window(self.errors.clone()),
                )
            })
            .await
    }

    /// Existing client for `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Arc<ResilientClient<T>>> {
        self.clients.get(name).await
    }

    /// Registered clients, sorted by name.
    pub fn clients(&self) -> Vec<Arc<ResilientClient<T>>> {
        let mut clients: Vec<_> = self.clients.iter().map(|(_, client)| client).collect();
        clients.sort_by(|a, b| a.name().cmp(b.name()));
        clients
    }

    pub fn names(&self) -> Vec<String> {
        self.clients()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Clear metrics and circuit state for one client, or all when `name`
    /// is `None`. Returns how many clients were reset.
    pub async fn reset(&self, name: Option<&str>) -> usize {
        match name {
            Some(name) => match self.get(name).await {
                Some(client) => {
                    client.reset();
                    1
                }
                None => 0,
            },
            None => {
                let clients = self.clients();
                for client in &clients {
                    client.reset();
                }
                clients.len()
            }
        }
    }
}

/// Everything a scraping process shares: config, clients and recent errors.
#[derive(Clone)]
pub struct ScrapeContext<T: HttpTransport + 'static> {
    config: Arc<AppConfig>,
    registry: ClientRegistry<T>,
    errors: ErrorWindow,
}

impl<T: HttpTransport + 'static> ScrapeContext<T> {
    pub fn new(config: AppConfig, transport: T) -> Self {
        let errors = ErrorWindow::default();
        let registry = ClientRegistry::new(transport, config.client_settings(), errors.clone());
        tracing::debug!(
            sources = config.catalog.sources.len(),
            allowed_domains = config.catalog.allowed_domains.len(),
            "Scrape context initialised"
        );
        Self {
            config: Arc::new(config),
            registry,
            errors,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry<T> {
        &self.registry
    }

    pub fn errors(&self) -> &ErrorWindow {
        &self.errors
    }

    /// The client for a source, named after its id.
    pub async fn client_for(&self, source: &ScraperSourceConfig) -> Arc<ResilientClient<T>> {
        self.registry
            .client(&source.source_id, &source.base_url)
            .await
    }

    /// Log final per-client metrics and reset all client state.
    pub async fn shutdown(&self) {
        for client in self.registry.clients() {
            let m = client.metrics();
            tracing::info!(
                client = %client.name(),
                circuit = %client.circuit_state(),
                total_requests = m.total_requests,
                failures = m.failure_count,
                retries = m.total_retries,
                success_rate = m.success_rate(),
                avg_latency_ms = m.avg_latency_ms,
                "Final client metrics"
            );
        }
        let summary = self.errors.summary();
        if !summary.is_empty() {
            tracing::warn!(?summary, "Recent request failures by client");
        }
        self.registry.reset(None).await;
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::DomainAllowList;
    use crate::circuit_breaker::CircuitState;
    use crate::config::SourceCatalog;
    use crate::retry::RetryPolicy;
    use crate::testutil::{MockFallback, MockTransport};

    fn registry(transport: MockTransport) -> ClientRegistry<MockTransport> {
        let settings = ClientSettings::new(DomainAllowList::new(["a.org", "b.org"]))
            .with_retry(RetryPolicy::default().with_jitter(false));
        ClientRegistry::new(transport, settings, ErrorWindow::default())
    }

    #[tokio::test]
    async fn test_same_name_returns_same_instance() {
        let reg = registry(MockTransport::new("ok"));

        let a = reg.client("alpha", "https://a.org").await;
        let b = reg.client("alpha", "https://ignored.a.org").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.base_url(), "https://a.org");
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_client() {
        let reg = registry(MockTransport::new("ok"));

        let (a, b, c, d) = tokio::join!(
            reg.client("alpha", "https://a.org"),
            reg.client("alpha", "https://a.org"),
            reg.client("alpha", "https://a.org"),
            reg.client("alpha", "https://a.org"),
        );

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert!(Arc::ptr_eq(&a, &d));
        assert_eq!(reg.names(), vec!["alpha"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_do_not_share_circuit_state() {
        let transport = MockTransport::failing(MockFallback::Status(500));
        let reg = registry(transport);
        let alpha = reg.client("alpha", "https://a.org").await;
        let beta = reg.client("beta", "https://b.org").await;

        for _ in 0..5 {
            let _ = alpha.get("/", &[]).await;
        }

        assert_eq!(alpha.circuit_state(), CircuitState::Open);
        assert_eq!(beta.circuit_state(), CircuitState::Closed);
        assert_eq!(beta.metrics().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_one_and_all() {
        let reg = registry(MockTransport::failing(MockFallback::Status(500)));
        let alpha = reg.client("alpha", "https://a.org").await;
        let beta = reg.client("beta", "https://b.org").await;
        for _ in 0..5 {
            let _ = alpha.get("/", &[]).await;
            let _ = beta.get("/", &[]).await;
        }

        assert_eq!(reg.reset(Some("alpha")).await, 1);
        assert_eq!(alpha.circuit_state(), CircuitState::Closed);
        assert_eq!(beta.circuit_state(), CircuitState::Open);

        assert_eq!(reg.reset(Some("missing")).await, 0);
        assert_eq!(reg.reset(None).await, 2);
        assert_eq!(beta.circuit_state(), CircuitState::Closed);
        assert_eq!(beta.metrics().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failures_land_in_error_window() {
        let reg = registry(MockTransport::failing(MockFallback::Status(404)));
        let alpha = reg.client("alpha", "https://a.org").await;

        let _ = alpha.get("/x", &[]).await;
        let _ = alpha.get("/y", &[]).await;

        let summary = reg.errors.summary();
        assert_eq!(summary.get("alpha"), Some(&2));
        assert!(reg.errors.recent()[0].message.contains("404"));
    }

    #[test]
    fn test_error_window_is_bounded() {
        let window = ErrorWindow::new(3, Duration::from_secs(60));
        for i in 0..5 {
            window.record("c", &AppError::Generic(format!("e{i}")));
        }
        let messages: Vec<String> = window.recent().into_iter().map(|r| r.message).collect();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("e2"));
        assert!(messages[2].contains("e4"));
    }

    #[test]
    fn test_error_window_drops_old_entries() {
        let window = ErrorWindow::new(10, Duration::from_secs(60));
        window.record_at("old", "stale".into(), Utc::now() - TimeDelta::minutes(5));
        window.record("new", &AppError::Generic("fresh".into()));

        let recent = window.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].client, "new");
    }

    #[tokio::test]
    async fn test_context_client_for_and_shutdown() {
        let catalog = SourceCatalog::from_json_str(
            r#"{
                "allowed_domains": ["a.org"],
                "sources": [{"source_id": "alpha", "base_url": "https://www.a.org", "endpoints": ["/g"]}]
            }"#,
        )
        .unwrap();
        let ctx = ScrapeContext::new(AppConfig::new(catalog), MockTransport::new("ok"));
        let source = ctx.config().catalog.get("alpha").unwrap().clone();

        let client = ctx.client_for(&source).await;
        client.get("/g", &[]).await.unwrap();
        assert_eq!(client.name(), "alpha");
        assert_eq!(client.metrics().success_count, 1);

        ctx.shutdown().await;
        assert_eq!(client.metrics().total_requests, 0);
        assert!(ctx.errors().recent().is_empty());
    }
}

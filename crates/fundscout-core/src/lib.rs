pub mod allowlist;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod extract;
pub mod http;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod retry;
pub mod scraper;
pub mod throttle;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use allowlist::DomainAllowList;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{ClientSettings, HealthReport, HealthStatus, ResilientClient};
pub use config::{AppConfig, ScraperSourceConfig, SourceCatalog};
pub use context::{ClientRegistry, ErrorWindow, ScrapeContext};
pub use error::AppError;
pub use events::{ScrapeEvent, ScrapeReporter, TracingScrapeReporter};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestSpec};
pub use metrics::ConnectionMetrics;
pub use models::{
    CanonicalGrant, GrantStatus, QualityFlag, RawListing, RunResult, RunStatus, ScraperRunLog,
    UpsertOutcome, compute_hash,
};
pub use orchestrator::Orchestrator;
pub use retry::{RetryPolicy, TransportErrorKind};
pub use throttle::{RateLimiter, ThrottleConfig};
pub use traits::{GrantStore, NullStore, PageParser, RunLogStore};

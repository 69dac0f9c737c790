//! Immutable runtime configuration: the source catalog and process settings.
//!
//! Built once at startup and passed down explicitly; nothing in the core
//! reads the environment on its own.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::allowlist::DomainAllowList;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::client::ClientSettings;
use crate::error::AppError;
use crate::retry::RetryPolicy;
use crate::throttle::ThrottleConfig;

pub const DEFAULT_SOURCES_FILE: &str = "config/sources.json";
pub const DEFAULT_USER_AGENT: &str = "Fundscout/0.1 (grant discovery)";

/// Per-source politeness settings as written in the catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Fixed delay between consecutive requests of one scraper.
    pub delay_ms: u64,
    /// Random extra delay, uniform in `[0, jitter_ms]`.
    pub jitter_ms: u64,
    /// Every Nth request adds a longer pause. `0` disables.
    pub pause_every: u32,
    pub pause_min_ms: u64,
    pub pause_max_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            delay_ms: 1_000,
            jitter_ms: 500,
            pause_every: 5,
            pause_min_ms: 3_000,
            pause_max_ms: 8_000,
        }
    }
}

impl From<&ThrottleSettings> for ThrottleConfig {
    fn from(s: &ThrottleSettings) -> Self {
        ThrottleConfig::new(Duration::from_millis(s.delay_ms))
            .with_jitter(Duration::from_millis(s.jitter_ms))
            .with_pause(
                s.pause_every,
                Duration::from_millis(s.pause_min_ms),
                Duration::from_millis(s.pause_max_ms.max(s.pause_min_ms)),
            )
    }
}

/// One external origin grants are scraped from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperSourceConfig {
    pub source_id: String,
    pub base_url: String,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub throttle: ThrottleSettings,
}

/// The configuration collaborator: known sources plus the outbound allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCatalog {
    pub allowed_domains: Vec<String>,
    pub sources: Vec<ScraperSourceConfig>,
}

impl SourceCatalog {
    pub fn from_json_str(json: &str) -> Result<Self, AppError> {
        let catalog: SourceCatalog = serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid source catalog: {e}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read source catalog {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Ids must be unique, base URLs parseable and allow-listed, and every
    /// source must list at least one endpoint.
    pub fn validate(&self) -> Result<(), AppError> {
        let allow_list = self.allow_list();
        let mut seen = HashSet::new();

        for source in &self.sources {
            if source.source_id.trim().is_empty() {
                return Err(AppError::ConfigError("Source with empty source_id".into()));
            }
            if !seen.insert(source.source_id.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "Duplicate source_id '{}'",
                    source.source_id
                )));
            }
            if source.endpoints.is_empty() {
                return Err(AppError::ConfigError(format!(
                    "Source '{}' has no endpoints",
                    source.source_id
                )));
            }
            let url = Url::parse(&source.base_url).map_err(|e| {
                AppError::ConfigError(format!(
                    "Source '{}' has invalid base_url '{}': {e}",
                    source.source_id, source.base_url
                ))
            })?;
            allow_list.check_url(&url).map_err(|_| {
                AppError::ConfigError(format!(
                    "Source '{}' base_url host is not in allowed_domains",
                    source.source_id
                ))
            })?;
        }
        Ok(())
    }

    pub fn allow_list(&self) -> DomainAllowList {
        DomainAllowList::new(&self.allowed_domains)
    }

    pub fn get(&self, source_id: &str) -> Option<&ScraperSourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Source ids in catalog order.
    pub fn ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.source_id.clone()).collect()
    }
}

/// Process-wide settings, built once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub catalog: SourceCatalog,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
    pub user_agent: String,
}

impl AppConfig {
    /// Defaults around an already loaded catalog.
    pub fn new(catalog: SourceCatalog) -> Self {
        Self {
            catalog,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `FUNDSCOUT_SOURCES_FILE` (default `config/sources.json`)
    /// - `FUNDSCOUT_REQUEST_TIMEOUT_SECS` (default 30)
    /// - `FUNDSCOUT_MAX_RETRIES` (default 3)
    /// - `FUNDSCOUT_RETRY_INITIAL_MS` / `FUNDSCOUT_RETRY_MAX_MS` (1000 / 30000)
    /// - `FUNDSCOUT_CIRCUIT_THRESHOLD` (default 5)
    /// - `FUNDSCOUT_CIRCUIT_COOLDOWN_SECS` (default 300)
    /// - `FUNDSCOUT_USER_AGENT`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sources_file = lookup("FUNDSCOUT_SOURCES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCES_FILE));
        let catalog = SourceCatalog::from_file(&sources_file)?;

        let timeout_secs: u64 = parse_var(&lookup, "FUNDSCOUT_REQUEST_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(AppError::ConfigError(
                "FUNDSCOUT_REQUEST_TIMEOUT_SECS must be at least 1".into(),
            ));
        }

        let retry = RetryPolicy::new(
            parse_var(&lookup, "FUNDSCOUT_MAX_RETRIES", 3)?,
            Duration::from_millis(parse_var(&lookup, "FUNDSCOUT_RETRY_INITIAL_MS", 1_000)?),
            Duration::from_millis(parse_var(&lookup, "FUNDSCOUT_RETRY_MAX_MS", 30_000)?),
            2.0,
        )?;

        let failure_threshold: u32 = parse_var(&lookup, "FUNDSCOUT_CIRCUIT_THRESHOLD", 5)?;
        if failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "FUNDSCOUT_CIRCUIT_THRESHOLD must be at least 1".into(),
            ));
        }
        let circuit = CircuitBreakerConfig {
            failure_threshold,
            cooldown: Duration::from_secs(parse_var(
                &lookup,
                "FUNDSCOUT_CIRCUIT_COOLDOWN_SECS",
                300,
            )?),
        };

        Ok(Self {
            catalog,
            request_timeout: Duration::from_secs(timeout_secs),
            retry,
            circuit,
            user_agent: lookup("FUNDSCOUT_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings::new(self.catalog.allow_list())
            .with_retry(self.retry.clone())
            .with_circuit(self.circuit.clone())
            .with_timeout(self.request_timeout)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': expected a number"))
        }),
    }
}

//! Runs source scrapes end to end and records a run log for each.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinSet;

use crate::client::HealthReport;
use crate::config::ScraperSourceConfig;
use crate::context::ScrapeContext;
use crate::error::AppError;
use crate::events::{ScrapeEvent, ScrapeReporter};
use crate::http::HttpTransport;
use crate::models::{RunCounts, RunResult, RunStatus, ScraperRunLog, UpsertOutcome};
use crate::normalize::{dedup_listings, normalize};
use crate::scraper::SourceScraper;
use crate::throttle::{RateLimiter, ThrottleConfig};
use crate::traits::{GrantStore, PageParser, RunLogStore};

/// Drives scraper runs for every source in the catalog.
///
/// Every run gets a fresh [`RateLimiter`] built from the source's throttle
/// settings, so pause cadence and throttle counters are per run.
pub struct Orchestrator<T, P, G, L, R>
where
    T: HttpTransport + 'static,
    P: PageParser + 'static,
    G: GrantStore + 'static,
    L: RunLogStore + 'static,
    R: ScrapeReporter + 'static,
{
    context: ScrapeContext<T>,
    parser: P,
    grants: G,
    logs: L,
    reporter: Arc<R>,
}

impl<T, P, G, L, R> Clone for Orchestrator<T, P, G, L, R>
where
    T: HttpTransport + 'static,
    P: PageParser + 'static,
    G: GrantStore + 'static,
    L: RunLogStore + 'static,
    R: ScrapeReporter + 'static,
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            parser: self.parser.clone(),
            grants: self.grants.clone(),
            logs: self.logs.clone(),
            reporter: Arc::clone(&self.reporter),
        }
    }
}

impl<T, P, G, L, R> Orchestrator<T, P, G, L, R>
where
    T: HttpTransport + 'static,
    P: PageParser + 'static,
    G: GrantStore + 'static,
    L: RunLogStore + 'static,
    R: ScrapeReporter + 'static,
{
    /// Validates the catalog up front; an invalid source fails here rather
    /// than at run time.
    pub fn new(
        context: ScrapeContext<T>,
        parser: P,
        grants: G,
        logs: L,
        reporter: R,
    ) -> Result<Self, AppError> {
        context.config().catalog.validate()?;

        Ok(Self {
            context,
            parser,
            grants,
            logs,
            reporter: Arc::new(reporter),
        })
    }

    pub fn context(&self) -> &ScrapeContext<T> {
        &self.context
    }

    /// Registered source ids, in catalog order.
    pub fn list_sources(&self) -> Vec<String> {
        self.context.config().catalog.ids()
    }

    /// Scrape, normalize and persist one source.
    ///
    /// The run log is persisted when the run starts and once more when it
    /// completes. Any failure after the start, including a failed write of
    /// the completed log, marks the log `error` and is returned.
    pub async fn run_source(&self, source_id: &str) -> Result<RunResult, AppError> {
        let source = self
            .context
            .config()
            .catalog
            .get(source_id)
            .cloned()
            .ok_or_else(|| AppError::UnknownSource(source_id.to_string()))?;

        let mut log = ScraperRunLog::start(source_id);
        self.logs.create_run_log(&log).await?;
        self.reporter.report(ScrapeEvent::RunStarted {
            source: source_id,
            run_id: log.id,
        });

        let mut counts = RunCounts::default();
        let failure = match self.execute(&source, &mut counts).await {
            Ok((status, metadata)) => {
                log.complete(status, counts, metadata);
                match self.logs.complete_run_log(&log).await {
                    Ok(()) => {
                        let result = RunResult::from(&log);
                        self.reporter
                            .report(ScrapeEvent::RunCompleted { result: &result });
                        return Ok(result);
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        let message = failure.to_string();
        log.fail(&message, counts);
        if let Err(persist) = self.logs.complete_run_log(&log).await {
            tracing::error!(
                source = %source_id,
                run_id = %log.id,
                error = %persist,
                "Failed to persist failed run log"
            );
        }
        self.reporter.report(ScrapeEvent::RunFailed {
            source: source_id,
            run_id: log.id,
            error: &message,
        });
        Err(failure)
    }

    async fn execute(
        &self,
        source: &ScraperSourceConfig,
        counts: &mut RunCounts,
    ) -> Result<(RunStatus, serde_json::Value), AppError> {
        let source_id = source.source_id.as_str();
        let client = self.context.client_for(source).await;
        let limiter = RateLimiter::new(ThrottleConfig::from(&source.throttle));

        let scraper = SourceScraper::new(
            source_id,
            &self.context.config().catalog,
            client,
            self.parser.clone(),
            limiter,
        )?;
        let output = scraper.scrape(self.reporter.as_ref()).await?;

        let (listings, duplicates) = dedup_listings(output.listings);
        if duplicates > 0 {
            self.reporter.report(ScrapeEvent::DuplicatesDropped {
                source: source_id,
                count: duplicates,
            });
        }
        counts.found = listings.len() as u32;

        let mut flagged = 0usize;
        for raw in &listings {
            let grant = normalize(raw, source_id);
            if !grant.quality_flags.is_empty() {
                flagged += 1;
                self.reporter.report(ScrapeEvent::QualityFlagged {
                    source: source_id,
                    source_url: &grant.source_url,
                    flags: &grant.quality_flags,
                });
            }

            let outcome = self.grants.upsert_grant(&grant).await?;
            match outcome {
                UpsertOutcome::Added => counts.added += 1,
                UpsertOutcome::Updated => counts.updated += 1,
            }
            self.reporter.report(ScrapeEvent::GrantStored {
                source: source_id,
                source_url: &grant.source_url,
                outcome,
            });
        }

        let status = if output.endpoints_failed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        let metadata = json!({
            "endpoints_total": source.endpoints.len(),
            "endpoints_visited": output.endpoints_visited,
            "endpoints_failed": output.endpoints_failed,
            "listings_skipped": output.listings_skipped,
            "duplicates_dropped": duplicates,
            "quality_flagged": flagged,
            "throttle": output.throttle,
        });
        Ok((status, metadata))
    }

    /// Run every source concurrently, one task each.
    ///
    /// A failing or panicking source only affects its own entry.
    pub async fn run_all(&self) -> BTreeMap<String, Result<RunResult, AppError>> {
        let mut tasks = JoinSet::new();
        let mut task_sources = HashMap::new();

        for source_id in self.list_sources() {
            let this = self.clone();
            let id = source_id.clone();
            let handle = tasks.spawn(async move {
                let result = this.run_source(&id).await;
                (id, result)
            });
            task_sources.insert(handle.id(), source_id);
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (source_id, result))) => {
                    results.insert(source_id, result);
                }
                Err(e) => {
                    let source_id = task_sources
                        .get(&e.id())
                        .cloned()
                        .unwrap_or_else(|| format!("task-{}", e.id()));
                    tracing::error!(source = %source_id, error = %e, "Scraper task aborted");
                    results.insert(
                        source_id,
                        Err(AppError::Generic(format!("Scraper task aborted: {e}"))),
                    );
                }
            }
        }
        results
    }

    /// Health check every source's base URL.
    pub async fn health(&self) -> Vec<HealthReport> {
        let mut reports = Vec::new();
        for source in &self.context.config().catalog.sources {
            let client = self.context.client_for(source).await;
            reports.push(client.health_check().await);
        }
        reports
    }
}

use std::collections::BTreeSet;
use std::time::Duration;

use uuid::Uuid;

use crate::models::{QualityFlag, RunResult, UpsertOutcome};

/// Outcomes emitted by the scraper and orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ScrapeEvent<'a> {
    RunStarted {
        source: &'a str,
        run_id: Uuid,
    },
    Throttled {
        source: &'a str,
        waited: Duration,
    },
    EndpointFetched {
        source: &'a str,
        endpoint: &'a str,
        listings: usize,
    },
    EndpointFailed {
        source: &'a str,
        endpoint: &'a str,
        error: &'a str,
    },
    ListingSkipped {
        source: &'a str,
        endpoint: &'a str,
        reason: &'a str,
    },
    DuplicatesDropped {
        source: &'a str,
        count: usize,
    },
    QualityFlagged {
        source: &'a str,
        source_url: &'a str,
        flags: &'a BTreeSet<QualityFlag>,
    },
    GrantStored {
        source: &'a str,
        source_url: &'a str,
        outcome: UpsertOutcome,
    },
    RunCompleted {
        result: &'a RunResult,
    },
    RunFailed {
        source: &'a str,
        run_id: Uuid,
        error: &'a str,
    },
}

/// Trait for receiving scrape events (decoupled logging).
pub trait ScrapeReporter: Send + Sync {
    fn report(&self, event: ScrapeEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingScrapeReporter;

impl ScrapeReporter for TracingScrapeReporter {
    fn report(&self, event: ScrapeEvent<'_>) {
        match event {
            ScrapeEvent::RunStarted { source, run_id } => {
                tracing::info!(%source, %run_id, "Scraper run started");
            }
            ScrapeEvent::Throttled { source, waited } => {
                tracing::debug!(%source, waited_ms = waited.as_millis() as u64, "Throttled");
            }
            ScrapeEvent::EndpointFetched {
                source,
                endpoint,
                listings,
            } => {
                tracing::info!(%source, %endpoint, listings, "Endpoint scraped");
            }
            ScrapeEvent::EndpointFailed {
                source,
                endpoint,
                error,
            } => {
                tracing::warn!(%source, %endpoint, %error, "Endpoint failed, skipping");
            }
            ScrapeEvent::ListingSkipped {
                source,
                endpoint,
                reason,
            } => {
                tracing::debug!(%source, %endpoint, %reason, "Listing skipped");
            }
            ScrapeEvent::DuplicatesDropped { source, count } => {
                tracing::info!(%source, count, "Duplicate listings dropped");
            }
            ScrapeEvent::QualityFlagged {
                source,
                source_url,
                flags,
            } => {
                tracing::warn!(%source, %source_url, ?flags, "Grant has quality flags");
            }
            ScrapeEvent::GrantStored {
                source,
                source_url,
                outcome,
            } => {
                tracing::debug!(%source, %source_url, ?outcome, "Grant stored");
            }
            ScrapeEvent::RunCompleted { result } => {
                tracing::info!(
                    source = %result.source_id,
                    run_id = %result.run_id,
                    status = %result.status,
                    found = result.grants_found,
                    added = result.grants_added,
                    updated = result.grants_updated,
                    duration_s = result.duration_seconds,
                    "Scraper run completed"
                );
            }
            ScrapeEvent::RunFailed {
                source,
                run_id,
                error,
            } => {
                tracing::error!(%source, %run_id, %error, "Scraper run failed");
            }
        }
    }
}

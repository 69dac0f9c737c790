use std::future::Future;

use crate::error::AppError;
use crate::models::{CanonicalGrant, RawListing, ScraperRunLog, UpsertOutcome};

/// Turns one fetched page into candidate listings.
///
/// The outer `Err` means the page as a whole could not be read. Inner
/// errors are per-listing and only cost that listing.
pub trait PageParser: Send + Sync + Clone {
    fn parse(
        &self,
        html: &str,
        page_url: &str,
    ) -> Result<Vec<Result<RawListing, AppError>>, AppError>;
}

/// Persists canonical grants with upsert semantics keyed by `(source, source_url)`.
pub trait GrantStore: Send + Sync + Clone {
    fn upsert_grant(
        &self,
        grant: &CanonicalGrant,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;
}

/// Persists scraper run logs.
pub trait RunLogStore: Send + Sync + Clone {
    /// Insert a freshly started (`running`) log.
    fn create_run_log(
        &self,
        log: &ScraperRunLog,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Write the terminal state of a log created earlier.
    fn complete_run_log(
        &self,
        log: &ScraperRunLog,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op store for dry runs. Every grant counts as added.
#[derive(Debug, Clone)]
pub struct NullStore;

impl GrantStore for NullStore {
    async fn upsert_grant(&self, _grant: &CanonicalGrant) -> Result<UpsertOutcome, AppError> {
        Ok(UpsertOutcome::Added)
    }
}

impl RunLogStore for NullStore {
    async fn create_run_log(&self, _log: &ScraperRunLog) -> Result<(), AppError> {
        Ok(())
    }

    async fn complete_run_log(&self, _log: &ScraperRunLog) -> Result<(), AppError> {
        Ok(())
    }
}

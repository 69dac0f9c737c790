use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Date phrases found near a listing, split by the keyword that introduced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTexts {
    pub open: Option<String>,
    pub deadline: Option<String>,
}

/// Candidate listing as extracted from one page element. Not yet normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub title: String,
    pub description: String,
    pub source_url: String,
    /// Text fragment(s) that mention money, qualifiers included.
    pub amount_text: Option<String>,
    pub date_text: DateTexts,
    pub email: Option<String>,
    /// Taxonomy keywords detected in the listing text.
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Open,
    Upcoming,
    Closed,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Open => "open",
            GrantStatus::Upcoming => "upcoming",
            GrantStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(GrantStatus::Open),
            "upcoming" => Ok(GrantStatus::Upcoming),
            "closed" => Ok(GrantStatus::Closed),
            _ => Err(format!("Unknown grant status: {}", s)),
        }
    }
}

/// Invariant violations that are accepted but recorded on the grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// `min_amount > max_amount`.
    AmountRangeInverted,
    /// `open_date >= deadline`.
    DatesOutOfOrder,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::AmountRangeInverted => "amount_range_inverted",
            QualityFlag::DatesOutOfOrder => "dates_out_of_order",
        }
    }
}

impl FromStr for QualityFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amount_range_inverted" => Ok(QualityFlag::AmountRangeInverted),
            "dates_out_of_order" => Ok(QualityFlag::DatesOutOfOrder),
            _ => Err(format!("Unknown quality flag: {}", s)),
        }
    }
}

/// The normalized, source-agnostic representation of one funding opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalGrant {
    pub title: String,
    pub description: String,
    pub source: String,
    pub source_url: String,
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,
    pub open_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub contact_email: Option<String>,
    pub industry_focus: String,
    pub location: String,
    pub org_types_eligible: BTreeSet<String>,
    pub funding_purpose: BTreeSet<String>,
    pub audience_tags: BTreeSet<String>,
    pub status: GrantStatus,
    pub quality_flags: BTreeSet<QualityFlag>,
}

impl CanonicalGrant {
    /// SHA-256 over the serialized record, used to skip no-op updates.
    pub fn content_hash(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        compute_hash(&json)
    }
}

/// Result of upserting one grant, keyed by `(source, source_url)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

/// Status of a scraper run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "error" => Ok(RunStatus::Error),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Counts gathered while a run is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub found: u32,
    pub added: u32,
    pub updated: u32,
}

/// Audit record of one source run.
///
/// Created with status `running`, completed exactly once through
/// [`complete`](Self::complete) or [`fail`](Self::fail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperRunLog {
    pub id: Uuid,
    pub source_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub status: RunStatus,
    pub grants_found: u32,
    pub grants_added: u32,
    pub grants_updated: u32,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

impl ScraperRunLog {
    pub fn start(source_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_name: source_name.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: None,
            status: RunStatus::Running,
            grants_found: 0,
            grants_added: 0,
            grants_updated: 0,
            error_message: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Mark the run finished with `success` or `partial`.
    pub fn complete(&mut self, status: RunStatus, counts: RunCounts, metadata: serde_json::Value) {
        debug_assert!(matches!(status, RunStatus::Success | RunStatus::Partial));
        self.finish(status);
        self.grants_found = counts.found;
        self.grants_added = counts.added;
        self.grants_updated = counts.updated;
        self.metadata = metadata;
    }

    /// Mark the run finished with `error`.
    pub fn fail(&mut self, message: impl Into<String>, counts: RunCounts) {
        self.finish(RunStatus::Error);
        self.grants_found = counts.found;
        self.grants_added = counts.added;
        self.grants_updated = counts.updated;
        self.error_message = Some(message.into());
    }

    fn finish(&mut self, status: RunStatus) {
        let end = Utc::now().max(self.start_time);
        let elapsed_ms = (end - self.start_time).num_milliseconds();
        self.end_time = Some(end);
        self.duration_seconds = Some((elapsed_ms + 500) / 1000);
        self.status = status;
    }
}

/// Summary returned to callers of the orchestration interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub source_id: String,
    pub run_id: Uuid,
    pub status: RunStatus,
    pub grants_found: u32,
    pub grants_added: u32,
    pub grants_updated: u32,
    pub duration_seconds: i64,
}

impl From<&ScraperRunLog> for RunResult {
    fn from(log: &ScraperRunLog) -> Self {
        RunResult {
            source_id: log.source_name.clone(),
            run_id: log.id,
            status: log.status,
            grants_found: log.grants_found,
            grants_added: log.grants_added,
            grants_updated: log.grants_updated,
            duration_seconds: log.duration_seconds.unwrap_or(0),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, compute_hash("hello"));
    }

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Error,
        ] {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Error.is_terminal());
    }

    #[test]
    fn test_grant_status_and_flags_parse_their_own_names() {
        for status in [GrantStatus::Open, GrantStatus::Upcoming, GrantStatus::Closed] {
            assert_eq!(status.as_str().parse::<GrantStatus>().unwrap(), status);
        }
        for flag in [QualityFlag::AmountRangeInverted, QualityFlag::DatesOutOfOrder] {
            assert_eq!(flag.as_str().parse::<QualityFlag>().unwrap(), flag);
            assert_eq!(
                serde_json::to_value(flag).unwrap(),
                serde_json::json!(flag.as_str())
            );
        }
        assert!("archived".parse::<GrantStatus>().is_err());
    }

    #[test]
    fn test_run_log_lifecycle() {
        let mut log = ScraperRunLog::start("grants_gov_au");
        assert_eq!(log.status, RunStatus::Running);
        assert!(log.end_time.is_none());

        log.start_time -= chrono::TimeDelta::milliseconds(2_600);
        log.complete(
            RunStatus::Success,
            RunCounts {
                found: 4,
                added: 3,
                updated: 1,
            },
            serde_json::json!({"endpoints_visited": 2}),
        );

        assert_eq!(log.status, RunStatus::Success);
        assert!(log.end_time.unwrap() > log.start_time);
        assert_eq!(log.duration_seconds, Some(3));
        assert_eq!((log.grants_found, log.grants_added, log.grants_updated), (4, 3, 1));
        assert_eq!(log.metadata["endpoints_visited"], 2);

        let result = RunResult::from(&log);
        assert_eq!(result.source_id, "grants_gov_au");
        assert_eq!(result.duration_seconds, 3);
    }

    #[test]
    fn test_run_log_failure_keeps_message() {
        let mut log = ScraperRunLog::start("x");
        log.fail("boom", RunCounts::default());
        assert_eq!(log.status, RunStatus::Error);
        assert_eq!(log.error_message.as_deref(), Some("boom"));
        assert!(log.duration_seconds.is_some());
    }
}

//! Raw listing -> canonical grant, plus pre-persistence dedup.

use std::collections::{BTreeSet, HashSet};

use chrono::{NaiveDate, Utc};

use crate::extract::{
    classify_audience, classify_funding_purpose, classify_industry, classify_location,
    classify_org_types, collapse_whitespace, is_valid_email, parse_amount_range, parse_date,
};
use crate::models::{CanonicalGrant, GrantStatus, QualityFlag, RawListing};

/// Normalize against today's date (UTC).
pub fn normalize(raw: &RawListing, source: &str) -> CanonicalGrant {
    normalize_at(raw, source, Utc::now().date_naive())
}

/// Normalize one listing. `today` drives the open/upcoming/closed status.
pub fn normalize_at(raw: &RawListing, source: &str, today: NaiveDate) -> CanonicalGrant {
    let (min_amount, max_amount) = raw
        .amount_text
        .as_deref()
        .map(parse_amount_range)
        .unwrap_or((None, None));

    let open_date = raw.date_text.open.as_deref().and_then(parse_date);
    let deadline = raw.date_text.deadline.as_deref().and_then(parse_date);

    let contact_email = raw
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| is_valid_email(e));

    let keywords: Vec<String> = raw.keywords.iter().map(|k| k.trim().to_lowercase()).collect();

    CanonicalGrant {
        title: collapse_whitespace(&raw.title),
        description: collapse_whitespace(&raw.description),
        source: source.to_string(),
        source_url: raw.source_url.trim().to_string(),
        min_amount,
        max_amount,
        open_date,
        deadline,
        contact_email,
        industry_focus: classify_industry(&keywords),
        location: classify_location(&keywords),
        org_types_eligible: classify_org_types(&keywords),
        funding_purpose: classify_funding_purpose(&keywords),
        audience_tags: classify_audience(&keywords),
        status: derive_status(open_date, deadline, today),
        quality_flags: quality_flags(min_amount, max_amount, open_date, deadline),
    }
}

fn derive_status(
    open_date: Option<NaiveDate>,
    deadline: Option<NaiveDate>,
    today: NaiveDate,
) -> GrantStatus {
    if deadline.is_some_and(|d| d < today) {
        GrantStatus::Closed
    } else if open_date.is_some_and(|o| o > today) {
        GrantStatus::Upcoming
    } else {
        GrantStatus::Open
    }
}

fn quality_flags(
    min_amount: Option<i64>,
    max_amount: Option<i64>,
    open_date: Option<NaiveDate>,
    deadline: Option<NaiveDate>,
) -> BTreeSet<QualityFlag> {
    let mut flags = BTreeSet::new();
    if let (Some(min), Some(max)) = (min_amount, max_amount)
        && min > max
    {
        flags.insert(QualityFlag::AmountRangeInverted);
    }
    if let (Some(open), Some(deadline)) = (open_date, deadline)
        && open >= deadline
    {
        flags.insert(QualityFlag::DatesOutOfOrder);
    }
    flags
}

/// Drop listings whose trimmed `(title, source_url)` was already seen.
///
/// Keeps the first occurrence and preserves order. Returns the survivors
/// and the number dropped.
pub fn dedup_listings(listings: Vec<RawListing>) -> (Vec<RawListing>, usize) {
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(listings.len());
    let total = listings.len();
    let kept: Vec<RawListing> = listings
        .into_iter()
        .filter(|l| seen.insert((l.title.trim().to_string(), l.source_url.trim().to_string())))
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

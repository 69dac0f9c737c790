//! Heuristic extraction of grant facts from free page text.
//!
//! Everything here is best-effort. Amounts are resolved from qualifier
//! phrases ("up to", "minimum", "between ... and ...") and dates from a
//! fixed, ordered list of formats. Taxonomy tags come from keyword tables.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

use crate::models::{DateTexts, RawListing};

pub const MIN_TITLE_CHARS: usize = 10;
pub const MIN_DESCRIPTION_CHARS: usize = 50;

pub const DEFAULT_TAG: &str = "general";
pub const DEFAULT_ORG_TYPE: &str = "any";
pub const NATIONAL: &str = "National";

/// Titles that identify navigation chrome rather than a grant.
const TITLE_DENYLIST: &[&str] = &[
    "home",
    "contact",
    "contact us",
    "about",
    "about us",
    "search",
    "search results",
    "login",
    "log in",
    "sign in",
    "menu",
    "news",
    "privacy",
    "privacy policy",
    "sitemap",
    "skip to content",
    "skip to main content",
    "read more",
    "learn more",
    "terms of use",
    "accessibility",
    "copyright",
];

const NUM: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";
const SUFFIX: &str = r"(?:\s?(k|m|million|thousand|billion|bn)\b)?";
const MONTHS: &str = "(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sept|Sep|Oct|Nov|Dec)";

static AMOUNT_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:\b(?:up to|maximum of|maximum|max\.?|not exceeding|no more than|minimum of|minimum|min\.?|at least|between|from)\s+)?(?:AUD\s*)?\$\s?{NUM}{SUFFIX}(?:\s*(?:-|–|to|and)\s*(?:AUD\s*)?\$?\s?{NUM}{SUFFIX})?"
    ))
    .expect("hardcoded regex pattern is valid")
});

static BETWEEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bbetween\s+(?:AUD\s*)?\$\s?{NUM}{SUFFIX}\s+and\s+(?:AUD\s*)?\$?\s?{NUM}{SUFFIX}"
    ))
    .expect("hardcoded regex pattern is valid")
});

static SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\$\s?{NUM}{SUFFIX}\s*(?:-|–|to)\s*(?:AUD\s*)?\$?\s?{NUM}{SUFFIX}"
    ))
    .expect("hardcoded regex pattern is valid")
});

static QUALIFIED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(up to|maximum of|maximum|max\.?|not exceeding|no more than|minimum of|minimum|min\.?|at least|from)\s+(?:AUD\s*)?\$\s?{NUM}{SUFFIX}"
    ))
    .expect("hardcoded regex pattern is valid")
});

static MONEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\$\s?{NUM}{SUFFIX}")).expect("hardcoded regex pattern is valid")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b")
        .expect("hardcoded regex pattern is valid")
});

type DateParser = fn(&Captures<'_>) -> Option<NaiveDate>;

/// Supported date formats, in priority order.
static DATE_FORMATS: LazyLock<Vec<(Regex, DateParser)>> = LazyLock::new(|| {
    let formats: [(String, DateParser); 4] = [
        // 31/12/2024, 31.12.2024, 31-12-2024
        (
            r"\b(\d{1,2})[/.-](\d{1,2})[/.-](\d{4})\b".to_string(),
            |c| ymd(&c[3], &c[2], &c[1]),
        ),
        // 2024-12-31
        (
            r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b".to_string(),
            |c| ymd(&c[1], &c[2], &c[3]),
        ),
        // 31 December 2024, 1st Dec 2024
        (
            format!(r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+{MONTHS}\.?,?\s+(\d{{4}})\b"),
            |c| named_month(&c[3], &c[2], &c[1]),
        ),
        // December 31, 2024
        (
            format!(r"(?i)\b{MONTHS}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"),
            |c| named_month(&c[3], &c[1], &c[2]),
        ),
    ];
    formats
        .into_iter()
        .map(|(pattern, parse)| {
            (
                Regex::new(&pattern).expect("hardcoded regex pattern is valid"),
                parse,
            )
        })
        .collect()
});

const DEADLINE_CUES: &[&str] = &[
    "deadline",
    "clos",
    "due",
    "until",
    "ends",
    "submit by",
    "no later than",
];
const OPEN_CUES: &[&str] = &["open", "commenc", "start", "from", "launch", "available"];

/// How many characters before a date are searched for cue words.
const CUE_WINDOW_CHARS: usize = 40;

type Taxonomy = &'static [(&'static str, &'static [&'static str])];

const INDUSTRY: Taxonomy = &[
    (
        "arts",
        &["arts", "artist", "creative", "music", "film", "theatre", "cultural", "culture"],
    ),
    (
        "agriculture",
        &["agriculture", "agricultural", "farm", "farming", "farmer", "drought", "fisheries"],
    ),
    (
        "technology",
        &["technology", "digital", "software", "tech", "cyber", "ai"],
    ),
    (
        "health",
        &["health", "medical", "wellbeing", "mental health", "hospital"],
    ),
    (
        "environment",
        &["environment", "environmental", "climate", "sustainability", "renewable", "energy", "conservation"],
    ),
    (
        "education",
        &["education", "school", "university", "scholarship", "literacy"],
    ),
    (
        "community",
        &["community", "volunteer", "social", "charity", "neighbourhood"],
    ),
    (
        "manufacturing",
        &["manufacturing", "manufacturer", "industrial", "supply chain"],
    ),
    (
        "tourism",
        &["tourism", "tourist", "hospitality", "visitor economy"],
    ),
    ("sport", &["sport", "sporting", "recreation", "athlete"]),
];

const ORG_TYPES: Taxonomy = &[
    (
        "small_business",
        &["small business", "sme", "startup", "start-up", "sole trader", "business"],
    ),
    (
        "non_profit",
        &["not-for-profit", "not for profit", "nonprofit", "non-profit", "charity", "charities", "incorporated association"],
    ),
    (
        "individual",
        &["individual", "artist", "researcher", "student", "sole trader"],
    ),
    (
        "local_government",
        &["council", "local government", "shire"],
    ),
    (
        "indigenous_organisation",
        &["aboriginal", "torres strait", "indigenous", "first nations"],
    ),
    (
        "research_institution",
        &["university", "research institution", "research organisation", "research organization"],
    ),
];

const FUNDING_PURPOSE: Taxonomy = &[
    (
        "capital_works",
        &["infrastructure", "building", "construction", "equipment", "capital works", "facility"],
    ),
    (
        "research",
        &["research", "feasibility", "study", "pilot"],
    ),
    (
        "training",
        &["training", "skills", "apprentice", "scholarship", "mentoring"],
    ),
    (
        "project",
        &["project", "program", "programme", "initiative", "event", "festival"],
    ),
    (
        "operational",
        &["operational", "operating costs", "running costs", "salary", "salaries", "wages"],
    ),
    (
        "export",
        &["export", "international market", "trade mission"],
    ),
    (
        "innovation",
        &["innovation", "commercialisation", "commercialization", "r&d", "prototype"],
    ),
];

const AUDIENCE: Taxonomy = &[
    ("youth", &["youth", "young people", "students", "children"]),
    ("women", &["women", "female", "gender equality"]),
    (
        "indigenous",
        &["aboriginal", "torres strait", "indigenous", "first nations"],
    ),
    ("seniors", &["seniors", "older australians", "aged care", "older people"]),
    ("regional", &["regional", "rural", "remote"]),
    ("veterans", &["veteran", "ex-service", "defence families"]),
    ("disability", &["disability", "accessibility", "ndis", "inclusion"]),
    (
        "multicultural",
        &["multicultural", "migrant", "refugee", "culturally and linguistically diverse"],
    ),
];

const LOCATIONS: Taxonomy = &[
    ("NSW", &["nsw", "new south wales", "sydney"]),
    ("VIC", &["vic", "victoria", "melbourne"]),
    ("QLD", &["qld", "queensland", "brisbane"]),
    ("WA", &["western australia", "perth"]),
    ("SA", &["south australia", "adelaide"]),
    ("TAS", &["tasmania", "hobart"]),
    ("ACT", &["australian capital territory", "canberra"]),
    ("NT", &["northern territory", "darwin"]),
];

/// Trim and collapse every run of whitespace to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Candidate filter applied before extraction.
pub fn is_viable_candidate(title: &str, description: &str) -> bool {
    let title = collapse_whitespace(title);
    if title.chars().count() < MIN_TITLE_CHARS {
        return false;
    }
    if collapse_whitespace(description).chars().count() < MIN_DESCRIPTION_CHARS {
        return false;
    }
    let lowered = title.to_lowercase();
    !TITLE_DENYLIST.contains(&lowered.trim_end_matches(['.', ':', '!']))
}

/// Build a [`RawListing`] from one page element's text.
///
/// `body` is the element's full text; title and description are included
/// in the searched text as well.
pub fn extract_listing(title: &str, description: &str, source_url: &str, body: &str) -> RawListing {
    let text = format!("{title}\n{description}\n{body}");
    RawListing {
        title: collapse_whitespace(title),
        description: collapse_whitespace(description),
        source_url: source_url.trim().to_string(),
        amount_text: extract_amount_text(&text),
        date_text: extract_date_texts(&text),
        email: extract_email(&text),
        keywords: detect_keywords(&text),
    }
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Distinct money phrases in `text`, qualifiers included, joined by `"; "`.
pub fn extract_amount_text(text: &str) -> Option<String> {
    let mut phrases: Vec<String> = Vec::new();
    for m in AMOUNT_PHRASE_RE.find_iter(text) {
        let phrase = collapse_whitespace(m.as_str());
        if !phrases.contains(&phrase) {
            phrases.push(phrase);
        }
    }
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join("; "))
    }
}

/// Resolve `(min, max)` whole-dollar amounts from free text.
///
/// An explicit range wins. Otherwise "minimum"/"at least" figures set the
/// minimum and "up to"/"maximum" figures the maximum. Unqualified figures
/// are read as a maximum, the largest one winning.
pub fn parse_amount_range(text: &str) -> (Option<i64>, Option<i64>) {
    if let Some(c) = BETWEEN_RE
        .captures(text)
        .or_else(|| SPAN_RE.captures(text))
    {
        return (
            money_value(&c[1], c.get(2).map(|m| m.as_str())),
            money_value(&c[3], c.get(4).map(|m| m.as_str())),
        );
    }

    let mut min = None;
    let mut max = None;
    for c in QUALIFIED_RE.captures_iter(text) {
        let value = money_value(&c[2], c.get(3).map(|m| m.as_str()));
        let qualifier = c[1].to_lowercase();
        if qualifier.starts_with("min") || qualifier == "at least" || qualifier == "from" {
            min = min.or(value);
        } else {
            max = max.or(value);
        }
    }

    if min.is_none() && max.is_none() {
        max = MONEY_RE
            .captures_iter(text)
            .filter_map(|c| money_value(&c[1], c.get(2).map(|m| m.as_str())))
            .max();
    }
    (min, max)
}

fn money_value(number: &str, suffix: Option<&str>) -> Option<i64> {
    let base: f64 = number.replace(',', "").parse().ok()?;
    let multiplier = match suffix.map(str::to_lowercase).as_deref() {
        Some("k" | "thousand") => 1_000.0,
        Some("m" | "million") => 1_000_000.0,
        Some("billion" | "bn") => 1_000_000_000.0,
        _ => 1.0,
    };
    let value = (base * multiplier).round();
    (value.is_finite() && value >= 0.0 && value <= i64::MAX as f64).then_some(value as i64)
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// First date in `text`, trying each supported format in order.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|(re, parse)| re.captures_iter(text).find_map(|c| parse(&c)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateRole {
    Open,
    Deadline,
}

/// Split the dates in `text` into open-date and deadline text by the cue
/// words preceding each one. An uncued date is taken as the deadline when
/// no cued deadline exists.
pub fn extract_date_texts(text: &str) -> DateTexts {
    let mut found: Vec<(usize, usize)> = DATE_FORMATS
        .iter()
        .flat_map(|(re, parse)| {
            re.captures_iter(text).filter_map(move |c| {
                parse(&c)?;
                let m = c.get(0)?;
                Some((m.start(), m.end()))
            })
        })
        .collect();
    found.sort_unstable();

    let mut open = None;
    let mut deadline = None;
    let mut uncued = None;
    let mut last_end = 0;
    for (start, end) in found {
        if start < last_end {
            continue;
        }
        last_end = end;
        let date_text = text[start..end].to_string();
        match cue_before(text, start) {
            Some(DateRole::Open) => {
                open.get_or_insert(date_text);
            }
            Some(DateRole::Deadline) => {
                deadline.get_or_insert(date_text);
            }
            None => {
                uncued.get_or_insert(date_text);
            }
        }
    }

    DateTexts {
        open,
        deadline: deadline.or(uncued),
    }
}

fn cue_before(text: &str, date_start: usize) -> Option<DateRole> {
    let head = &text[..date_start];
    let window_start = head
        .char_indices()
        .rev()
        .nth(CUE_WINDOW_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let window = head[window_start..].to_lowercase();

    let last_cue = |cues: &[&str]| cues.iter().filter_map(|cue| window.rfind(cue)).max();
    match (last_cue(OPEN_CUES), last_cue(DEADLINE_CUES)) {
        (Some(o), Some(d)) if o > d => Some(DateRole::Open),
        (_, Some(_)) => Some(DateRole::Deadline),
        (Some(_), None) => Some(DateRole::Open),
        (None, None) => None,
    }
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn named_month(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let month = match month.get(..3)?.to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

// ---------------------------------------------------------------------------
// Email and taxonomy
// ---------------------------------------------------------------------------

pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_lowercase())
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE
        .find(email)
        .is_some_and(|m| m.start() == 0 && m.end() == email.len())
}

/// Every taxonomy term present in `text`, in table order, without repeats.
pub fn detect_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();
    for table in [INDUSTRY, ORG_TYPES, FUNDING_PURPOSE, AUDIENCE, LOCATIONS] {
        for (_, terms) in table {
            for term in *terms {
                if contains_term(&lowered, term) && !keywords.iter().any(|k| k == term) {
                    keywords.push((*term).to_string());
                }
            }
        }
    }
    keywords
}

/// Industry with the most keyword hits; ties go to the earlier entry.
pub fn classify_industry(keywords: &[String]) -> String {
    let mut best: Option<(&str, usize)> = None;
    for (tag, terms) in INDUSTRY {
        let hits = terms
            .iter()
            .filter(|t| keywords.iter().any(|k| k == *t))
            .count();
        if hits > 0 && best.is_none_or(|(_, top)| hits > top) {
            best = Some((tag, hits));
        }
    }
    best.map_or(DEFAULT_TAG, |(tag, _)| tag).to_string()
}

pub fn classify_org_types(keywords: &[String]) -> BTreeSet<String> {
    tags_for(ORG_TYPES, keywords, DEFAULT_ORG_TYPE)
}

pub fn classify_funding_purpose(keywords: &[String]) -> BTreeSet<String> {
    tags_for(FUNDING_PURPOSE, keywords, DEFAULT_TAG)
}

pub fn classify_audience(keywords: &[String]) -> BTreeSet<String> {
    tags_for(AUDIENCE, keywords, DEFAULT_TAG)
}

/// A single state when exactly one is mentioned, otherwise national.
pub fn classify_location(keywords: &[String]) -> String {
    let states = tags_for(LOCATIONS, keywords, NATIONAL);
    match states.len() {
        1 => states.into_iter().next().unwrap_or_else(|| NATIONAL.to_string()),
        _ => NATIONAL.to_string(),
    }
}

fn tags_for(table: Taxonomy, keywords: &[String], default: &str) -> BTreeSet<String> {
    let mut tags: BTreeSet<String> = table
        .iter()
        .filter(|(_, terms)| terms.iter().any(|t| keywords.iter().any(|k| k == t)))
        .map(|(tag, _)| (*tag).to_string())
        .collect();
    if tags.is_empty() {
        tags.insert(default.to_string());
    }
    tags
}

/// Whole-word match of a lowercase term, tolerating a plural `s`.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(i, _)| {
        let before_ok = haystack[..i]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let mut after = haystack[i + term.len()..].chars();
        let after_ok = match after.next() {
            None => true,
            Some('s') => after.next().is_none_or(|c| !c.is_alphanumeric()),
            Some(c) => !c.is_alphanumeric(),
        };
        before_ok && after_ok
    })
}

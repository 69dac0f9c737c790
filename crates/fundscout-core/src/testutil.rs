//! Test utilities: mock implementations of the core traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so tests can
//! assert on recorded calls after handing a clone to the code under test.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::events::{ScrapeEvent, ScrapeReporter};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::models::{CanonicalGrant, RawListing, ScraperRunLog, UpsertOutcome};
use crate::traits::{GrantStore, PageParser, RunLogStore};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// What the mock transport answers when no queued response is left.
#[derive(Debug, Clone)]
pub enum MockFallback {
    /// Respond with this status and the default body.
    Status(u16),
    /// Respond 200 with this body.
    Page(String),
    Timeout,
    Connection,
}

struct TransportState {
    default_body: String,
    queue: VecDeque<Result<HttpResponse, AppError>>,
    routes: Vec<(String, MockFallback)>,
    fallback: MockFallback,
    requests: Vec<HttpRequest>,
}

/// Mock transport. Answers from the response queue first, then the first
/// route whose fragment occurs in the URL, then the fallback.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    fn with_state(default_body: &str, fallback: MockFallback) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                default_body: default_body.to_string(),
                queue: VecDeque::new(),
                routes: Vec::new(),
                fallback,
                requests: Vec::new(),
            })),
        }
    }

    /// Always answers 200 with `body`.
    pub fn new(body: &str) -> Self {
        Self::with_state(body, MockFallback::Status(200))
    }

    pub fn failing(fallback: MockFallback) -> Self {
        Self::with_state("", fallback)
    }

    pub fn with_responses(responses: Vec<Result<HttpResponse, AppError>>) -> Self {
        let transport = Self::new("");
        transport.state.lock().unwrap().queue = responses.into();
        transport
    }

    pub fn with_route(self, url_fragment: &str, reply: MockFallback) -> Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .push((url_fragment.to_string(), reply));
        self
    }

    pub fn set_fallback(&self, fallback: MockFallback) {
        self.state.lock().unwrap().fallback = fallback;
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AppError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if let Some(queued) = state.queue.pop_front() {
            return queued;
        }

        let reply = state
            .routes
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| state.fallback.clone());

        match reply {
            MockFallback::Status(status) => Ok(HttpResponse::new(status, state.default_body.clone())),
            MockFallback::Page(body) => Ok(HttpResponse::new(200, body)),
            MockFallback::Timeout => Err(AppError::Timeout(request.timeout.as_secs())),
            MockFallback::Connection => {
                Err(AppError::NetworkError("connection refused".to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Parser that reads the page body as a JSON array of [`RawListing`].
///
/// A listing titled `"!bad"` becomes a per-listing `ParseError`; a body
/// containing `PANIC` panics.
#[derive(Clone, Default)]
pub struct MockParser {
    pages: Arc<Mutex<Vec<String>>>,
}

impl MockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page URLs parsed so far, in order.
    pub fn pages(&self) -> Vec<String> {
        self.pages.lock().unwrap().clone()
    }
}

impl PageParser for MockParser {
    fn parse(
        &self,
        html: &str,
        page_url: &str,
    ) -> Result<Vec<Result<RawListing, AppError>>, AppError> {
        self.pages.lock().unwrap().push(page_url.to_string());
        if html.contains("PANIC") {
            panic!("mock parser asked to panic on {page_url}");
        }
        let listings: Vec<RawListing> = serde_json::from_str(html)
            .map_err(|e| AppError::ParseError(format!("{page_url}: {e}")))?;
        Ok(listings
            .into_iter()
            .map(|l| {
                if l.title == "!bad" {
                    Err(AppError::ParseError("malformed listing".into()))
                } else {
                    Ok(l)
                }
            })
            .collect())
    }
}

/// Serialize listings into a page body [`MockParser`] understands.
pub fn listings_page(listings: &[RawListing]) -> String {
    serde_json::to_string(listings).unwrap()
}

/// A listing that passes the candidate filter.
pub fn sample_listing(title: &str, url: &str) -> RawListing {
    RawListing {
        title: title.to_string(),
        description: format!("{title} supports eligible organisations with funding for local projects."),
        source_url: url.to_string(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    grants: HashMap<(String, String), CanonicalGrant>,
    upserts: usize,
    created_logs: Vec<ScraperRunLog>,
    completed_logs: Vec<ScraperRunLog>,
    fail_upserts_for: Option<String>,
    failing_completions: usize,
}

/// In-memory grant and run-log store.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a grant so the next upsert of its key is an update.
    pub fn seed(&self, grant: CanonicalGrant) {
        let key = (grant.source.clone(), grant.source_url.clone());
        self.state.lock().unwrap().grants.insert(key, grant);
    }

    /// Make every upsert for `source` fail with a database error.
    pub fn fail_upserts_for(&self, source: &str) {
        self.state.lock().unwrap().fail_upserts_for = Some(source.to_string());
    }

    /// Make the next `count` run-log completions fail without being stored.
    pub fn fail_completions(&self, count: usize) {
        self.state.lock().unwrap().failing_completions = count;
    }

    pub fn grants(&self) -> Vec<CanonicalGrant> {
        let mut grants: Vec<_> = self.state.lock().unwrap().grants.values().cloned().collect();
        grants.sort_by(|a, b| (&a.source, &a.source_url).cmp(&(&b.source, &b.source_url)));
        grants
    }

    pub fn upsert_count(&self) -> usize {
        self.state.lock().unwrap().upserts
    }

    pub fn created_logs(&self) -> Vec<ScraperRunLog> {
        self.state.lock().unwrap().created_logs.clone()
    }

    pub fn completed_logs(&self) -> Vec<ScraperRunLog> {
        self.state.lock().unwrap().completed_logs.clone()
    }
}

impl GrantStore for MockStore {
    async fn upsert_grant(&self, grant: &CanonicalGrant) -> Result<UpsertOutcome, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_upserts_for.as_deref() == Some(grant.source.as_str()) {
            return Err(AppError::DatabaseError("connection reset".into()));
        }
        state.upserts += 1;
        let key = (grant.source.clone(), grant.source_url.clone());
        match state.grants.insert(key, grant.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Added),
        }
    }
}

impl RunLogStore for MockStore {
    async fn create_run_log(&self, log: &ScraperRunLog) -> Result<(), AppError> {
        self.state.lock().unwrap().created_logs.push(log.clone());
        Ok(())
    }

    async fn complete_run_log(&self, log: &ScraperRunLog) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_completions > 0 {
            state.failing_completions -= 1;
            return Err(AppError::DatabaseError("run log write failed".into()));
        }
        state.completed_logs.push(log.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records the debug rendering of every event.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded events of the given variant, e.g. `"EndpointFailed"`.
    pub fn count(&self, variant: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.split([' ', '{']).next() == Some(variant))
            .count()
    }
}

impl ScrapeReporter for MockReporter {
    fn report(&self, event: ScrapeEvent<'_>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

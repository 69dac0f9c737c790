//! Scrapes one configured source, endpoint by endpoint.

use std::sync::Arc;

use crate::client::ResilientClient;
use crate::config::{ScraperSourceConfig, SourceCatalog};
use crate::error::AppError;
use crate::events::{ScrapeEvent, ScrapeReporter};
use crate::extract::is_viable_candidate;
use crate::http::HttpTransport;
use crate::models::RawListing;
use crate::throttle::{RateLimiter, ThrottleStats};
use crate::traits::PageParser;

/// Everything one source yielded, before dedup and normalization.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutput {
    pub listings: Vec<RawListing>,
    pub endpoints_visited: usize,
    pub endpoints_failed: usize,
    pub listings_skipped: usize,
    pub throttle: ThrottleStats,
}

pub struct SourceScraper<T: HttpTransport, P: PageParser> {
    source: ScraperSourceConfig,
    client: Arc<ResilientClient<T>>,
    parser: P,
    limiter: RateLimiter,
}

impl<T: HttpTransport, P: PageParser> SourceScraper<T, P> {
    pub fn new(
        source_id: &str,
        catalog: &SourceCatalog,
        client: Arc<ResilientClient<T>>,
        parser: P,
        limiter: RateLimiter,
    ) -> Result<Self, AppError> {
        let source = catalog
            .get(source_id)
            .cloned()
            .ok_or_else(|| AppError::UnknownSource(source_id.to_string()))?;
        Ok(Self {
            source,
            client,
            parser,
            limiter,
        })
    }

    pub fn source(&self) -> &ScraperSourceConfig {
        &self.source
    }

    /// Visit every endpoint in configured order.
    ///
    /// Endpoint and listing failures are reported and skipped, even when
    /// every endpoint fails. Only an allow-list rejection aborts the run.
    pub async fn scrape<R>(&self, reporter: &R) -> Result<ScrapeOutput, AppError>
    where
        R: ScrapeReporter + ?Sized,
    {
        let source_id = self.source.source_id.as_str();
        let mut output = ScrapeOutput::default();

        for endpoint in &self.source.endpoints {
            output.endpoints_visited += 1;

            let waited = self.limiter.acquire().await;
            if !waited.is_zero() {
                reporter.report(ScrapeEvent::Throttled {
                    source: source_id,
                    waited,
                });
            }

            match self.scrape_endpoint(endpoint, reporter, &mut output).await {
                Ok(accepted) => {
                    reporter.report(ScrapeEvent::EndpointFetched {
                        source: source_id,
                        endpoint,
                        listings: accepted,
                    });
                }
                Err(e @ AppError::DomainNotAllowed { .. }) => return Err(e),
                Err(e) => {
                    output.endpoints_failed += 1;
                    let error = e.to_string();
                    reporter.report(ScrapeEvent::EndpointFailed {
                        source: source_id,
                        endpoint,
                        error: &error,
                    });
                }
            }
        }

        output.throttle = self.limiter.stats().await;
        Ok(output)
    }

    /// Fetch and parse one endpoint. Returns how many listings were kept.
    async fn scrape_endpoint<R>(
        &self,
        endpoint: &str,
        reporter: &R,
        output: &mut ScrapeOutput,
    ) -> Result<usize, AppError>
    where
        R: ScrapeReporter + ?Sized,
    {
        let page_url = self.client.url_for(endpoint)?;
        let response = self.client.get(endpoint, &[]).await?;
        let candidates = self.parser.parse(&response.body, page_url.as_str())?;

        let mut accepted = 0;
        for candidate in candidates {
            let skipped = match candidate {
                Ok(listing) if is_viable_candidate(&listing.title, &listing.description) => {
                    output.listings.push(listing);
                    accepted += 1;
                    None
                }
                Ok(_) => Some("failed candidate filter".to_string()),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = skipped {
                output.listings_skipped += 1;
                reporter.report(ScrapeEvent::ListingSkipped {
                    source: &self.source.source_id,
                    endpoint,
                    reason: &reason,
                });
            }
        }
        Ok(accepted)
    }
}

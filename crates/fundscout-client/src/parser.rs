use std::sync::Arc;

use fundscout_core::error::AppError;
use fundscout_core::extract::{collapse_whitespace, extract_listing};
use fundscout_core::models::RawListing;
use fundscout_core::traits::PageParser;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Container selectors tried in order; the first one that matches anything
/// on the page defines the listings.
pub const DEFAULT_CONTAINERS: &[&str] = &[
    ".grant",
    ".grant-item",
    ".funding-item",
    "article",
    ".card",
    ".listing",
    ".search-result",
    "li.result",
    "table tbody tr",
];

const TITLE_SELECTOR: &str = "h1, h2, h3, h4, h5, .title, .grant-title";
const DESCRIPTION_SELECTOR: &str = "p, .description, .summary, td";
const LINK_SELECTOR: &str = "a[href]";

struct Selectors {
    containers: Vec<Selector>,
    title: Selector,
    description: Selector,
    link: Selector,
}

/// Heuristic HTML parser: finds repeated listing containers, then a
/// heading, a description and a link inside each.
#[derive(Clone)]
pub struct HtmlListingParser {
    selectors: Arc<Selectors>,
}

impl HtmlListingParser {
    pub fn new() -> Result<Self, AppError> {
        Self::with_containers(DEFAULT_CONTAINERS)
    }

    pub fn with_containers(containers: &[&str]) -> Result<Self, AppError> {
        let selectors = Selectors {
            containers: containers
                .iter()
                .map(|s| parse_selector(s))
                .collect::<Result<_, _>>()?,
            title: parse_selector(TITLE_SELECTOR)?,
            description: parse_selector(DESCRIPTION_SELECTOR)?,
            link: parse_selector(LINK_SELECTOR)?,
        };
        Ok(Self {
            selectors: Arc::new(selectors),
        })
    }

    fn parse_container(&self, element: ElementRef<'_>, page_url: &Url) -> Result<RawListing, AppError> {
        let s = &self.selectors;

        let title_element = element.select(&s.title).next();
        let title = title_element
            .map(element_text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::ParseError("listing has no heading".into()))?;

        let description = element
            .select(&s.description)
            .filter(|d| Some(d.id()) != title_element.map(|t| t.id()))
            .map(element_text)
            .filter(|t| !t.is_empty() && *t != title)
            .collect::<Vec<_>>()
            .join(" ");

        let source_url = element
            .select(&s.link)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| page_url.join(href).ok())
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or_else(|| page_url.clone());

        let body = element_text(element);
        let description = if description.is_empty() {
            body.replacen(&title, "", 1)
        } else {
            description
        };

        Ok(extract_listing(&title, &description, source_url.as_str(), &body))
    }
}

impl PageParser for HtmlListingParser {
    fn parse(
        &self,
        html: &str,
        page_url: &str,
    ) -> Result<Vec<Result<RawListing, AppError>>, AppError> {
        if html.trim().is_empty() {
            return Err(AppError::ParseError(format!("{page_url}: empty page")));
        }
        let page_url = Url::parse(page_url)
            .map_err(|e| AppError::ParseError(format!("Invalid page URL '{page_url}': {e}")))?;

        let document = Html::parse_document(html);
        for container in &self.selectors.containers {
            let elements: Vec<ElementRef<'_>> = document.select(container).collect();
            if elements.is_empty() {
                continue;
            }
            tracing::debug!(
                page = %page_url,
                candidates = elements.len(),
                "Found listing containers"
            );
            return Ok(elements
                .into_iter()
                .map(|el| self.parse_container(el, &page_url))
                .collect());
        }

        tracing::debug!(page = %page_url, "No listing containers found");
        Ok(Vec::new())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|e| AppError::ParseError(format!("Invalid selector '{selector}': {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

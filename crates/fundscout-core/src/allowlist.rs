//! Outbound domain allow-list.

use url::Url;

use crate::error::AppError;

/// Set of external hostnames the client may talk to.
///
/// A host passes when it equals a listed domain or is a subdomain of one
/// (`sub.example.org` passes for `example.org`; `badexample.org` does not).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainAllowList {
    domains: Vec<String>,
}

impl DomainAllowList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut domains: Vec<String> = domains
            .into_iter()
            .map(|d| normalize_host(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();
        domains.sort();
        domains.dedup();
        Self { domains }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn permits_host(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.domains.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Check an absolute URL. Fails with [`AppError::DomainNotAllowed`]
    /// for hosts off the list, and [`AppError::HttpError`] for unparsable URLs.
    pub fn check_url(&self, url: &Url) -> Result<(), AppError> {
        let host = url
            .host_str()
            .ok_or_else(|| AppError::HttpError(format!("URL has no host: {url}")))?;

        if self.permits_host(host) {
            Ok(())
        } else {
            Err(AppError::DomainNotAllowed {
                host: host.to_string(),
            })
        }
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> DomainAllowList {
        DomainAllowList::new(["grants.gov.au", "Business.gov.au"])
    }

    #[test]
    fn test_exact_domain_passes() {
        assert!(list().permits_host("grants.gov.au"));
        assert!(list().permits_host("business.gov.au"));
    }

    #[test]
    fn test_subdomain_passes() {
        assert!(list().permits_host("www.grants.gov.au"));
        assert!(list().permits_host("api.v2.business.gov.au"));
    }

    #[test]
    fn test_unrelated_and_lookalike_domains_rejected() {
        assert!(!list().permits_host("example.com"));
        assert!(!list().permits_host("evilgrants.gov.au"));
        assert!(!list().permits_host("grants.gov.au.evil.com"));
    }

    #[test]
    fn test_check_url_reports_host() {
        let url = Url::parse("https://example.com/page").unwrap();
        match list().check_url(&url) {
            Err(AppError::DomainNotAllowed { host }) => assert_eq!(host, "example.com"),
            other => panic!("expected DomainNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_list_rejects_everything() {
        let empty = DomainAllowList::default();
        assert!(empty.is_empty());
        assert!(!empty.permits_host("grants.gov.au"));
    }
}

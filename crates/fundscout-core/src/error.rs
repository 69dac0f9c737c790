use std::time::Duration;

use thiserror::Error;

use crate::retry::TransportErrorKind;

/// Application-wide error types for Fundscout.
#[derive(Error, Debug)]
pub enum AppError {
    /// The resolved host is not on the outbound allow-list.
    /// Raised before any network call is attempted.
    #[error("Domain not allowed: {host}")]
    DomainNotAllowed { host: String },

    /// The client's circuit breaker is open.
    /// Raised before any network call is attempted.
    #[error("Circuit breaker '{name}' is open. Retry after {} seconds.", .retry_after.as_secs())]
    CircuitOpen { name: String, retry_after: Duration },

    /// The request could not be built or sent (invalid URL, body error, ...).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The remote answered with a failing status code (>= 400).
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A page or listing could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The source id is not registered in the catalog.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Persistence collaborator failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Transport-level classification used by the retry policy.
    ///
    /// Returns `None` for errors that did not come from the network layer.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            AppError::Timeout(_) => Some(TransportErrorKind::Timeout),
            AppError::NetworkError(_) => Some(TransportErrorKind::Connection),
            AppError::HttpError(_) => Some(TransportErrorKind::Request),
            _ => None,
        }
    }

    /// Returns true for timeouts, connection failures, 5xx, 408 and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Timeout(_) | AppError::NetworkError(_) => true,
            AppError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            _ => false,
        }
    }

    /// Returns true for 4xx responses other than 408/429. Never retried.
    pub fn is_permanent_request_error(&self) -> bool {
        matches!(self, AppError::HttpStatus { status, .. } if (400..500).contains(status))
            && !self.is_transient()
    }

    /// Returns true for errors raised pre-flight, where no network call was made.
    pub fn is_preflight_rejection(&self) -> bool {
        matches!(
            self,
            AppError::DomainNotAllowed { .. } | AppError::CircuitOpen { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(AppError::NetworkError("reset".into()).is_transient());
        assert!(AppError::Timeout(30).is_transient());
        assert!(
            AppError::HttpStatus {
                status: 503,
                url: "https://example.com".into()
            }
            .is_transient()
        );
        assert!(
            AppError::HttpStatus {
                status: 429,
                url: "https://example.com".into()
            }
            .is_transient()
        );
        assert!(!AppError::ParseError("bad html".into()).is_transient());
    }

    #[test]
    fn test_permanent_request_errors() {
        let not_found = AppError::HttpStatus {
            status: 404,
            url: "https://example.com/missing".into(),
        };
        assert!(not_found.is_permanent_request_error());
        assert!(!not_found.is_transient());

        let throttled = AppError::HttpStatus {
            status: 429,
            url: "https://example.com".into(),
        };
        assert!(!throttled.is_permanent_request_error());
    }

    #[test]
    fn test_transport_kind() {
        assert_eq!(
            AppError::Timeout(5).transport_kind(),
            Some(TransportErrorKind::Timeout)
        );
        assert_eq!(
            AppError::NetworkError("refused".into()).transport_kind(),
            Some(TransportErrorKind::Connection)
        );
        assert_eq!(AppError::UnknownSource("x".into()).transport_kind(), None);
    }

    #[test]
    fn test_circuit_open_message() {
        let err = AppError::CircuitOpen {
            name: "grants".into(),
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(
            err.to_string(),
            "Circuit breaker 'grants' is open. Retry after 42 seconds."
        );
        assert!(err.is_preflight_rejection());
    }
}

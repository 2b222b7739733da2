//! Error taxonomy for the scrape pipeline
//!
//! Every failure is scoped to one unit of work (one URL, one product, one
//! catalog query) and carries enough context for the caller to log or retry it.

use thiserror::Error;

use crate::domain::{NaturalKey, UrlError};

/// Single fetch failure. Retry decisions are made on this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("empty response body from {url}")]
    EmptyResponse { url: String },

    #[error("suspicious response from {url}: {reason}")]
    SuspiciousResponse { url: String, reason: String },

    #[error("request cancelled: {url}")]
    Cancelled { url: String },
}

impl FetchError {
    /// Whether another attempt may succeed. HTTP statuses are decided by the client policy.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::EmptyResponse { .. } | Self::SuspiciousResponse { .. }
        )
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NETWORK_ERROR",
            Self::HttpStatus { .. } => "HTTP_STATUS_ERROR",
            Self::EmptyResponse { .. } => "EMPTY_RESPONSE",
            Self::SuspiciousResponse { .. } => "SUSPICIOUS_RESPONSE",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }
}

/// The last fetch error once the retry budget is spent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct FetchFailure {
    pub error: FetchError,
    pub attempts: u32,
}

/// A required field exhausted every extraction strategy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("required field '{field}' not found (tried: {})", .tried.join(", "))]
    RequiredFieldMissing {
        field: &'static str,
        tried: Vec<&'static str>,
    },

    #[error("page URL is not usable: {0}")]
    InvalidPageUrl(#[from] UrlError),
}

impl ExtractionError {
    pub fn required_field_missing(field: &'static str, tried: Vec<&'static str>) -> Self {
        Self::RequiredFieldMissing { field, tried }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field '{0}' is missing or blank")]
    MissingField(&'static str),

    #[error("price {price} outside allowed range [0, {ceiling}]")]
    PriceOutOfRange { price: i64, ceiling: i64 },

    #[error("source URL rejected: {0}")]
    InvalidSourceUrl(#[from] UrlError),
}

/// Transactional failure. The transaction is rolled back before this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("persistence failed during {operation}{}: {message}", .key.as_ref().map(|k| format!(" for {k}")).unwrap_or_default())]
pub struct PersistenceError {
    pub operation: &'static str,
    pub key: Option<String>,
    pub message: String,
}

impl PersistenceError {
    pub fn new(operation: &'static str, error: impl std::fmt::Display) -> Self {
        Self {
            operation,
            key: None,
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: &NaturalKey) -> Self {
        self.key = Some(key.to_string());
        self
    }

    #[must_use]
    pub fn with_product(mut self, product_id: i64) -> Self {
        self.key = Some(format!("product#{product_id}"));
        self
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self {
            operation: "lookup",
            key: Some(format!("{entity}#{id}")),
            message: format!("{entity} {id} does not exist"),
        }
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Failure of one scrape task, whatever stage it happened in
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("task cancelled before completion")]
    Cancelled,
}

impl PipelineError {
    /// Stable code surfaced in scrape results
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Fetch(failure) => failure.error.error_code(),
            Self::Extraction(_) => "EXTRACTION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether re-running the whole task may succeed
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(failure) => match failure.error.status() {
                Some(status) => status == 429 || status >= 500,
                None => failure.error.is_transient(),
            },
            Self::Persistence(_) => true,
            Self::Extraction(_) | Self::Validation(_) | Self::Cancelled => false,
        }
    }

    /// Retries spent by the fetch stage (attempts beyond the first)
    pub const fn retry_count(&self) -> u32 {
        match self {
            Self::Fetch(failure) => failure.attempts.saturating_sub(1),
            _ => 0,
        }
    }

    /// Cancelled directly or while a fetch was in flight
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Fetch(FetchFailure { error: FetchError::Cancelled { .. }, .. }))
    }

    pub const fn http_status(&self) -> Option<u16> {
        match self {
            Self::Fetch(failure) => failure.error.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Platform;

    #[test]
    fn error_codes_follow_the_failing_stage() {
        let fetch = PipelineError::from(FetchFailure {
            error: FetchError::HttpStatus { url: "https://x".into(), status: 404 },
            attempts: 1,
        });
        assert_eq!(fetch.error_code(), "HTTP_STATUS_ERROR");
        assert_eq!(fetch.http_status(), Some(404));
        assert_eq!(fetch.retry_count(), 0);

        let extraction = PipelineError::from(ExtractionError::required_field_missing("price", vec!["meta"]));
        assert_eq!(extraction.error_code(), "EXTRACTION_ERROR");
        assert!(extraction.to_string().contains("price"));
        assert!(!extraction.is_retryable());
        assert!(!fetch.is_retryable());
    }

    #[test]
    fn persistence_error_carries_natural_key() {
        let key = NaturalKey { platform: Platform::Mercari, source_item_id: "m123".into() };
        let error = PersistenceError::new("save_listing", "disk I/O error").with_key(&key);
        assert_eq!(error.to_string(), "persistence failed during save_listing for mercari:m123: disk I/O error");
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Network { url: "u".into(), message: "reset".into() }.is_transient());
        assert!(FetchError::EmptyResponse { url: "u".into() }.is_transient());
        assert!(!FetchError::HttpStatus { url: "u".into(), status: 404 }.is_transient());
        assert!(!FetchError::Cancelled { url: "u".into() }.is_transient());
    }
}

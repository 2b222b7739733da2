//! # Domain Value Objects
//!
//! Immutable value types defined by their attributes rather than identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated http(s) URL value object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    is_secure: bool,
    domain: String,
}

impl ValidatedUrl {
    /// Creates a new validated URL
    ///
    /// # Errors
    /// Returns error if the URL is empty, malformed, not http(s) or has no host
    pub fn new(url: &str) -> Result<Self, UrlError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        let parsed = url::Url::parse(trimmed).map_err(|_| UrlError::InvalidFormat)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let domain = parsed.host_str().ok_or(UrlError::NoDomain)?.to_lowercase();
        let is_secure = parsed.scheme() == "https";

        Ok(Self {
            url: parsed.to_string(),
            is_secure,
            domain,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// Returns true if the URL belongs to the given domain or one of its subdomains
    #[must_use]
    pub fn is_from_domain(&self, domain: &str) -> bool {
        self.domain == domain || self.domain.ends_with(&format!(".{domain}"))
    }

    /// Canonical form used for hashing: no fragment, no trailing slash.
    /// Scheme and host are already lower-cased by the parser.
    #[must_use]
    pub fn normalized(&self) -> String {
        let without_fragment = self.url.split('#').next().unwrap_or(&self.url);
        without_fragment.trim_end_matches('/').to_string()
    }
}

impl fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// URL validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("URL cannot be empty")]
    Empty,
    #[error("URL format is invalid")]
    InvalidFormat,
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL must have a valid domain")]
    NoDomain,
}

/// Deterministic key derived from the source URL.
///
/// Used for idempotent references and to namespace downloaded images.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductKey(String);

impl ProductKey {
    const LEN: usize = 16;

    #[must_use]
    pub fn from_url(url: &ValidatedUrl) -> Self {
        let digest = blake3::hash(url.normalized().as_bytes());
        Self(digest.to_hex()[..Self::LEN].to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

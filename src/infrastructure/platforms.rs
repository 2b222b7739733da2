//! Marketplace capability profiles
//!
//! Each marketplace is one `PlatformProfile` value: host matching, item-id
//! extraction, selector sets, labels, sold markers and a payload extractor.
//! `PlatformRegistry` resolves a URL to its profile, falling back to `generic`.

pub mod generic;
pub mod mercari;
pub mod rakuma;
pub mod yahoo_auctions;

use serde_json::{Map, Value};

use crate::domain::{Platform, ValidatedUrl};
use crate::infrastructure::parsing::PageContext;

/// Ordered CSS selector lists, most specific first
#[derive(Debug)]
pub struct FieldSelectors {
    pub title: &'static [&'static str],
    pub price: &'static [&'static str],
    pub description: &'static [&'static str],
    pub condition: &'static [&'static str],
    pub category: &'static [&'static str],
    pub seller_name: &'static [&'static str],
    pub seller_rating: &'static [&'static str],
    pub images: &'static [&'static str],
    /// Presence of any of these means the listing is closed
    pub sold_out: &'static [&'static str],
}

/// `dt`/`th` labels for fields shown in label tables
#[derive(Debug)]
pub struct FieldLabels {
    pub condition: &'static [&'static str],
    pub category: &'static [&'static str],
}

pub type PayloadExtractor = fn(&PageContext<'_>) -> Map<String, Value>;

pub struct PlatformProfile {
    pub platform: Platform,
    /// Registrable domains; subdomains match too
    pub hosts: &'static [&'static str],
    pub item_id: fn(&ValidatedUrl) -> Option<String>,
    pub selectors: FieldSelectors,
    pub labels: FieldLabels,
    pub default_category: &'static str,
    /// Visible-text markers of a sold or ended listing
    pub sold_markers: &'static [&'static str],
    pub payload: PayloadExtractor,
}

impl PlatformProfile {
    pub fn matches(&self, url: &ValidatedUrl) -> bool {
        self.hosts.iter().any(|host| url.is_from_domain(host))
    }
}

impl std::fmt::Debug for PlatformProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformProfile")
            .field("platform", &self.platform)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

/// Lookup table from URL host to platform profile
#[derive(Debug)]
pub struct PlatformRegistry {
    profiles: Vec<&'static PlatformProfile>,
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self {
            profiles: vec![&yahoo_auctions::PROFILE, &mercari::PROFILE, &rakuma::PROFILE],
        }
    }
}

impl PlatformRegistry {
    pub fn resolve(&self, url: &ValidatedUrl) -> &'static PlatformProfile {
        self.profiles
            .iter()
            .copied()
            .find(|profile| profile.matches(url))
            .unwrap_or(&generic::PROFILE)
    }

    pub fn get(&self, platform: Platform) -> &'static PlatformProfile {
        self.profiles
            .iter()
            .copied()
            .find(|profile| profile.platform == platform)
            .unwrap_or(&generic::PROFILE)
    }
}

/// Capture group 1 of `pattern` against the URL path
pub(crate) fn capture_from_path(pattern: &regex::Regex, url: &ValidatedUrl) -> Option<String> {
    let path = url::Url::parse(url.as_str()).ok()?.path().to_string();
    pattern
        .captures(&path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Insert `value` under `key` when present
pub(crate) fn put(payload: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        payload.insert(key.to_string(), value);
    }
}

//! Listing detail extraction
//!
//! `ExtractionPipeline` turns one fetched page into an `ExtractedListing` by
//! running each field's strategy chain over a shared `PageContext`. Required
//! fields (title, price, source URL) fail the whole record when every strategy
//! comes up empty; optional fields fall back to defaults.
//!
//! Extraction is synchronous: the parsed document is not `Send`, so callers
//! finish extracting before the next `.await`.

use tracing::{debug, warn};

use super::PageContext;
use super::images::dedupe_images;
use super::strategies::{self, Strategy, is_plausible_price, is_plausible_source_url, is_plausible_title};
use crate::domain::{Condition, ExtractedListing, SellerInfo, UrlError, ValidatedUrl};
use crate::infrastructure::config::ExtractionConfig;
use crate::infrastructure::pipeline_error::ExtractionError;
use crate::infrastructure::platforms::PlatformRegistry;

/// Stock reported for an open listing without an explicit quantity
const DEFAULT_STOCK: i64 = 1;

pub struct ExtractionPipeline {
    registry: PlatformRegistry,
    config: ExtractionConfig,
}

impl ExtractionPipeline {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            registry: PlatformRegistry::default(),
            config,
        }
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract a candidate listing from the HTML served at `page_url`
    pub fn extract(&self, page_url: &str, html: &str) -> Result<ExtractedListing, ExtractionError> {
        let url = ValidatedUrl::new(page_url)?;
        let profile = self.registry.resolve(&url);
        let page = PageContext::new(html, &url, profile).ok_or(UrlError::InvalidFormat)?;
        let mut trace = Vec::new();

        let title = required(&page, "title", strategies::TITLE, &mut trace, |title| is_plausible_title(title))?;
        let ceiling = self.config.price_ceiling;
        let price = required(&page, "price", strategies::PRICE, &mut trace, |price| {
            is_plausible_price(*price, ceiling)
        })?;
        let source_url = required(&page, "sourceUrl", strategies::SOURCE_URL, &mut trace, |candidate| {
            is_plausible_source_url(candidate)
        })?;

        let description =
            optional(&page, "description", strategies::DESCRIPTION, &mut trace, |text| !text.trim().is_empty())
                .unwrap_or_default();
        let condition =
            optional(&page, "condition", strategies::CONDITION, &mut trace, |_| true).unwrap_or(Condition::Used);
        let category = optional(&page, "category", strategies::CATEGORY, &mut trace, |text| !text.trim().is_empty())
            .unwrap_or_else(|| profile.default_category.to_string());
        let seller = SellerInfo {
            name: optional(&page, "seller", strategies::SELLER_NAME, &mut trace, |name| !name.trim().is_empty()),
            rating: optional(&page, "sellerRating", strategies::SELLER_RATING, &mut trace, |rating| {
                rating.is_finite() && *rating >= 0.0
            }),
        };
        let sold_out = optional(&page, "soldOut", strategies::SOLD_OUT, &mut trace, |sold| *sold).unwrap_or(false);
        let images = self.collect_images(&page);
        let platform_payload = (profile.payload)(&page);

        // Prefer the id in the fetched URL; the canonical link may drop it
        let source_item_id = (profile.item_id)(&url).or_else(|| {
            ValidatedUrl::new(&source_url)
                .ok()
                .and_then(|canonical| (profile.item_id)(&canonical))
        });

        debug!(
            url = %url,
            platform = %profile.platform,
            price,
            sold_out,
            images = images.len(),
            strategies = ?trace,
            "Listing extracted"
        );

        Ok(ExtractedListing {
            platform: profile.platform,
            source_item_id,
            source_url,
            title,
            description,
            price,
            condition,
            category,
            images,
            seller,
            stock: if sold_out { 0 } else { DEFAULT_STOCK },
            sold_out,
            platform_payload,
            strategy_trace: trace,
        })
    }

    /// Union of every image strategy, in strategy order, validated and capped
    fn collect_images(&self, page: &PageContext<'_>) -> Vec<String> {
        let candidates = strategies::IMAGES
            .iter()
            .filter_map(|(_, strategy)| strategy(page))
            .flatten();
        dedupe_images(candidates, self.config.max_images)
    }
}

/// First plausible value of a required field, or an error naming every strategy tried
fn required<T>(
    page: &PageContext<'_>,
    field: &'static str,
    chain: &[Strategy<T>],
    trace: &mut Vec<(&'static str, &'static str)>,
    plausible: impl Fn(&T) -> bool,
) -> Result<T, ExtractionError> {
    optional(page, field, chain, trace, plausible).ok_or_else(|| {
        let tried = chain.iter().map(|(name, _)| *name).collect();
        warn!(url = %page.url, field, "Required field not found");
        ExtractionError::required_field_missing(field, tried)
    })
}

fn optional<T>(
    page: &PageContext<'_>,
    field: &'static str,
    chain: &[Strategy<T>],
    trace: &mut Vec<(&'static str, &'static str)>,
    plausible: impl Fn(&T) -> bool,
) -> Option<T> {
    chain.iter().find_map(|(name, strategy)| {
        let value = strategy(page).filter(|value| plausible(value))?;
        trace.push((field, *name));
        Some(value)
    })
}

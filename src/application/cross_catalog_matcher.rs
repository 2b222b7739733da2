//! Cross-catalog matching
//!
//! A product's title is reduced to keywords, a brand and model numbers; a few
//! catalog queries are built from those and every returned item is scored on
//! title overlap, brand agreement and price proximity. Qualifying candidates
//! atomically replace the product's stored match set.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::dto::{MatchResult, RefreshMatchesReport};
use super::title_analysis::{TitleAnalysis, clean_title, detect_brand, jaccard, keyword_set};
use crate::domain::{CatalogItem, MatchCandidate, MatchType, PriceComparison, Product, ScoreBreakdown};
use crate::infrastructure::backoff::Delay;
use crate::infrastructure::catalog_client::{CatalogError, CatalogSearch};
use crate::infrastructure::config::MatchingConfig;
use crate::infrastructure::cross_reference_repository::CrossReferenceRepository;
use crate::infrastructure::pipeline_error::PersistenceError;
use crate::infrastructure::product_repository::ProductRepository;

/// Currency the source marketplaces price in
const SOURCE_CURRENCY: &str = "JPY";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Every query failed; the stored match set is left as it was
    #[error("catalog unavailable: all {attempted} queries failed")]
    CatalogUnavailable { attempted: usize },

    #[error("matching cancelled")]
    Cancelled,
}

pub struct CrossCatalogMatcher {
    products: ProductRepository,
    cross_refs: CrossReferenceRepository,
    catalog: Arc<dyn CatalogSearch>,
    delay: Arc<dyn Delay>,
    config: MatchingConfig,
}

impl CrossCatalogMatcher {
    pub fn new(
        products: ProductRepository,
        cross_refs: CrossReferenceRepository,
        catalog: Arc<dyn CatalogSearch>,
        delay: Arc<dyn Delay>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            products,
            cross_refs,
            catalog,
            delay,
            config,
        }
    }

    /// Search the catalog for a product, score, persist qualifying matches
    #[instrument(skip(self, cancel))]
    pub async fn find_matches(&self, product_id: i64, cancel: &CancellationToken) -> Result<MatchResult, MatchError> {
        let product = self.products.require_product(product_id).await?;
        let analysis = TitleAnalysis::new(&product.title, self.config.max_keywords);
        let queries = analysis.queries();
        debug!(?queries, brand = ?analysis.brand, models = ?analysis.models, "Catalog queries built");

        let items = self.search_all(&queries, cancel).await?;
        let mut candidates: Vec<MatchCandidate> = items
            .into_iter()
            .map(|item| self.score(&product, &analysis, item))
            .filter(|candidate| candidate.confidence >= self.config.confidence_threshold)
            .collect();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let stored = self.cross_refs.replace_for_product(product_id, &candidates).await?;
        info!(
            product_id,
            candidates = candidates.len(),
            stored = stored.len(),
            "Match set replaced"
        );

        Ok(MatchResult {
            product_id,
            candidates,
            matched_at: Utc::now(),
        })
    }

    /// Re-match active products whose match set is missing or older than `max_age_days`
    pub async fn refresh_stale_matches(
        &self,
        max_age_days: i64,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<RefreshMatchesReport, MatchError> {
        let cutoff = Utc::now() - ChronoDuration::days(max_age_days.max(0));
        let stale = self.cross_refs.stale_products(cutoff, limit).await?;
        let mut report = RefreshMatchesReport {
            examined: stale.len(),
            refreshed: 0,
            errors: 0,
            matches: 0,
        };

        for product_id in stale {
            if cancel.is_cancelled() {
                break;
            }
            match self.find_matches(product_id, cancel).await {
                Ok(result) => {
                    report.refreshed += 1;
                    report.matches += result.candidates.len();
                }
                Err(MatchError::Cancelled) => break,
                Err(e) => {
                    warn!(product_id, error = %e, "Re-matching failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            refreshed = report.refreshed,
            errors = report.errors,
            "Stale matches refreshed"
        );
        Ok(report)
    }

    /// Run every query with a pause in between; failed queries are skipped
    async fn search_all(&self, queries: &[String], cancel: &CancellationToken) -> Result<Vec<CatalogItem>, MatchError> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut failures = 0;

        for (index, query) in queries.iter().enumerate() {
            if index > 0 && !self.delay.sleep(Duration::from_millis(self.config.query_delay_ms), cancel).await {
                return Err(MatchError::Cancelled);
            }

            match self.catalog.search(query, self.config.results_per_query, cancel).await {
                Ok(found) => {
                    debug!(query = %query, results = found.len(), "Catalog query done");
                    items.extend(found.into_iter().filter(|item| seen.insert(item.external_id.clone())));
                }
                Err(CatalogError::Cancelled) => return Err(MatchError::Cancelled),
                Err(e) => {
                    warn!(query = %query, error = %e, "Catalog query failed, skipping");
                    failures += 1;
                }
            }
        }

        if !queries.is_empty() && failures == queries.len() {
            return Err(MatchError::CatalogUnavailable { attempted: failures });
        }
        Ok(items)
    }

    /// Weighted confidence of one catalog item against the product
    pub fn score(&self, product: &Product, analysis: &TitleAnalysis, item: CatalogItem) -> MatchCandidate {
        let source_keywords = keyword_set(&analysis.cleaned);
        let item_keywords = keyword_set(&clean_title(&item.title));
        let title_similarity = jaccard(&source_keywords, &item_keywords);

        let item_brand = item.brand.clone().or_else(|| detect_brand(&item.title).map(str::to_string));
        let brand_match = brand_score(analysis.brand, item_brand.as_deref());

        let price_comparison = self.compare_price(product.price, &item);
        let price_range_score = price_score(&price_comparison);

        let confidence = (self.config.title_weight * title_similarity
            + self.config.brand_weight * brand_match
            + self.config.price_weight * price_range_score)
            .clamp(0.0, 1.0);

        MatchCandidate {
            item,
            confidence,
            match_type: MatchType::from_confidence(confidence),
            breakdown: ScoreBreakdown {
                title_similarity,
                brand_match,
                price_range_score,
            },
            price_comparison,
        }
    }

    fn compare_price(&self, source_price: i64, item: &CatalogItem) -> PriceComparison {
        let same_currency = item
            .currency
            .as_deref()
            .is_some_and(|currency| currency.eq_ignore_ascii_case(SOURCE_CURRENCY));
        let exchange_rate = if same_currency { 1.0 } else { self.config.exchange_rate };

        let converted_price = item.price.filter(|p| *p > 0.0).map(|p| p * exchange_rate);
        let price_gap = converted_price.map(|converted| converted - source_price as f64);
        let price_gap_percent = price_gap
            .filter(|_| source_price > 0)
            .map(|gap| (gap / source_price as f64 * 1000.0).round() / 10.0);

        PriceComparison {
            source_price,
            catalog_price: item.price,
            catalog_currency: item.currency.clone(),
            converted_price,
            exchange_rate,
            price_gap,
            price_gap_percent,
        }
    }
}

/// 1.0 exact, 0.8 partial, 0.5 both unknown, 0.3 one unknown, 0 mismatch
fn brand_score(source: Option<&str>, candidate: Option<&str>) -> f64 {
    match (source, candidate.map(str::trim).filter(|b| !b.is_empty())) {
        (None, None) => 0.5,
        (Some(_), None) | (None, Some(_)) => 0.3,
        (Some(a), Some(b)) => {
            let a = a.to_lowercase();
            let b = b.to_lowercase();
            if a == b {
                1.0
            } else if a.contains(&b) || b.contains(&a) {
                0.8
            } else {
                0.0
            }
        }
    }
}

/// Relative gap between source and converted catalog price
fn price_score(comparison: &PriceComparison) -> f64 {
    let (Some(converted), true) = (comparison.converted_price, comparison.source_price > 0) else {
        return 0.5;
    };
    let gap = (converted - comparison.source_price as f64).abs() / comparison.source_price as f64;
    if gap <= 0.10 {
        1.0
    } else if gap <= 0.30 {
        0.8
    } else if gap <= 0.50 {
        0.5
    } else {
        0.2
    }
}

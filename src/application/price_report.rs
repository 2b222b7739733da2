//! Portfolio-level price report over the monitored products

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::price_trend::{PriceTrendAnalyzer, TrendAnalysis, TrendDirection};
use crate::domain::Platform;
use crate::infrastructure::pipeline_error::PersistenceResult;
use crate::infrastructure::product_repository::ProductRepository;

pub const DEFAULT_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPriceEntry {
    pub product_id: i64,
    pub title: String,
    pub platform: Platform,
    pub current_price: i64,
    pub trend: TrendAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatileProduct {
    pub product_id: i64,
    pub title: String,
    pub volatility: f64,
}

/// How many products trend each way
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrendCounts {
    pub rising: usize,
    pub falling: usize,
    pub stable: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_products: usize,
    pub avg_volatility: f64,
    pub most_volatile: Option<VolatileProduct>,
    pub price_trend: TrendCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceReport {
    pub report_data: Vec<ProductPriceEntry>,
    pub summary: ReportSummary,
    pub period_days: i64,
    pub generated_at: DateTime<Utc>,
}

pub struct PriceReporter {
    products: ProductRepository,
    analyzer: Arc<PriceTrendAnalyzer>,
}

impl PriceReporter {
    pub fn new(products: ProductRepository, analyzer: Arc<PriceTrendAnalyzer>) -> Self {
        Self { products, analyzer }
    }

    /// Trend every active product (or the given ones) over `period_days`
    pub async fn generate_price_report(
        &self,
        product_ids: Option<&[i64]>,
        period_days: i64,
    ) -> PersistenceResult<PriceReport> {
        let ids = self.products.active_product_ids(product_ids).await?;
        let mut report_data = Vec::with_capacity(ids.len());

        for product_id in ids {
            let Some(product) = self.products.get_product(product_id).await? else {
                warn!(product_id, "Product vanished while building report");
                continue;
            };
            let current_price = self
                .products
                .get_inventory(product_id)
                .await?
                .map_or(product.price, |inventory| inventory.current_price);
            let trend = self
                .analyzer
                .analyze_trend_over(product_id, current_price, period_days)
                .await?;

            report_data.push(ProductPriceEntry {
                product_id,
                title: product.title,
                platform: product.platform,
                current_price,
                trend,
            });
        }

        let summary = summarize(&report_data);
        info!(
            products = summary.total_products,
            avg_volatility = summary.avg_volatility,
            "Price report generated"
        );

        Ok(PriceReport {
            report_data,
            summary,
            period_days,
            generated_at: Utc::now(),
        })
    }
}

pub fn summarize(entries: &[ProductPriceEntry]) -> ReportSummary {
    let mut counts = TrendCounts::default();
    for entry in entries {
        match entry.trend.direction {
            TrendDirection::Rising => counts.rising += 1,
            TrendDirection::Falling => counts.falling += 1,
            TrendDirection::Stable => counts.stable += 1,
        }
    }

    let avg_volatility = if entries.is_empty() {
        0.0
    } else {
        entries.iter().map(|e| e.trend.volatility).sum::<f64>() / entries.len() as f64
    };

    let most_volatile = entries
        .iter()
        .filter(|e| e.trend.volatility > 0.0)
        .max_by(|a, b| a.trend.volatility.total_cmp(&b.trend.volatility))
        .map(|e| VolatileProduct {
            product_id: e.product_id,
            title: e.title.clone(),
            volatility: e.trend.volatility,
        });

    ReportSummary {
        total_products: entries.len(),
        avg_volatility,
        most_volatile,
        price_trend: counts,
    }
}

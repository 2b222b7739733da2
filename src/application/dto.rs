//! Result objects returned to callers of the application services
//!
//! Everything here serializes to the camelCase JSON the binary prints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ChangeType, MatchCandidate, Platform, UrlStatus, ValidatedListing};
use crate::infrastructure::image_store::ImageDownloadReport;
use crate::infrastructure::pipeline_error::PipelineError;
use crate::infrastructure::product_repository::{SaveOutcome, SaveReport};

// ============================================================================
// Scrape
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeOptions {
    /// Refresh an existing product instead of skipping it
    pub force: bool,
    pub download_images: bool,
}

/// Outcome of one URL through fetch, extraction, validation and persistence
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub success: bool,
    pub url: String,
    pub platform: Platform,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SaveOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ValidatedListing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<ImageDownloadReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl ScrapeResult {
    pub fn succeeded(
        url: &str,
        report: &SaveReport,
        listing: ValidatedListing,
        images: Option<ImageDownloadReport>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            success: true,
            url: url.to_string(),
            platform: listing.platform,
            processing_time_ms,
            outcome: Some(report.outcome),
            product_id: Some(report.product_id),
            inventory_id: report.inventory_id,
            data: Some(listing),
            images,
            error: None,
            error_code: None,
            http_status: None,
            retry_count: None,
        }
    }

    pub fn failed(url: &str, platform: Platform, error: &PipelineError, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            platform,
            processing_time_ms,
            outcome: None,
            product_id: None,
            inventory_id: None,
            data: None,
            images: None,
            error: Some(error.to_string()),
            error_code: Some(error.error_code()),
            http_status: error.http_status(),
            retry_count: Some(error.retry_count()),
        }
    }
}

// ============================================================================
// Batch
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub scrape: ScrapeOptions,
    /// Worker count; 1 processes URLs strictly in order
    pub concurrency: usize,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: usize,
    /// Tasks that ran to an outcome (successful + failed)
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Tasks never started because the run was cancelled
    pub cancelled: usize,
    /// successful / total as a percentage, one decimal
    pub success_rate: f64,
    pub results: Vec<ScrapeResult>,
}

impl BatchReport {
    /// `results` holds one entry per URL; `cancelled` of them never started
    pub fn from_results(total: usize, results: Vec<ScrapeResult>, cancelled: usize) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let processed = results.len().saturating_sub(cancelled);

        Self {
            total,
            processed,
            successful,
            failed: processed.saturating_sub(successful),
            cancelled,
            success_rate: percentage(successful, total),
            results,
        }
    }
}

/// `part / whole` as a percentage rounded to one decimal; 0 for an empty whole
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

// ============================================================================
// Inventory monitoring
// ============================================================================

/// One detected change during a monitoring run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryChange {
    pub product_id: i64,
    pub change_type: Option<ChangeType>,
    pub old_price: i64,
    pub new_price: i64,
    pub old_stock: i64,
    pub new_stock: i64,
    pub url_status: UrlStatus,
    pub change_percent: f64,
    pub significant: bool,
    pub major: bool,
    pub history_written: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryCheckReport {
    pub total: usize,
    pub checked: usize,
    pub updated: usize,
    pub errors: usize,
    pub changes: Vec<InventoryChange>,
}

// ============================================================================
// Matching
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMatchesReport {
    pub examined: usize,
    pub refreshed: usize,
    pub errors: usize,
    pub matches: usize,
}

/// Matches for one product, as returned by `match`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub product_id: i64,
    pub candidates: Vec<MatchCandidate>,
    pub matched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pipeline_error::{FetchError, FetchFailure};

    fn failure(code_error: FetchError, attempts: u32) -> ScrapeResult {
        let error = PipelineError::Fetch(FetchFailure { error: code_error, attempts });
        ScrapeResult::failed("https://example.com/x", Platform::Generic, &error, 5)
    }

    #[test]
    fn percentage_rounds_to_one_decimal() {
        assert_eq!(percentage(7, 10), 70.0);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn failed_result_carries_code_status_and_retries() {
        let result = failure(
            FetchError::HttpStatus {
                url: "https://example.com/x".into(),
                status: 404,
            },
            1,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorCode"], "HTTP_STATUS_ERROR");
        assert_eq!(json["httpStatus"], 404);
        assert_eq!(json["retryCount"], 0);
        assert!(json.get("productId").is_none());
    }
}

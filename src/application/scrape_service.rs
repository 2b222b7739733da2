//! Single-URL scrape: fetch, extract, validate, persist
//!
//! Failures at any stage come back as a failed `ScrapeResult`; nothing is
//! written unless the listing validated.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::dto::{ScrapeOptions, ScrapeResult};
use super::validator::ListingValidator;
use crate::domain::{ExtractedListing, Platform, ValidatedListing, ValidatedUrl};
use crate::infrastructure::http_client::{FetchClient, PageSource};
use crate::infrastructure::image_store::{ImageDownloadReport, ImageStore};
use crate::infrastructure::parsing::ExtractionPipeline;
use crate::infrastructure::pipeline_error::PipelineError;
use crate::infrastructure::product_repository::{ProductRepository, SaveMode, SaveOutcome, SaveReport};

/// Fetch client and target directory for `download_images`
pub struct ImageDownloader {
    pub client: Arc<FetchClient>,
    pub store: ImageStore,
}

pub struct ScrapeService {
    source: Arc<dyn PageSource>,
    extractor: Arc<ExtractionPipeline>,
    validator: ListingValidator,
    products: ProductRepository,
    images: Option<ImageDownloader>,
}

impl ScrapeService {
    pub fn new(
        source: Arc<dyn PageSource>,
        extractor: Arc<ExtractionPipeline>,
        validator: ListingValidator,
        products: ProductRepository,
    ) -> Self {
        Self {
            source,
            extractor,
            validator,
            products,
            images: None,
        }
    }

    #[must_use]
    pub fn with_image_downloader(mut self, downloader: ImageDownloader) -> Self {
        self.images = Some(downloader);
        self
    }

    /// Fetch and extract without persisting; the monitor re-verifies through this
    pub async fn fetch_listing(&self, url: &str, cancel: &CancellationToken) -> Result<ValidatedListing, PipelineError> {
        let page = self.source.fetch(url, cancel).await?;
        let extracted = self.extract(&page.url, &page.body)?;
        Ok(self.validator.validate(extracted)?)
    }

    #[instrument(skip(self, cancel), fields(force = options.force))]
    pub async fn scrape_product(&self, url: &str, options: ScrapeOptions, cancel: &CancellationToken) -> ScrapeResult {
        let started = Instant::now();

        match self.scrape(url, options, cancel).await {
            Ok((report, listing, images)) => {
                info!(
                    product_id = report.product_id,
                    outcome = ?report.outcome,
                    platform = %listing.platform,
                    "Scrape finished"
                );
                ScrapeResult::succeeded(url, &report, listing, images, elapsed_ms(started))
            }
            Err(error) => {
                warn!(error = %error, code = error.error_code(), "Scrape failed");
                ScrapeResult::failed(url, self.platform_of(url), &error, elapsed_ms(started))
            }
        }
    }

    /// Platform the URL resolves to, `Generic` for unusable URLs
    pub fn platform_of(&self, url: &str) -> Platform {
        ValidatedUrl::new(url)
            .map(|url| self.extractor.registry().resolve(&url).platform)
            .unwrap_or(Platform::Generic)
    }

    async fn scrape(
        &self,
        url: &str,
        options: ScrapeOptions,
        cancel: &CancellationToken,
    ) -> Result<(SaveReport, ValidatedListing, Option<ImageDownloadReport>), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let listing = self.fetch_listing(url, cancel).await?;
        let report = self
            .products
            .save_listing(&listing, SaveMode::from_force(options.force))
            .await?;

        let images = if options.download_images && report.outcome != SaveOutcome::DuplicateSkip {
            self.download_images(&listing, cancel).await
        } else {
            None
        };

        Ok((report, listing, images))
    }

    /// Synchronous so the parsed document never lives across an await
    fn extract(&self, page_url: &str, html: &str) -> Result<ExtractedListing, PipelineError> {
        Ok(self.extractor.extract(page_url, html)?)
    }

    async fn download_images(&self, listing: &ValidatedListing, cancel: &CancellationToken) -> Option<ImageDownloadReport> {
        let Some(downloader) = &self.images else {
            warn!("Image download requested but no image store is configured");
            return None;
        };
        let report = downloader
            .store
            .download_all(&downloader.client, &listing.product_key, &listing.images, cancel)
            .await;
        Some(report)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ExtractionConfig;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::http_client::FetchedPage;
    use crate::infrastructure::pipeline_error::{FetchError, FetchFailure};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StaticPages(HashMap<String, Result<String, u16>>);

    #[async_trait]
    impl PageSource for StaticPages {
        async fn fetch(&self, url: &str, _cancel: &CancellationToken) -> Result<FetchedPage, FetchFailure> {
            match self.0.get(url) {
                Some(Ok(body)) => Ok(FetchedPage {
                    url: url.to_string(),
                    status: 200,
                    body: body.clone(),
                    attempts: 1,
                }),
                Some(Err(status)) => Err(FetchFailure {
                    error: FetchError::HttpStatus {
                        url: url.to_string(),
                        status: *status,
                    },
                    attempts: 1,
                }),
                None => Err(FetchFailure {
                    error: FetchError::Network {
                        url: url.to_string(),
                        message: "connection refused".into(),
                    },
                    attempts: 6,
                }),
            }
        }
    }

    const ITEM_URL: &str = "https://jp.mercari.com/item/m55556666777";

    fn page(price: &str) -> String {
        format!(
            r#"<html><body>
                 <div data-testid="name"><h1>Nintendo Switch 本体 有機EL</h1></div>
                 <div data-testid="price">¥{price}</div>
               </body></html>"#
        )
    }

    async fn service(pages: Vec<(&str, Result<String, u16>)>) -> ScrapeService {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let pages = pages.into_iter().map(|(url, page)| (url.to_string(), page)).collect();
        ScrapeService::new(
            Arc::new(StaticPages(pages)),
            Arc::new(ExtractionPipeline::new(ExtractionConfig::default())),
            ListingValidator::new(ExtractionConfig::default()),
            ProductRepository::new(db.pool().clone()),
        )
    }

    #[tokio::test]
    async fn scrape_persists_then_skips_duplicate() {
        let service = service(vec![(ITEM_URL, Ok(page("32,800")))]).await;
        let cancel = CancellationToken::new();

        let first = service.scrape_product(ITEM_URL, ScrapeOptions::default(), &cancel).await;
        assert!(first.success);
        assert_eq!(first.outcome, Some(SaveOutcome::Created));
        assert_eq!(first.platform, Platform::Mercari);
        assert!(first.inventory_id.is_some());
        assert_eq!(first.data.as_ref().map(|d| d.price), Some(32_800));

        let second = service.scrape_product(ITEM_URL, ScrapeOptions::default(), &cancel).await;
        assert!(second.success);
        assert_eq!(second.outcome, Some(SaveOutcome::DuplicateSkip));
        assert_eq!(second.product_id, first.product_id);
    }

    #[tokio::test]
    async fn failures_report_code_and_retries() {
        let gone = "https://jp.mercari.com/item/m10000000000";
        let service = service(vec![(gone, Err(404))]).await;
        let cancel = CancellationToken::new();

        let not_found = service.scrape_product(gone, ScrapeOptions::default(), &cancel).await;
        assert!(!not_found.success);
        assert_eq!(not_found.error_code, Some("HTTP_STATUS_ERROR"));
        assert_eq!(not_found.http_status, Some(404));
        assert_eq!(not_found.platform, Platform::Mercari);

        let unreachable = service
            .scrape_product("https://shop.example.com/items/1", ScrapeOptions::default(), &cancel)
            .await;
        assert_eq!(unreachable.error_code, Some("NETWORK_ERROR"));
        assert_eq!(unreachable.retry_count, Some(5));
    }

    #[tokio::test]
    async fn unparseable_page_is_an_extraction_error() {
        let service = service(vec![(ITEM_URL, Ok("<html><body>メンテナンス中</body></html>".into()))]).await;
        let result = service
            .scrape_product(ITEM_URL, ScrapeOptions::default(), &CancellationToken::new())
            .await;
        assert_eq!(result.error_code, Some("EXTRACTION_ERROR"));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let service = service(vec![(ITEM_URL, Ok(page("1,000")))]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service.scrape_product(ITEM_URL, ScrapeOptions::default(), &cancel).await;
        assert_eq!(result.error_code, Some("CANCELLED"));
    }
}

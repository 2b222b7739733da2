//! Many URLs through the scrape pipeline
//!
//! URLs run in chunks; inside a chunk a bounded worker pool scrapes them with
//! results kept in input order. A cancelled run stops starting new work and
//! reports every unstarted URL as cancelled.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{BatchOptions, BatchReport, ScrapeOptions, ScrapeResult};
use super::scrape_service::ScrapeService;
use crate::infrastructure::backoff::Delay;
use crate::infrastructure::config::BatchConfig;
use crate::infrastructure::pipeline_error::PipelineError;

impl BatchOptions {
    pub fn from_config(config: &BatchConfig, scrape: ScrapeOptions) -> Self {
        Self {
            scrape,
            concurrency: config.concurrency,
            chunk_size: config.chunk_size,
            chunk_delay_ms: config.chunk_delay_ms,
        }
    }
}

pub struct BatchCoordinator {
    scraper: Arc<ScrapeService>,
    delay: Arc<dyn Delay>,
}

impl BatchCoordinator {
    pub fn new(scraper: Arc<ScrapeService>, delay: Arc<dyn Delay>) -> Self {
        Self { scraper, delay }
    }

    #[instrument(skip_all, fields(run_id = %Uuid::new_v4()))]
    pub async fn run_batch(&self, urls: &[String], options: BatchOptions, cancel: &CancellationToken) -> BatchReport {
        let total = urls.len();
        let concurrency = options.concurrency.max(1);
        let chunk_size = options.chunk_size.max(1);
        let mut results = Vec::with_capacity(total);
        let mut cancelled = 0;

        info!(total, concurrency, chunk_size, "Batch started");

        for (index, chunk) in urls.chunks(chunk_size).enumerate() {
            if index > 0 && options.chunk_delay_ms > 0 {
                let pause = Duration::from_millis(options.chunk_delay_ms);
                if !self.delay.sleep(pause, cancel).await {
                    warn!("Batch cancelled during chunk pause");
                }
            }

            let chunk_results: Vec<(ScrapeResult, bool)> = stream::iter(chunk)
                .map(|url| self.run_one(url, options.scrape, cancel))
                .buffered(concurrency)
                .collect()
                .await;

            for (result, started) in chunk_results {
                if !started {
                    cancelled += 1;
                }
                results.push(result);
            }
        }

        let report = BatchReport::from_results(total, results, cancelled);
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            cancelled = report.cancelled,
            success_rate = report.success_rate,
            "Batch finished"
        );
        report
    }

    /// The scrape result and whether the task actually started
    async fn run_one(&self, url: &str, options: ScrapeOptions, cancel: &CancellationToken) -> (ScrapeResult, bool) {
        if cancel.is_cancelled() {
            let platform = self.scraper.platform_of(url);
            return (ScrapeResult::failed(url, platform, &PipelineError::Cancelled, 0), false);
        }
        (self.scraper.scrape_product(url, options, cancel).await, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::validator::ListingValidator;
    use crate::infrastructure::backoff::RecordingDelay;
    use crate::infrastructure::config::ExtractionConfig;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::http_client::{FetchedPage, PageSource};
    use crate::infrastructure::parsing::ExtractionPipeline;
    use crate::infrastructure::pipeline_error::FetchFailure;
    use crate::infrastructure::product_repository::ProductRepository;
    use async_trait::async_trait;

    /// Serves a valid generic listing for every URL and cancels the run after `cancel_after` fetches
    struct CountingPages {
        cancel_after: usize,
        cancel: CancellationToken,
        served: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl PageSource for CountingPages {
        async fn fetch(&self, url: &str, _cancel: &CancellationToken) -> Result<FetchedPage, FetchFailure> {
            let served = self.served.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if served >= self.cancel_after {
                self.cancel.cancel();
            }
            Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                body: "<html><body><h1>テスト用の商品ページ</h1><p class=\"price\">¥1,980</p></body></html>".into(),
                attempts: 1,
            })
        }
    }

    async fn coordinator(cancel_after: usize, cancel: &CancellationToken, delay: Arc<RecordingDelay>) -> BatchCoordinator {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let scraper = ScrapeService::new(
            Arc::new(CountingPages {
                cancel_after,
                cancel: cancel.clone(),
                served: Default::default(),
            }),
            Arc::new(ExtractionPipeline::new(ExtractionConfig::default())),
            ListingValidator::new(ExtractionConfig::default()),
            ProductRepository::new(db.pool().clone()),
        );
        BatchCoordinator::new(Arc::new(scraper), delay)
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://shop.example.com/items/{i}")).collect()
    }

    fn options(concurrency: usize, chunk_size: usize) -> BatchOptions {
        BatchOptions {
            scrape: ScrapeOptions::default(),
            concurrency,
            chunk_size,
            chunk_delay_ms: 250,
        }
    }

    #[tokio::test]
    async fn pauses_between_chunks_and_keeps_order() {
        let cancel = CancellationToken::new();
        let delay = Arc::new(RecordingDelay::new());
        let batch = coordinator(usize::MAX, &cancel, delay.clone()).await;

        let report = batch.run_batch(&urls(5), options(2, 2), &cancel).await;

        assert_eq!(report.total, 5);
        assert_eq!(report.successful, 5);
        assert_eq!(report.success_rate, 100.0);
        assert_eq!(delay.recorded(), vec![Duration::from_millis(250); 2]);
        let order: Vec<_> = report.results.iter().map(|r| r.url.clone()).collect();
        assert_eq!(order, urls(5));
    }

    #[tokio::test]
    async fn cancellation_reports_unstarted_urls() {
        let cancel = CancellationToken::new();
        let batch = coordinator(2, &cancel, Arc::new(RecordingDelay::new())).await;

        let report = batch.run_batch(&urls(6), options(1, 10), &cancel).await;

        assert_eq!(report.total, 6);
        assert_eq!(report.processed, 2);
        assert_eq!(report.successful, 2);
        assert_eq!(report.cancelled, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(report.results.len(), 6);
        assert!(report.results[2..].iter().all(|r| r.error_code == Some("CANCELLED")));
        assert_eq!(report.success_rate, 33.3);
    }
}

//! Application context
//!
//! Everything the commands need is built once from `AppConfig` and passed
//! around explicitly; nothing is global.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use super::batch_coordinator::BatchCoordinator;
use super::cross_catalog_matcher::CrossCatalogMatcher;
use super::inventory_monitor::InventoryMonitor;
use super::price_report::PriceReporter;
use super::price_trend::PriceTrendAnalyzer;
use super::scrape_service::{ImageDownloader, ScrapeService};
use super::validator::ListingValidator;
use crate::infrastructure::alert_sink::{AlertSink, LogAlertSink, WebhookAlertSink};
use crate::infrastructure::backoff::{Delay, TokioDelay};
use crate::infrastructure::catalog_client::{CatalogSearch, HttpCatalogClient};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::cross_reference_repository::CrossReferenceRepository;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::http_client::{FetchClient, PageSource};
use crate::infrastructure::image_store::ImageStore;
use crate::infrastructure::parsing::ExtractionPipeline;
use crate::infrastructure::product_repository::ProductRepository;

pub struct ScoutContext {
    pub config: AppConfig,
    pub database: DatabaseConnection,
    pub products: ProductRepository,
    pub cross_refs: CrossReferenceRepository,
    pub scraper: Arc<ScrapeService>,
    pub batch: BatchCoordinator,
    pub analyzer: Arc<PriceTrendAnalyzer>,
    pub monitor: InventoryMonitor,
    pub matcher: CrossCatalogMatcher,
    pub reporter: PriceReporter,
}

impl ScoutContext {
    /// Open the database and wire every service with real network collaborators
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let database_url = config.database_url()?;
        let database = DatabaseConnection::with_max_connections(&database_url, config.database.max_connections)
            .await
            .with_context(|| format!("Failed to open database {database_url}"))?;
        database.migrate().await?;

        let fetch_client = Arc::new(FetchClient::new(config.fetch.clone())?);
        let catalog: Arc<dyn CatalogSearch> = Arc::new(HttpCatalogClient::new(config.catalog.clone())?);
        let alerts: Arc<dyn AlertSink> = match &config.alerts.webhook_url {
            Some(url) => Arc::new(WebhookAlertSink::new(url.clone())?),
            None => Arc::new(LogAlertSink),
        };
        let images = ImageDownloader {
            client: Arc::clone(&fetch_client),
            store: ImageStore::new(config.image_dir()?),
        };

        let context = Self::assemble(config, database, fetch_client, catalog, alerts, Arc::new(TokioDelay), Some(images));
        info!(database = %database_url, "Scout context ready");
        Ok(context)
    }

    /// Wire the services around the given collaborators
    pub fn assemble(
        config: AppConfig,
        database: DatabaseConnection,
        source: Arc<dyn PageSource>,
        catalog: Arc<dyn CatalogSearch>,
        alerts: Arc<dyn AlertSink>,
        delay: Arc<dyn Delay>,
        images: Option<ImageDownloader>,
    ) -> Self {
        let products = ProductRepository::new(database.pool().clone());
        let cross_refs = CrossReferenceRepository::new(database.pool().clone());

        let extractor = Arc::new(ExtractionPipeline::new(config.extraction.clone()));
        let validator = ListingValidator::new(config.extraction.clone());
        let mut scraper = ScrapeService::new(source, extractor, validator, products.clone());
        if let Some(images) = images {
            scraper = scraper.with_image_downloader(images);
        }
        let scraper = Arc::new(scraper);

        let analyzer = Arc::new(PriceTrendAnalyzer::new(products.clone(), alerts, config.trend.clone()));
        let monitor = InventoryMonitor::new(
            Arc::clone(&scraper),
            products.clone(),
            Arc::clone(&analyzer),
            config.monitoring.clone(),
        );
        let matcher = CrossCatalogMatcher::new(
            products.clone(),
            cross_refs.clone(),
            catalog,
            Arc::clone(&delay),
            config.matching.clone(),
        );
        let reporter = PriceReporter::new(products.clone(), Arc::clone(&analyzer));
        let batch = BatchCoordinator::new(Arc::clone(&scraper), delay);

        Self {
            config,
            database,
            products,
            cross_refs,
            scraper,
            batch,
            analyzer,
            monitor,
            matcher,
            reporter,
        }
    }
}

//! Periodic re-verification of registered listings
//!
//! Each target is fetched and extracted without holding any lock; the
//! comparison against stored state and the resulting write happen under the
//! product's lock so concurrent scrapes and checks cannot interleave.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::dto::{InventoryChange, InventoryCheckReport};
use super::price_trend::PriceTrendAnalyzer;
use super::scrape_service::ScrapeService;
use crate::domain::{ChangeType, HistorySource, InventoryUpdate, NewHistoryEntry, UrlStatus, ValidatedListing};
use crate::infrastructure::config::MonitoringConfig;
use crate::infrastructure::pipeline_error::PersistenceResult;
use crate::infrastructure::product_repository::{MonitorTarget, ProductRepository};

/// Statuses that mean the listing no longer exists
const GONE_STATUSES: &[u16] = &[404, 410];

enum TargetOutcome {
    Verified(Option<InventoryChange>),
    Failed,
    Skipped,
}

pub struct InventoryMonitor {
    scraper: Arc<ScrapeService>,
    products: ProductRepository,
    analyzer: Arc<PriceTrendAnalyzer>,
    config: MonitoringConfig,
}

impl InventoryMonitor {
    pub fn new(
        scraper: Arc<ScrapeService>,
        products: ProductRepository,
        analyzer: Arc<PriceTrendAnalyzer>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            scraper,
            products,
            analyzer,
            config,
        }
    }

    /// Verify due targets, optionally restricted to `product_ids`
    pub async fn run_check(
        &self,
        product_ids: Option<&[i64]>,
        cancel: &CancellationToken,
    ) -> PersistenceResult<InventoryCheckReport> {
        let targets = self
            .products
            .monitoring_targets(product_ids, self.config.max_targets_per_run)
            .await?;
        let total = targets.len();
        info!(total, "Inventory check started");

        let outcomes: Vec<TargetOutcome> = stream::iter(targets)
            .map(|target| self.check_target(target, cancel))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = InventoryCheckReport {
            total,
            ..InventoryCheckReport::default()
        };
        for outcome in outcomes {
            match outcome {
                TargetOutcome::Verified(change) => {
                    report.checked += 1;
                    if let Some(change) = change {
                        report.updated += 1;
                        report.changes.push(change);
                    }
                }
                TargetOutcome::Failed => report.errors += 1,
                TargetOutcome::Skipped => {}
            }
        }

        info!(
            total = report.total,
            checked = report.checked,
            updated = report.updated,
            errors = report.errors,
            "Inventory check finished"
        );
        Ok(report)
    }

    /// Stop monitoring without touching the listing state
    pub async fn suspend(&self, product_id: i64) -> PersistenceResult<bool> {
        self.products.set_monitoring(product_id, false).await
    }

    pub async fn resume(&self, product_id: i64) -> PersistenceResult<bool> {
        self.products.set_monitoring(product_id, true).await
    }

    /// Archive the product and drop its inventory record
    pub async fn archive(&self, product_id: i64) -> PersistenceResult<()> {
        self.products.archive(product_id).await
    }

    #[instrument(skip_all, fields(product_id = target.product.id))]
    async fn check_target(&self, target: MonitorTarget, cancel: &CancellationToken) -> TargetOutcome {
        if cancel.is_cancelled() {
            return TargetOutcome::Skipped;
        }

        let fetched = self.scraper.fetch_listing(&target.product.source_url, cancel).await;
        let result = match fetched {
            Ok(listing) => self.apply_listing(&target, &listing).await,
            Err(error) if error.is_cancelled() => return TargetOutcome::Skipped,
            Err(error) if error.http_status().is_some_and(|s| GONE_STATUSES.contains(&s)) => {
                self.mark_gone(&target).await
            }
            Err(error) => {
                warn!(url = %target.product.source_url, error = %error, "Verification failed");
                self.record_failure(&target).await;
                return TargetOutcome::Failed;
            }
        };

        match result {
            Ok(change) => TargetOutcome::Verified(change),
            Err(error) => {
                warn!(error = %error, "Could not record verification");
                TargetOutcome::Failed
            }
        }
    }

    /// Compare a fresh listing with stored inventory and record the difference
    async fn apply_listing(
        &self,
        target: &MonitorTarget,
        listing: &ValidatedListing,
    ) -> PersistenceResult<Option<InventoryChange>> {
        let product = &target.product;
        let guard = self.products.lock_product(&product.natural_key()).await;

        // Re-read under the lock; a concurrent scrape may have moved it
        let Some(stored) = self.products.get_inventory(product.id).await? else {
            debug!("Inventory removed while checking");
            return Ok(None);
        };

        let (new_stock, url_status) = if listing.sold_out {
            (0, UrlStatus::Sold)
        } else {
            (listing.stock, UrlStatus::Active)
        };
        let change = self.analyzer.classify(stored.current_price, listing.price);
        let price_changed = change.change_amount != 0;
        let stock_changed = stored.current_stock != new_stock;
        let status_changed = stored.url_status != url_status;

        let write_history = stock_changed || change.is_significant;
        let entry = match ChangeType::from_flags(price_changed, stock_changed).filter(|_| write_history) {
            Some(change_type) => {
                let metadata = if change.is_significant {
                    Some(self.analyzer.analyze_trend(product.id, listing.price).await?.snapshot())
                } else {
                    None
                };
                Some(NewHistoryEntry {
                    previous_price: Some(stored.current_price),
                    new_price: Some(listing.price),
                    previous_stock: Some(stored.current_stock),
                    new_stock: Some(new_stock),
                    change_type,
                    source: HistorySource::Monitor,
                    metadata,
                })
            }
            None => None,
        };
        let alert = change.alert_for(product.id);

        let update = InventoryUpdate {
            current_price: listing.price,
            current_stock: new_stock,
            url_status,
        };
        let written = self
            .products
            .apply_check(&guard, product.id, update, entry.as_ref(), alert.as_ref())
            .await?;
        drop(guard);

        if let Some(alert) = &alert {
            self.analyzer.notify(product, alert).await;
        }

        if !(price_changed || stock_changed || status_changed) {
            return Ok(None);
        }

        info!(
            old_price = stored.current_price,
            new_price = listing.price,
            old_stock = stored.current_stock,
            new_stock,
            url_status = url_status.as_str(),
            "Inventory changed"
        );
        Ok(Some(InventoryChange {
            product_id: product.id,
            change_type: ChangeType::from_flags(price_changed, stock_changed),
            old_price: stored.current_price,
            new_price: listing.price,
            old_stock: stored.current_stock,
            new_stock,
            url_status,
            change_percent: change.change_percent,
            significant: change.is_significant,
            major: change.is_major,
            history_written: written.is_some(),
        }))
    }

    async fn mark_gone(&self, target: &MonitorTarget) -> PersistenceResult<Option<InventoryChange>> {
        let product = &target.product;
        let guard = self.products.lock_product(&product.natural_key()).await;
        self.products.mark_sold(&guard, product.id).await?;
        info!(url = %product.source_url, "Listing gone, marked sold");

        Ok(Some(InventoryChange {
            product_id: product.id,
            change_type: None,
            old_price: target.inventory.current_price,
            new_price: target.inventory.current_price,
            old_stock: target.inventory.current_stock,
            new_stock: target.inventory.current_stock,
            url_status: UrlStatus::Sold,
            change_percent: 0.0,
            significant: false,
            major: false,
            history_written: false,
        }))
    }

    async fn record_failure(&self, target: &MonitorTarget) {
        let product = &target.product;
        let guard = self.products.lock_product(&product.natural_key()).await;
        match self
            .products
            .record_failure(&guard, product.id, self.config.error_threshold)
            .await
        {
            Ok(state) if state.url_status == UrlStatus::Error => {
                warn!(failures = state.consecutive_failures, "Failure threshold reached, listing marked error");
            }
            Ok(state) => debug!(failures = state.consecutive_failures, "Failure counted"),
            Err(e) => warn!(error = %e, "Could not count failure"),
        }
    }
}

//! Repository for products and everything a product owns
//!
//! Products, inventory, stock history and price alerts live here. Writes for one
//! product are serialized through a per-product async lock; multi-row writes are
//! single transactions.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::domain::{
    ChangeType, Condition, HistorySource, InventoryRecord, InventoryUpdate, NaturalKey, NewHistoryEntry,
    Platform, PriceAlert, PriceDirection, PriceSample, Product, ProductStatus, SellerInfo, StockHistory,
    UrlStatus, ValidatedListing,
};
use crate::infrastructure::pipeline_error::{PersistenceError, PersistenceResult};

const PRODUCT_COLUMNS: &str = "p.id, p.platform, p.source_item_id, p.product_key, p.source_url, p.title, \
     p.description, p.price, p.condition, p.category, p.images, p.seller_name, p.seller_rating, \
     p.platform_payload, p.status, p.scraped_at, p.created_at, p.updated_at";

const INVENTORY_COLUMNS: &str = "i.id AS inventory_id, i.product_id AS inventory_product_id, \
     i.current_stock, i.current_price, i.monitoring_enabled, i.url_status, i.consecutive_failures, \
     i.last_verified_at";

const HISTORY_COLUMNS: &str = "id, product_id, previous_price, new_price, previous_stock, new_stock, \
     change_type, source, detected_at, metadata";

/// How `save_listing` treats an existing natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    SkipExisting,
    ForceUpdate,
}

impl SaveMode {
    pub const fn from_force(force: bool) -> Self {
        if force { Self::ForceUpdate } else { Self::SkipExisting }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Created,
    Updated,
    Unchanged,
    DuplicateSkip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub outcome: SaveOutcome,
    pub product_id: i64,
    /// `None` when the product was archived
    pub inventory_id: Option<i64>,
}

/// Registered product joined with its inventory state
#[derive(Debug, Clone)]
pub struct MonitorTarget {
    pub product: Product,
    pub inventory: InventoryRecord,
}

/// Outcome of a failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureState {
    pub consecutive_failures: i64,
    pub url_status: UrlStatus,
}

/// Exclusive write access to one product's rows
///
/// Methods that read-modify-write product state take a guard so the caller
/// holds the lock across its own read and the write.
pub struct ProductGuard {
    key: NaturalKey,
    _guard: OwnedMutexGuard<()>,
}

impl ProductGuard {
    pub fn key(&self) -> &NaturalKey {
        &self.key
    }
}

#[derive(Default)]
struct ProductLocks {
    locks: Mutex<HashMap<NaturalKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProductLocks {
    const PRUNE_AT: usize = 512;

    async fn acquire(&self, key: &NaturalKey) -> ProductGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= Self::PRUNE_AT {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        ProductGuard {
            key: key.clone(),
            _guard: lock.lock_owned().await,
        }
    }
}

fn failed<'a, E: Display>(operation: &'static str, key: &'a NaturalKey) -> impl Fn(E) -> PersistenceError + 'a {
    move |error| PersistenceError::new(operation, error).with_key(key)
}

fn failed_for<E: Display>(operation: &'static str, product_id: i64) -> impl Fn(E) -> PersistenceError {
    move |error| PersistenceError::new(operation, error).with_product(product_id)
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Repository for products, inventory, history and alerts
#[derive(Clone)]
pub struct ProductRepository {
    pool: Arc<SqlitePool>,
    locks: Arc<ProductLocks>,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
            locks: Arc::new(ProductLocks::default()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Serialize writes for one product
    pub async fn lock_product(&self, key: &NaturalKey) -> ProductGuard {
        self.locks.acquire(key).await
    }

    // ===============================
    // SAVE (scrape / rescrape)
    // ===============================

    /// Insert-or-update keyed on (platform, source item id)
    ///
    /// New listings get a product, an inventory record and an initial history row
    /// in one transaction. Existing listings are skipped unless forced.
    pub async fn save_listing(&self, listing: &ValidatedListing, mode: SaveMode) -> PersistenceResult<SaveReport> {
        let key = listing.natural_key();
        let _guard = self.locks.acquire(&key).await;
        let now = to_millis(Utc::now());

        let images = serde_json::to_string(&listing.images).map_err(failed("save_listing", &key))?;
        let payload = serde_json::Value::Object(listing.platform_payload.clone()).to_string();

        let mut tx = self.pool.begin().await.map_err(failed("save_listing", &key))?;

        // Writing first takes SQLite's write lock before any read snapshot exists
        let inserted = sqlx::query(
            r"
            INSERT INTO products
            (platform, source_item_id, product_key, source_url, title, description, price, condition,
             category, images, seller_name, seller_rating, platform_payload, status, scraped_at,
             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?)
            ON CONFLICT (platform, source_item_id) DO NOTHING
            RETURNING id
            ",
        )
        .bind(listing.platform.as_str())
        .bind(&listing.source_item_id)
        .bind(&listing.product_key)
        .bind(&listing.source_url)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.price)
        .bind(listing.condition.as_str())
        .bind(&listing.category)
        .bind(&images)
        .bind(&listing.seller.name)
        .bind(listing.seller.rating)
        .bind(&payload)
        .bind(to_millis(listing.scraped_at))
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(failed("save_listing", &key))?;

        if let Some(row) = inserted {
            let product_id: i64 = row.get("id");

            let inventory_id: i64 = sqlx::query(
                r"
                INSERT INTO inventory
                (product_id, current_stock, current_price, monitoring_enabled, url_status,
                 consecutive_failures, last_verified_at, updated_at)
                VALUES (?, ?, ?, 1, 'active', 0, ?, ?)
                RETURNING id
                ",
            )
            .bind(product_id)
            .bind(listing.stock)
            .bind(listing.price)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(failed("save_listing", &key))?
            .get("id");

            insert_history(&mut tx, product_id, &NewHistoryEntry::initial(listing.price, listing.stock), now)
                .await
                .map_err(failed("save_listing", &key))?;

            tx.commit().await.map_err(failed("save_listing", &key))?;
            info!(product_id, key = %key, "Created product");

            return Ok(SaveReport {
                outcome: SaveOutcome::Created,
                product_id,
                inventory_id: Some(inventory_id),
            });
        }

        let existing = sqlx::query(
            r"
            SELECT p.id, p.price, i.id AS inventory_id, i.current_price, i.current_stock
            FROM products p LEFT JOIN inventory i ON i.product_id = p.id
            WHERE p.platform = ? AND p.source_item_id = ?
            ",
        )
        .bind(listing.platform.as_str())
        .bind(&listing.source_item_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(failed("save_listing", &key))?;

        let product_id: i64 = existing.get("id");
        let inventory_id: Option<i64> = existing.get("inventory_id");

        if mode == SaveMode::SkipExisting {
            tx.rollback().await.map_err(failed("save_listing", &key))?;
            debug!(product_id, key = %key, "Listing already stored, skipping");
            return Ok(SaveReport {
                outcome: SaveOutcome::DuplicateSkip,
                product_id,
                inventory_id,
            });
        }

        sqlx::query(
            r"
            UPDATE products SET
                product_key = ?, source_url = ?, title = ?, description = ?, price = ?, condition = ?,
                category = ?, images = ?, seller_name = ?, seller_rating = ?, platform_payload = ?,
                scraped_at = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(&listing.product_key)
        .bind(&listing.source_url)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.price)
        .bind(listing.condition.as_str())
        .bind(&listing.category)
        .bind(&images)
        .bind(&listing.seller.name)
        .bind(listing.seller.rating)
        .bind(&payload)
        .bind(to_millis(listing.scraped_at))
        .bind(now)
        .bind(product_id)
        .execute(&mut *tx)
        .await
        .map_err(failed("save_listing", &key))?;

        let outcome = match inventory_id {
            Some(_) => {
                let previous_price: i64 = existing.get("current_price");
                let previous_stock: i64 = existing.get("current_stock");

                match ChangeType::from_flags(previous_price != listing.price, previous_stock != listing.stock) {
                    Some(change_type) => {
                        sqlx::query(
                            "UPDATE inventory SET current_price = ?, current_stock = ?, updated_at = ? WHERE product_id = ?",
                        )
                        .bind(listing.price)
                        .bind(listing.stock)
                        .bind(now)
                        .bind(product_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(failed("save_listing", &key))?;

                        let entry = NewHistoryEntry {
                            previous_price: Some(previous_price),
                            new_price: Some(listing.price),
                            previous_stock: Some(previous_stock),
                            new_stock: Some(listing.stock),
                            change_type,
                            source: HistorySource::Rescrape,
                            metadata: None,
                        };
                        insert_history(&mut tx, product_id, &entry, now)
                            .await
                            .map_err(failed("save_listing", &key))?;
                        SaveOutcome::Updated
                    }
                    None => SaveOutcome::Unchanged,
                }
            }
            // Archived: the product row is refreshed, nothing is monitored
            None => {
                let previous_price: i64 = existing.get("price");
                if previous_price == listing.price { SaveOutcome::Unchanged } else { SaveOutcome::Updated }
            }
        };

        tx.commit().await.map_err(failed("save_listing", &key))?;
        info!(product_id, key = %key, ?outcome, "Re-scraped product");

        Ok(SaveReport {
            outcome,
            product_id,
            inventory_id,
        })
    }

    // ===============================
    // PRODUCT QUERIES
    // ===============================

    pub async fn get_product(&self, product_id: i64) -> PersistenceResult<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ?"))
            .bind(product_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(failed_for("get_product", product_id))?;

        row.as_ref().map(product_from_row).transpose()
    }

    /// Like `get_product`, but a missing product is an error
    pub async fn require_product(&self, product_id: i64) -> PersistenceResult<Product> {
        self.get_product(product_id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("product", product_id))
    }

    pub async fn find_by_natural_key(&self, key: &NaturalKey) -> PersistenceResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.platform = ? AND p.source_item_id = ?"
        ))
        .bind(key.platform.as_str())
        .bind(&key.source_item_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(failed("find_by_natural_key", key))?;

        row.as_ref().map(product_from_row).transpose()
    }

    /// Ids of active products, optionally restricted to `product_ids`
    pub async fn active_product_ids(&self, product_ids: Option<&[i64]>) -> PersistenceResult<Vec<i64>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT id FROM products WHERE status = 'active'");
        if let Some(ids) = product_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" AND id IN (");
            let mut separated = query.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY id");

        let rows = query
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| PersistenceError::new("active_product_ids", e))?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    // ===============================
    // INVENTORY / MONITORING
    // ===============================

    pub async fn get_inventory(&self, product_id: i64) -> PersistenceResult<Option<InventoryRecord>> {
        let row = sqlx::query(&format!("SELECT {INVENTORY_COLUMNS} FROM inventory i WHERE i.product_id = ?"))
            .bind(product_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(failed_for("get_inventory", product_id))?;

        Ok(row.as_ref().map(inventory_from_row))
    }

    /// Monitoring targets: enabled, active URL, active product, least recently verified first
    pub async fn monitoring_targets(
        &self,
        product_ids: Option<&[i64]>,
        limit: u32,
    ) -> PersistenceResult<Vec<MonitorTarget>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {PRODUCT_COLUMNS}, {INVENTORY_COLUMNS} \
             FROM inventory i JOIN products p ON p.id = i.product_id \
             WHERE i.monitoring_enabled = 1 AND i.url_status = 'active' AND p.status = 'active'"
        ));

        if let Some(ids) = product_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" AND p.id IN (");
            let mut separated = query.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }

        query.push(" ORDER BY i.last_verified_at IS NOT NULL, i.last_verified_at ASC, i.id ASC LIMIT ");
        query.push_bind(i64::from(limit));

        let rows = query
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| PersistenceError::new("monitoring_targets", e))?;

        rows.iter()
            .map(|row| {
                Ok(MonitorTarget {
                    product: product_from_row(row)?,
                    inventory: inventory_from_row(row),
                })
            })
            .collect()
    }

    /// Record a successful verification: inventory update, optional history row and
    /// optional alert in one transaction
    pub async fn apply_check(
        &self,
        guard: &ProductGuard,
        product_id: i64,
        update: InventoryUpdate,
        history: Option<&NewHistoryEntry>,
        alert: Option<&PriceAlert>,
    ) -> PersistenceResult<Option<StockHistory>> {
        let key = guard.key();
        let now = to_millis(Utc::now());
        let mut tx = self.pool.begin().await.map_err(failed("apply_check", key))?;

        let updated = sqlx::query(
            r"
            UPDATE inventory SET
                current_price = ?, current_stock = ?, url_status = ?, consecutive_failures = 0,
                last_verified_at = ?, updated_at = ?
            WHERE product_id = ?
            ",
        )
        .bind(update.current_price)
        .bind(update.current_stock)
        .bind(update.url_status.as_str())
        .bind(now)
        .bind(now)
        .bind(product_id)
        .execute(&mut *tx)
        .await
        .map_err(failed("apply_check", key))?;

        if updated.rows_affected() == 0 {
            return Err(PersistenceError::not_found("inventory", product_id).with_key(key));
        }

        let written = match history {
            Some(entry) => Some(
                insert_history(&mut tx, product_id, entry, now)
                    .await
                    .map_err(failed("apply_check", key))?,
            ),
            None => None,
        };

        if let Some(alert) = alert {
            insert_alert(&mut tx, alert).await.map_err(failed("apply_check", key))?;
        }

        tx.commit().await.map_err(failed("apply_check", key))?;
        Ok(written)
    }

    /// Count a failed verification; reaching `error_threshold` marks the URL as errored
    pub async fn record_failure(
        &self,
        guard: &ProductGuard,
        product_id: i64,
        error_threshold: i64,
    ) -> PersistenceResult<FailureState> {
        let now = to_millis(Utc::now());
        let row = sqlx::query(
            r"
            UPDATE inventory SET
                consecutive_failures = consecutive_failures + 1,
                url_status = CASE WHEN consecutive_failures + 1 >= ? THEN 'error' ELSE url_status END,
                last_verified_at = ?, updated_at = ?
            WHERE product_id = ?
            RETURNING consecutive_failures, url_status
            ",
        )
        .bind(error_threshold)
        .bind(now)
        .bind(now)
        .bind(product_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(failed("record_failure", guard.key()))?
        .ok_or_else(|| PersistenceError::not_found("inventory", product_id).with_key(guard.key()))?;

        Ok(FailureState {
            consecutive_failures: row.get("consecutive_failures"),
            url_status: UrlStatus::parse(row.get::<&str, _>("url_status")),
        })
    }

    /// The listing is gone (404/410); keep the record, stop monitoring it
    pub async fn mark_sold(&self, guard: &ProductGuard, product_id: i64) -> PersistenceResult<()> {
        let now = to_millis(Utc::now());
        let updated = sqlx::query(
            r"
            UPDATE inventory SET url_status = 'sold', consecutive_failures = 0, last_verified_at = ?, updated_at = ?
            WHERE product_id = ?
            ",
        )
        .bind(now)
        .bind(now)
        .bind(product_id)
        .execute(&*self.pool)
        .await
        .map_err(failed("mark_sold", guard.key()))?;

        if updated.rows_affected() == 0 {
            return Err(PersistenceError::not_found("inventory", product_id).with_key(guard.key()));
        }
        Ok(())
    }

    /// Suspend or resume monitoring; returns false when the product has no inventory record
    pub async fn set_monitoring(&self, product_id: i64, enabled: bool) -> PersistenceResult<bool> {
        let product = self.require_product(product_id).await?;
        let guard = self.lock_product(&product.natural_key()).await;

        let updated = sqlx::query("UPDATE inventory SET monitoring_enabled = ?, updated_at = ? WHERE product_id = ?")
            .bind(enabled)
            .bind(to_millis(Utc::now()))
            .bind(product_id)
            .execute(&*self.pool)
            .await
            .map_err(failed("set_monitoring", guard.key()))?;

        info!(product_id, enabled, "Monitoring state changed");
        Ok(updated.rows_affected() > 0)
    }

    /// Remove the inventory record and archive the product. History is retained.
    pub async fn archive(&self, product_id: i64) -> PersistenceResult<()> {
        let product = self.require_product(product_id).await?;
        let guard = self.lock_product(&product.natural_key()).await;
        let key = guard.key();

        let mut tx = self.pool.begin().await.map_err(failed("archive", key))?;

        sqlx::query("UPDATE products SET status = 'archived', updated_at = ? WHERE id = ?")
            .bind(to_millis(Utc::now()))
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(failed("archive", key))?;

        sqlx::query("DELETE FROM inventory WHERE product_id = ?")
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(failed("archive", key))?;

        tx.commit().await.map_err(failed("archive", key))?;
        info!(product_id, key = %key, "Archived product");
        Ok(())
    }

    // ===============================
    // HISTORY / ALERTS
    // ===============================

    /// Append one history row (and an alert when given) in one transaction
    pub async fn append_history(
        &self,
        guard: &ProductGuard,
        product_id: i64,
        entry: &NewHistoryEntry,
        alert: Option<&PriceAlert>,
    ) -> PersistenceResult<StockHistory> {
        let key = guard.key();
        let mut tx = self.pool.begin().await.map_err(failed("append_history", key))?;

        let written = insert_history(&mut tx, product_id, entry, to_millis(Utc::now()))
            .await
            .map_err(failed("append_history", key))?;

        if let Some(alert) = alert {
            insert_alert(&mut tx, alert).await.map_err(failed("append_history", key))?;
        }

        tx.commit().await.map_err(failed("append_history", key))?;
        Ok(written)
    }

    /// History for one product in insertion order
    pub async fn history(&self, product_id: i64) -> PersistenceResult<Vec<StockHistory>> {
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM stock_history WHERE product_id = ? ORDER BY id ASC"
        ))
        .bind(product_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(failed_for("history", product_id))?;

        Ok(rows.iter().map(history_from_row).collect())
    }

    /// Recorded prices at or after `since`, oldest first
    pub async fn price_samples(&self, product_id: i64, since: DateTime<Utc>) -> PersistenceResult<Vec<PriceSample>> {
        let rows = sqlx::query(
            r"
            SELECT new_price, detected_at FROM stock_history
            WHERE product_id = ? AND new_price IS NOT NULL AND detected_at >= ?
            ORDER BY id ASC
            ",
        )
        .bind(product_id)
        .bind(to_millis(since))
        .fetch_all(&*self.pool)
        .await
        .map_err(failed_for("price_samples", product_id))?;

        Ok(rows
            .iter()
            .map(|row| PriceSample {
                price: row.get("new_price"),
                detected_at: from_millis(row.get("detected_at")),
            })
            .collect())
    }

    pub async fn alerts(&self, product_id: i64) -> PersistenceResult<Vec<PriceAlert>> {
        let rows = sqlx::query(
            r"
            SELECT product_id, old_price, new_price, change_percent, direction, created_at
            FROM price_alerts WHERE product_id = ? ORDER BY id ASC
            ",
        )
        .bind(product_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(failed_for("alerts", product_id))?;

        Ok(rows
            .iter()
            .map(|row| PriceAlert {
                product_id: row.get("product_id"),
                old_price: row.get("old_price"),
                new_price: row.get("new_price"),
                change_percent: row.get("change_percent"),
                direction: if row.get::<&str, _>("direction") == "rise" {
                    PriceDirection::Rise
                } else {
                    PriceDirection::Drop
                },
                created_at: from_millis(row.get("created_at")),
            })
            .collect())
    }
}

/// Append a history row with `detected_at` clamped to the product's latest entry
async fn insert_history(
    conn: &mut SqliteConnection,
    product_id: i64,
    entry: &NewHistoryEntry,
    now_ms: i64,
) -> Result<StockHistory, sqlx::Error> {
    let metadata = entry.metadata.as_ref().map(ToString::to_string);

    let row = sqlx::query(
        r"
        INSERT INTO stock_history
        (product_id, previous_price, new_price, previous_stock, new_stock, change_type, source, detected_at, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?,
                MAX(?, COALESCE((SELECT MAX(detected_at) FROM stock_history WHERE product_id = ?), 0)),
                ?)
        RETURNING id, detected_at
        ",
    )
    .bind(product_id)
    .bind(entry.previous_price)
    .bind(entry.new_price)
    .bind(entry.previous_stock)
    .bind(entry.new_stock)
    .bind(entry.change_type.as_str())
    .bind(entry.source.as_str())
    .bind(now_ms)
    .bind(product_id)
    .bind(&metadata)
    .fetch_one(&mut *conn)
    .await?;

    Ok(StockHistory {
        id: row.get("id"),
        product_id,
        previous_price: entry.previous_price,
        new_price: entry.new_price,
        previous_stock: entry.previous_stock,
        new_stock: entry.new_stock,
        change_type: entry.change_type,
        source: entry.source,
        detected_at: from_millis(row.get("detected_at")),
        metadata: entry.metadata.clone(),
    })
}

async fn insert_alert(conn: &mut SqliteConnection, alert: &PriceAlert) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        INSERT INTO price_alerts (product_id, old_price, new_price, change_percent, direction, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(alert.product_id)
    .bind(alert.old_price)
    .bind(alert.new_price)
    .bind(alert.change_percent)
    .bind(alert.direction.as_str())
    .bind(to_millis(alert.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn product_from_row(row: &SqliteRow) -> PersistenceResult<Product> {
    let id: i64 = row.get("id");
    let platform_name: &str = row.get("platform");
    let platform = Platform::parse(platform_name)
        .ok_or_else(|| PersistenceError::new("decode_product", format!("unknown platform '{platform_name}'")).with_product(id))?;

    let images: Vec<String> =
        serde_json::from_str(row.get("images")).map_err(failed_for("decode_product", id))?;
    let platform_payload = match serde_json::from_str(row.get("platform_payload")) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => serde_json::Map::new(),
        Err(e) => return Err(PersistenceError::new("decode_product", e).with_product(id)),
    };

    Ok(Product {
        id,
        platform,
        source_item_id: row.get("source_item_id"),
        product_key: row.get("product_key"),
        source_url: row.get("source_url"),
        title: row.get("title"),
        description: row.get("description"),
        price: row.get("price"),
        condition: Condition::parse(row.get("condition")),
        category: row.get("category"),
        images,
        seller: SellerInfo {
            name: row.get("seller_name"),
            rating: row.get("seller_rating"),
        },
        platform_payload,
        status: ProductStatus::parse(row.get("status")),
        scraped_at: from_millis(row.get("scraped_at")),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

fn inventory_from_row(row: &SqliteRow) -> InventoryRecord {
    InventoryRecord {
        id: row.get("inventory_id"),
        product_id: row.get("inventory_product_id"),
        current_stock: row.get("current_stock"),
        current_price: row.get("current_price"),
        monitoring_enabled: row.get::<i64, _>("monitoring_enabled") != 0,
        url_status: UrlStatus::parse(row.get("url_status")),
        consecutive_failures: row.get("consecutive_failures"),
        last_verified_at: row.get::<Option<i64>, _>("last_verified_at").map(from_millis),
    }
}

fn history_from_row(row: &SqliteRow) -> StockHistory {
    StockHistory {
        id: row.get("id"),
        product_id: row.get("product_id"),
        previous_price: row.get("previous_price"),
        new_price: row.get("new_price"),
        previous_stock: row.get("previous_stock"),
        new_stock: row.get("new_stock"),
        change_type: ChangeType::parse(row.get("change_type")),
        source: HistorySource::parse(row.get("source")),
        detected_at: from_millis(row.get("detected_at")),
        metadata: row
            .get::<Option<String>, _>("metadata")
            .and_then(|raw| serde_json::from_str(&raw).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;

    fn listing(item_id: &str, price: i64, stock: i64) -> ValidatedListing {
        ValidatedListing {
            platform: Platform::Mercari,
            source_item_id: item_id.to_string(),
            product_key: format!("key-{item_id}"),
            source_url: format!("https://jp.mercari.com/item/{item_id}"),
            title: "Canon EOS R6 ボディ".to_string(),
            description: "動作確認済み".to_string(),
            price,
            condition: Condition::Used,
            category: "カメラ".to_string(),
            images: vec!["https://static.mercdn.net/item/1.jpg".to_string()],
            seller: SellerInfo {
                name: Some("seller".to_string()),
                rating: Some(4.8),
            },
            stock,
            sold_out: stock == 0,
            platform_payload: serde_json::Map::new(),
            scraped_at: Utc::now(),
        }
    }

    async fn repository() -> ProductRepository {
        let db = DatabaseConnection::in_memory().await.unwrap();
        ProductRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn first_save_creates_product_inventory_and_initial_history() {
        let repo = repository().await;
        let report = repo.save_listing(&listing("m1", 12_345, 1), SaveMode::SkipExisting).await.unwrap();

        assert_eq!(report.outcome, SaveOutcome::Created);
        let inventory = repo.get_inventory(report.product_id).await.unwrap().unwrap();
        assert_eq!(Some(inventory.id), report.inventory_id);
        assert_eq!(inventory.current_price, 12_345);
        assert!(inventory.monitoring_enabled);
        assert_eq!(inventory.url_status, UrlStatus::Active);

        let history = repo.history(report.product_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, ChangeType::Initial);
        assert_eq!(history[0].new_price, Some(12_345));

        let product = repo.get_product(report.product_id).await.unwrap().unwrap();
        assert_eq!(product.images.len(), 1);
        assert_eq!(product.seller.rating, Some(4.8));
    }

    #[tokio::test]
    async fn resave_without_force_is_a_duplicate_skip() {
        let repo = repository().await;
        let first = repo.save_listing(&listing("m1", 1000, 1), SaveMode::SkipExisting).await.unwrap();
        let second = repo.save_listing(&listing("m1", 900, 1), SaveMode::SkipExisting).await.unwrap();

        assert_eq!(second.outcome, SaveOutcome::DuplicateSkip);
        assert_eq!(second.product_id, first.product_id);
        assert_eq!(repo.history(first.product_id).await.unwrap().len(), 1);
        assert_eq!(repo.require_product(first.product_id).await.unwrap().price, 1000);
    }

    #[tokio::test]
    async fn forced_resave_writes_history_only_on_change() {
        let repo = repository().await;
        let first = repo.save_listing(&listing("m1", 1000, 1), SaveMode::SkipExisting).await.unwrap();

        let unchanged = repo.save_listing(&listing("m1", 1000, 1), SaveMode::ForceUpdate).await.unwrap();
        assert_eq!(unchanged.outcome, SaveOutcome::Unchanged);
        assert_eq!(repo.history(first.product_id).await.unwrap().len(), 1);

        let updated = repo.save_listing(&listing("m1", 800, 0), SaveMode::ForceUpdate).await.unwrap();
        assert_eq!(updated.outcome, SaveOutcome::Updated);
        assert_eq!(updated.inventory_id, first.inventory_id);

        let history = repo.history(first.product_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].change_type, ChangeType::Both);
        assert_eq!(history[1].source, HistorySource::Rescrape);
        assert_eq!(repo.get_inventory(first.product_id).await.unwrap().unwrap().current_stock, 0);
    }

    #[tokio::test]
    async fn history_timestamps_never_decrease() {
        let repo = repository().await;
        let report = repo.save_listing(&listing("m1", 1000, 1), SaveMode::SkipExisting).await.unwrap();
        let guard = repo.lock_product(&listing("m1", 0, 0).natural_key()).await;

        // A row far in the future forces later rows to clamp up to it
        let future = to_millis(Utc::now()) + 3_600_000;
        sqlx::query("UPDATE stock_history SET detected_at = ? WHERE product_id = ?")
            .bind(future)
            .bind(report.product_id)
            .execute(repo.pool())
            .await
            .unwrap();

        for price in [900, 800, 700] {
            let entry = NewHistoryEntry {
                previous_price: Some(price + 100),
                new_price: Some(price),
                previous_stock: None,
                new_stock: None,
                change_type: ChangeType::Price,
                source: HistorySource::Analyzer,
                metadata: Some(serde_json::json!({ "note": price })),
            };
            repo.append_history(&guard, report.product_id, &entry, None).await.unwrap();
        }

        let history = repo.history(report.product_id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(history.windows(2).all(|w| w[0].detected_at <= w[1].detected_at));
        assert_eq!(history[3].metadata, Some(serde_json::json!({ "note": 700 })));
    }

    #[tokio::test]
    async fn failures_escalate_to_error_status() {
        let repo = repository().await;
        let report = repo.save_listing(&listing("m1", 1000, 1), SaveMode::SkipExisting).await.unwrap();
        let guard = repo.lock_product(&listing("m1", 0, 0).natural_key()).await;

        let first = repo.record_failure(&guard, report.product_id, 3).await.unwrap();
        assert_eq!(first, FailureState { consecutive_failures: 1, url_status: UrlStatus::Active });
        repo.record_failure(&guard, report.product_id, 3).await.unwrap();
        let third = repo.record_failure(&guard, report.product_id, 3).await.unwrap();
        assert_eq!(third.url_status, UrlStatus::Error);
        drop(guard);

        assert!(repo.monitoring_targets(None, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn targets_exclude_suspended_and_order_unverified_first() {
        let repo = repository().await;
        let a = repo.save_listing(&listing("a", 1000, 1), SaveMode::SkipExisting).await.unwrap();
        let b = repo.save_listing(&listing("b", 1000, 1), SaveMode::SkipExisting).await.unwrap();
        let c = repo.save_listing(&listing("c", 1000, 1), SaveMode::SkipExisting).await.unwrap();

        sqlx::query("UPDATE inventory SET last_verified_at = NULL WHERE product_id = ?")
            .bind(c.product_id)
            .execute(repo.pool())
            .await
            .unwrap();
        assert!(repo.set_monitoring(b.product_id, false).await.unwrap());

        let targets = repo.monitoring_targets(None, 100).await.unwrap();
        let ids: Vec<i64> = targets.iter().map(|t| t.product.id).collect();
        assert_eq!(ids, vec![c.product_id, a.product_id]);

        let filtered = repo.monitoring_targets(Some(&[a.product_id]), 100).await.unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn archive_removes_inventory_but_keeps_history() {
        let repo = repository().await;
        let report = repo.save_listing(&listing("m1", 1000, 1), SaveMode::SkipExisting).await.unwrap();

        repo.archive(report.product_id).await.unwrap();

        assert!(repo.get_inventory(report.product_id).await.unwrap().is_none());
        assert_eq!(repo.history(report.product_id).await.unwrap().len(), 1);
        let product = repo.require_product(report.product_id).await.unwrap();
        assert_eq!(product.status, ProductStatus::Archived);
        assert!(repo.active_product_ids(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_product_is_reported_with_its_id() {
        let repo = repository().await;
        let error = repo.require_product(42).await.unwrap_err();
        assert_eq!(error.key.as_deref(), Some("product#42"));
    }
}

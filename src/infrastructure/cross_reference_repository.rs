//! Repository for persisted cross-catalog matches

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::domain::{CrossReference, MatchCandidate, MatchType};
use crate::infrastructure::pipeline_error::{PersistenceError, PersistenceResult};
use crate::infrastructure::product_repository::{from_millis, to_millis};

#[derive(Clone)]
pub struct CrossReferenceRepository {
    pool: Arc<SqlitePool>,
}

impl CrossReferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Atomically replace a product's match set
    ///
    /// Variants and repeated external ids are dropped; the product's match
    /// timestamp is refreshed even when nothing qualifies.
    pub async fn replace_for_product(
        &self,
        product_id: i64,
        candidates: &[MatchCandidate],
    ) -> PersistenceResult<Vec<CrossReference>> {
        let fail = |e: sqlx::Error| PersistenceError::new("replace_cross_references", e).with_product(product_id);
        let now = Utc::now();
        let now_ms = to_millis(now);

        let mut tx = self.pool.begin().await.map_err(fail)?;

        let touched = sqlx::query("UPDATE products SET matched_at = ? WHERE id = ?")
            .bind(now_ms)
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        if touched.rows_affected() == 0 {
            return Err(PersistenceError::not_found("product", product_id));
        }

        sqlx::query("DELETE FROM cross_reference WHERE product_id = ?")
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

        let mut seen = HashSet::new();
        let mut stored = Vec::new();

        for candidate in candidates {
            if !candidate.match_type.is_persistable() || !seen.insert(candidate.item.external_id.as_str()) {
                continue;
            }

            let comparison = serde_json::to_string(&candidate.price_comparison)
                .map_err(|e| PersistenceError::new("replace_cross_references", e).with_product(product_id))?;

            let id: i64 = sqlx::query(
                r"
                INSERT INTO cross_reference
                (product_id, external_id, external_title, external_url, confidence, match_type, price_comparison, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                ",
            )
            .bind(product_id)
            .bind(&candidate.item.external_id)
            .bind(&candidate.item.title)
            .bind(&candidate.item.url)
            .bind(candidate.confidence)
            .bind(candidate.match_type.as_str())
            .bind(&comparison)
            .bind(now_ms)
            .fetch_one(&mut *tx)
            .await
            .map_err(fail)?
            .get("id");

            stored.push(CrossReference {
                id,
                product_id,
                external_id: candidate.item.external_id.clone(),
                external_title: candidate.item.title.clone(),
                external_url: candidate.item.url.clone(),
                confidence: candidate.confidence,
                match_type: candidate.match_type,
                price_comparison: candidate.price_comparison.clone(),
                created_at: now,
            });
        }

        tx.commit().await.map_err(fail)?;
        info!(product_id, matches = stored.len(), "Replaced cross references");
        Ok(stored)
    }

    /// Matches for one product, best first
    pub async fn list_for_product(&self, product_id: i64) -> PersistenceResult<Vec<CrossReference>> {
        let rows = sqlx::query(
            r"
            SELECT id, product_id, external_id, external_title, external_url, confidence, match_type,
                   price_comparison, created_at
            FROM cross_reference WHERE product_id = ?
            ORDER BY confidence DESC, id ASC
            ",
        )
        .bind(product_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| PersistenceError::new("list_cross_references", e).with_product(product_id))?;

        rows.iter()
            .map(|row| {
                let price_comparison = serde_json::from_str(row.get("price_comparison"))
                    .map_err(|e| PersistenceError::new("decode_cross_reference", e).with_product(product_id))?;
                Ok(CrossReference {
                    id: row.get("id"),
                    product_id: row.get("product_id"),
                    external_id: row.get("external_id"),
                    external_title: row.get("external_title"),
                    external_url: row.get("external_url"),
                    confidence: row.get("confidence"),
                    match_type: MatchType::parse(row.get("match_type")),
                    price_comparison,
                    created_at: from_millis(row.get("created_at")),
                })
            })
            .collect()
    }

    /// Active products never matched, or last matched before `cutoff`; oldest first
    pub async fn stale_products(&self, cutoff: DateTime<Utc>, limit: u32) -> PersistenceResult<Vec<i64>> {
        let rows = sqlx::query(
            r"
            SELECT id FROM products
            WHERE status = 'active' AND (matched_at IS NULL OR matched_at < ?)
            ORDER BY matched_at IS NOT NULL, matched_at ASC, id ASC
            LIMIT ?
            ",
        )
        .bind(to_millis(cutoff))
        .bind(i64::from(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| PersistenceError::new("stale_products", e))?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }
}

// Database connection and pool management
// SQLite through sqlx; schema is created in place by `migrate`.

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory {
            let db_path = database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        // Every connection to ":memory:" is a separate database
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        Ok(Self { pool })
    }

    /// Fresh migrated in-memory database
    pub async fn in_memory() -> Result<Self> {
        let db = Self::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_products_sql = r"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                source_item_id TEXT NOT NULL,
                product_key TEXT NOT NULL,
                source_url TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                price INTEGER NOT NULL,
                condition TEXT NOT NULL DEFAULT 'used',
                category TEXT NOT NULL DEFAULT '',
                images TEXT NOT NULL DEFAULT '[]',
                seller_name TEXT,
                seller_rating REAL,
                platform_payload TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'active',
                matched_at INTEGER,
                scraped_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (platform, source_item_id)
            )
        ";

        let create_inventory_sql = r"
            CREATE TABLE IF NOT EXISTS inventory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL UNIQUE,
                current_stock INTEGER NOT NULL,
                current_price INTEGER NOT NULL,
                monitoring_enabled INTEGER NOT NULL DEFAULT 1,
                url_status TEXT NOT NULL DEFAULT 'active',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_verified_at INTEGER,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE
            )
        ";

        let create_history_sql = r"
            CREATE TABLE IF NOT EXISTS stock_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL,
                previous_price INTEGER,
                new_price INTEGER,
                previous_stock INTEGER,
                new_stock INTEGER,
                change_type TEXT NOT NULL,
                source TEXT NOT NULL,
                detected_at INTEGER NOT NULL,
                metadata TEXT,
                FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE
            )
        ";

        let create_cross_reference_sql = r"
            CREATE TABLE IF NOT EXISTS cross_reference (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL,
                external_id TEXT NOT NULL,
                external_title TEXT NOT NULL,
                external_url TEXT,
                confidence REAL NOT NULL,
                match_type TEXT NOT NULL,
                price_comparison TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (product_id, external_id),
                FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE
            )
        ";

        let create_alerts_sql = r"
            CREATE TABLE IF NOT EXISTS price_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL,
                old_price INTEGER NOT NULL,
                new_price INTEGER NOT NULL,
                change_percent REAL NOT NULL,
                direction TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE
            )
        ";

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_products_status ON products (status)",
            "CREATE INDEX IF NOT EXISTS idx_products_product_key ON products (product_key)",
            "CREATE INDEX IF NOT EXISTS idx_inventory_targets ON inventory (monitoring_enabled, url_status, last_verified_at)",
            "CREATE INDEX IF NOT EXISTS idx_history_product_order ON stock_history (product_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_history_product_time ON stock_history (product_id, detected_at)",
            "CREATE INDEX IF NOT EXISTS idx_cross_reference_product ON cross_reference (product_id, confidence)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_product ON price_alerts (product_id, created_at)",
        ];

        for sql in [
            create_products_sql,
            create_inventory_sql,
            create_history_sql,
            create_cross_reference_sql,
            create_alerts_sql,
        ] {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        info!("Database schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url).await?;
        assert!(!db.pool().is_closed());
        assert!(db_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_migration_is_idempotent() -> Result<()> {
        let temp_dir = tempdir()?;
        let database_url = format!("sqlite:{}", temp_dir.path().join("test_migration.db").display());

        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;
        db.migrate().await?;

        for table in ["products", "inventory", "stock_history", "cross_reference", "price_alerts"] {
            let result = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table)
                .fetch_optional(db.pool())
                .await?;
            assert!(result.is_some(), "missing table {table}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() -> Result<()> {
        let db = DatabaseConnection::in_memory().await?;
        let orphan = sqlx::query(
            "INSERT INTO inventory (product_id, current_stock, current_price, updated_at) VALUES (999, 1, 1, 0)",
        )
        .execute(db.pool())
        .await;
        assert!(orphan.is_err());
        Ok(())
    }
}

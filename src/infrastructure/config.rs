//! Configuration infrastructure
//!
//! One `AppConfig` is loaded at start-up and handed to `ScoutContext`; nothing
//! reads configuration from ambient state afterwards.
//!
//! Layering: defaults (this module) < JSON file < `RESALE_SCOUT__SECTION__KEY`
//! environment variables.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub extraction: ExtractionConfig,
    pub monitoring: MonitoringConfig,
    pub trend: TrendConfig,
    pub matching: MatchingConfig,
    pub batch: BatchConfig,
    pub catalog: CatalogConfig,
    pub alerts: AlertConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

/// HTTP retrieval behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff unit; retry n waits `base_delay_ms * n` plus jitter
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub timeout_seconds: u64,
    /// Shared across all workers
    pub max_requests_per_second: u32,
    /// Bodies shorter than this are treated as error pages
    pub min_body_bytes: usize,
    /// Statuses that consume a retry instead of failing the fetch outright
    pub retry_on_status: Vec<u16>,
    /// Case-insensitive markers checked against the page `<title>`
    pub error_page_markers: Vec<String>,
    /// Identity pool rotated per attempt
    pub user_agents: Vec<String>,
    pub accept_languages: Vec<String>,
    pub follow_redirects: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Upper bound for a plausible price, smallest currency unit
    pub price_ceiling: i64,
    pub max_images: usize,
    pub title_max_chars: usize,
    pub description_max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub max_targets_per_run: u32,
    /// 1 keeps a single ordered worker
    pub concurrency: usize,
    /// Consecutive failures before a listing is marked `error`
    pub error_threshold: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// |change| at or above this writes history
    pub significant_threshold: f64,
    /// |change| at or above this raises an alert
    pub major_threshold: f64,
    pub lookback_days: i64,
    /// |slope per day| / mean below this is "stable"
    pub stable_dead_zone: f64,
    pub min_prediction_samples: usize,
    /// Sample count at which the data-points factor saturates
    pub saturation_samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub confidence_threshold: f64,
    pub title_weight: f64,
    pub brand_weight: f64,
    pub price_weight: f64,
    /// Source currency units per catalog currency unit (e.g. JPY per USD)
    pub exchange_rate: f64,
    pub max_keywords: usize,
    pub results_per_query: usize,
    /// Pause between catalog queries
    pub query_delay_ms: u64,
    /// Match sets older than this are refreshed by `refresh_stale_matches`
    pub stale_after_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// 1 keeps a single ordered worker
    pub concurrency: usize,
    pub chunk_size: usize,
    /// Pause between chunks
    pub chunk_delay_ms: u64,
}

/// Target catalog search endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub search_endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// When set, major price alerts are POSTed here as JSON
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:` URL; defaults to the app data directory
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<app data>/logs`
    pub directory: Option<PathBuf>,
    /// Rolled files kept on disk
    pub max_files: usize,
    /// Per-target overrides, e.g. "sqlx" => "warn"
    pub module_filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `<app data>/images`
    pub image_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            jitter_ms: defaults::JITTER_MS,
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            min_body_bytes: defaults::MIN_BODY_BYTES,
            retry_on_status: defaults::RETRY_ON_STATUS.to_vec(),
            error_page_markers: defaults::ERROR_PAGE_MARKERS.iter().map(ToString::to_string).collect(),
            user_agents: defaults::USER_AGENTS.iter().map(ToString::to_string).collect(),
            accept_languages: defaults::ACCEPT_LANGUAGES.iter().map(ToString::to_string).collect(),
            follow_redirects: true,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            price_ceiling: defaults::PRICE_CEILING,
            max_images: defaults::MAX_IMAGES,
            title_max_chars: defaults::TITLE_MAX_CHARS,
            description_max_chars: defaults::DESCRIPTION_MAX_CHARS,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_targets_per_run: defaults::MAX_TARGETS_PER_RUN,
            concurrency: defaults::MONITOR_CONCURRENCY,
            error_threshold: defaults::ERROR_THRESHOLD,
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            significant_threshold: defaults::SIGNIFICANT_THRESHOLD,
            major_threshold: defaults::MAJOR_THRESHOLD,
            lookback_days: defaults::LOOKBACK_DAYS,
            stable_dead_zone: defaults::STABLE_DEAD_ZONE,
            min_prediction_samples: defaults::MIN_PREDICTION_SAMPLES,
            saturation_samples: defaults::SATURATION_SAMPLES,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            title_weight: defaults::TITLE_WEIGHT,
            brand_weight: defaults::BRAND_WEIGHT,
            price_weight: defaults::PRICE_WEIGHT,
            exchange_rate: defaults::EXCHANGE_RATE,
            max_keywords: defaults::MAX_KEYWORDS,
            results_per_query: defaults::RESULTS_PER_QUERY,
            query_delay_ms: defaults::QUERY_DELAY_MS,
            stale_after_days: defaults::STALE_AFTER_DAYS,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::BATCH_CONCURRENCY,
            chunk_size: defaults::BATCH_CHUNK_SIZE,
            chunk_delay_ms: defaults::BATCH_CHUNK_DELAY_MS,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            search_endpoint: defaults::CATALOG_SEARCH_ENDPOINT.to_string(),
            api_key: None,
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_filters = HashMap::new();
        module_filters.insert("sqlx".to_string(), "warn".to_string());
        module_filters.insert("reqwest".to_string(), "warn".to_string());
        module_filters.insert("hyper".to_string(), "warn".to_string());

        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            directory: None,
            max_files: defaults::LOG_MAX_FILES,
            module_filters,
        }
    }
}

impl AppConfig {
    /// Reject values that would make the engine misbehave rather than fail loudly
    pub fn validate(&self) -> Result<()> {
        if self.fetch.max_requests_per_second == 0 {
            bail!("fetch.max_requests_per_second must be greater than 0");
        }
        if self.fetch.user_agents.is_empty() {
            bail!("fetch.user_agents must contain at least one identity");
        }
        if self.extraction.price_ceiling <= 0 {
            bail!("extraction.price_ceiling must be positive");
        }

        let trend = &self.trend;
        if !(0.0..=1.0).contains(&trend.significant_threshold) || trend.significant_threshold > trend.major_threshold {
            bail!(
                "trend thresholds must satisfy 0 <= significant ({}) <= major ({})",
                trend.significant_threshold,
                trend.major_threshold
            );
        }
        if !(1..=defaults::MAX_LOOKBACK_DAYS).contains(&trend.lookback_days) {
            bail!("trend.lookback_days must be within 1..={}", defaults::MAX_LOOKBACK_DAYS);
        }

        let matching = &self.matching;
        let weight_sum = matching.title_weight + matching.brand_weight + matching.price_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            bail!("matching weights must sum to 1.0 (got {weight_sum})");
        }
        if matching.exchange_rate <= 0.0 {
            bail!("matching.exchange_rate must be positive");
        }
        if !(0.0..=1.0).contains(&matching.confidence_threshold) {
            bail!("matching.confidence_threshold must be within [0, 1]");
        }

        if self.batch.concurrency == 0 || self.monitoring.concurrency == 0 {
            bail!("worker concurrency must be at least 1");
        }

        Ok(())
    }

    /// Resolved database URL
    pub fn database_url(&self) -> Result<String> {
        match &self.database.url {
            Some(url) => Ok(url.clone()),
            None => {
                let path = ConfigManager::get_app_data_dir()?.join("database").join("resale_scout.db");
                Ok(format!("sqlite:{}", path.display()))
            }
        }
    }

    pub fn image_dir(&self) -> Result<PathBuf> {
        match &self.storage.image_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(ConfigManager::get_app_data_dir()?.join("images")),
        }
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.logging.directory {
            Some(dir) => Ok(dir.clone()),
            None => Ok(ConfigManager::get_app_data_dir()?.join("logs")),
        }
    }
}

/// Configuration file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub const ENV_PREFIX: &'static str = "RESALE_SCOUT";

    /// Manager for the default location under the user data directory
    pub fn new() -> Result<Self> {
        let config_path = Self::get_app_data_dir()?.join("config").join("app_config.json");
        Ok(Self { config_path })
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join("resale-scout");
        Ok(data_dir)
    }

    /// Load configuration, creating the default file on first run
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            self.save_config(&AppConfig::default()).await?;
        }

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from(self.config_path.as_path()).format(config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", self.config_path))?
            .try_deserialize()
            .context("Configuration file contains invalid values")?;

        config.validate()?;

        if (config.matching.exchange_rate - defaults::EXCHANGE_RATE).abs() < f64::EPSILON {
            warn!(
                "⚠️ matching.exchange_rate is the built-in default ({}); price comparisons drift as the real rate moves",
                defaults::EXCHANGE_RATE
            );
        }

        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Default configuration values
pub mod defaults {
    pub const MAX_RETRIES: u32 = 5;
    pub const BASE_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 30_000;
    pub const JITTER_MS: u64 = 500;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 2;
    pub const MIN_BODY_BYTES: usize = 1_000;
    pub const RETRY_ON_STATUS: &[u16] = &[429, 503];

    pub const ERROR_PAGE_MARKERS: &[&str] = &[
        "not found",
        "forbidden",
        "access denied",
        "temporarily unavailable",
        "service unavailable",
        "ページが見つかりません",
        "アクセスできません",
        "メンテナンス中",
    ];

    pub const USER_AGENTS: &[&str] = &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    ];

    pub const ACCEPT_LANGUAGES: &[&str] = &["ja-JP,ja;q=0.9,en;q=0.8", "ja,en-US;q=0.8", "ja-JP,ja;q=0.8,en-US;q=0.5"];

    pub const PRICE_CEILING: i64 = 100_000_000;
    pub const MAX_IMAGES: usize = 10;
    pub const TITLE_MAX_CHARS: usize = 200;
    pub const DESCRIPTION_MAX_CHARS: usize = 2_000;

    pub const MAX_TARGETS_PER_RUN: u32 = 100;
    pub const MONITOR_CONCURRENCY: usize = 4;
    pub const ERROR_THRESHOLD: i64 = 3;

    pub const SIGNIFICANT_THRESHOLD: f64 = 0.05;
    pub const MAJOR_THRESHOLD: f64 = 0.20;
    pub const LOOKBACK_DAYS: i64 = 30;
    pub const MAX_LOOKBACK_DAYS: i64 = 60;
    pub const STABLE_DEAD_ZONE: f64 = 0.005;
    pub const MIN_PREDICTION_SAMPLES: usize = 5;
    pub const SATURATION_SAMPLES: usize = 30;

    pub const CONFIDENCE_THRESHOLD: f64 = 0.75;
    pub const TITLE_WEIGHT: f64 = 0.6;
    pub const BRAND_WEIGHT: f64 = 0.3;
    pub const PRICE_WEIGHT: f64 = 0.1;
    /// JPY per USD. Static on purpose; override it from config.
    pub const EXCHANGE_RATE: f64 = 150.0;
    pub const MAX_KEYWORDS: usize = 5;
    pub const RESULTS_PER_QUERY: usize = 10;
    pub const QUERY_DELAY_MS: u64 = 1_000;
    pub const STALE_AFTER_DAYS: i64 = 7;

    pub const BATCH_CONCURRENCY: usize = 3;
    pub const BATCH_CHUNK_SIZE: usize = 20;
    pub const BATCH_CHUNK_DELAY_MS: u64 = 1_000;

    pub const CATALOG_SEARCH_ENDPOINT: &str = "http://localhost:8787/catalog/search";

    pub const DB_MAX_CONNECTIONS: u32 = 5;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;
    pub const LOG_MAX_FILES: usize = 7;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = AppConfig::default();
        config.trend.significant_threshold = 0.3;
        config.trend.major_threshold = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut config = AppConfig::default();
        config.matching.title_weight = 0.9;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn first_load_writes_default_file() -> Result<()> {
        let dir = tempdir()?;
        let manager = ConfigManager::with_path(dir.path().join("config").join("app_config.json"));

        let config = manager.load_config().await?;
        assert!(manager.config_path().exists());
        assert_eq!(config.fetch.max_retries, defaults::MAX_RETRIES);
        Ok(())
    }

    #[tokio::test]
    async fn partial_file_keeps_defaults_for_missing_sections() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("app_config.json");
        tokio::fs::write(&path, r#"{ "trend": { "significant_threshold": 0.1 }, "matching": { "exchange_rate": 148.5 } }"#).await?;

        let config = ConfigManager::with_path(&path).load_config().await?;
        assert!((config.trend.significant_threshold - 0.1).abs() < f64::EPSILON);
        assert!((config.trend.major_threshold - defaults::MAJOR_THRESHOLD).abs() < f64::EPSILON);
        assert!((config.matching.exchange_rate - 148.5).abs() < f64::EPSILON);
        assert_eq!(config.batch.concurrency, defaults::BATCH_CONCURRENCY);
        Ok(())
    }
}

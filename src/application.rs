//! Application layer module
//!
//! Services that orchestrate fetching, extraction, persistence, monitoring,
//! trend analysis and catalog matching, plus the DTOs they return.

pub mod batch_coordinator;
pub mod context;
pub mod cross_catalog_matcher;
pub mod dto;
pub mod inventory_monitor;
pub mod price_report;
pub mod price_trend;
pub mod scrape_service;
pub mod statistics;
pub mod title_analysis;
pub mod validator;

pub use batch_coordinator::BatchCoordinator;
pub use context::ScoutContext;
pub use cross_catalog_matcher::{CrossCatalogMatcher, MatchError};
pub use dto::{
    BatchOptions, BatchReport, InventoryChange, InventoryCheckReport, MatchResult, RefreshMatchesReport,
    ScrapeOptions, ScrapeResult,
};
pub use inventory_monitor::InventoryMonitor;
pub use price_report::{PriceReport, PriceReporter};
pub use price_trend::{ChangeAnalysis, Prediction, PriceTrendAnalyzer, TrendAnalysis, TrendDirection};
pub use scrape_service::{ImageDownloader, ScrapeService};
pub use validator::ListingValidator;

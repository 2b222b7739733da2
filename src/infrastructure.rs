//! Infrastructure layer: HTTP, HTML parsing, persistence and external integrations
//!
//! Everything that touches the network, the database or the filesystem lives
//! here behind the types the application services consume.

pub mod alert_sink;
pub mod backoff;
pub mod catalog_client;
pub mod config;
pub mod cross_reference_repository;
pub mod database_connection;
pub mod http_client;
pub mod image_store;
pub mod logging;
pub mod parsing;
pub mod pipeline_error;
pub mod platforms;
pub mod product_repository;

// Re-export commonly used items
pub use alert_sink::{AlertError, AlertSink, LogAlertSink, RecordingAlertSink, WebhookAlertSink};
pub use backoff::{BackoffPolicy, Delay, RecordingDelay, TokioDelay};
pub use catalog_client::{CatalogError, CatalogSearch, HttpCatalogClient};
pub use config::{AppConfig, ConfigManager};
pub use cross_reference_repository::CrossReferenceRepository;
pub use database_connection::DatabaseConnection;
pub use http_client::{FetchClient, FetchedPage, PageSource};
pub use image_store::{ImageDownloadReport, ImageStore};
pub use logging::init_logging_with_config;
pub use parsing::ExtractionPipeline;
pub use pipeline_error::{
    ExtractionError, FetchError, FetchFailure, PersistenceError, PersistenceResult, PipelineError,
    ValidationError,
};
pub use platforms::{PlatformProfile, PlatformRegistry};
pub use product_repository::{
    FailureState, MonitorTarget, ProductGuard, ProductRepository, SaveMode, SaveOutcome, SaveReport,
};

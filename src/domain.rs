//! Domain module - entities and value objects
//!
//! Products are the root entity; inventory, history, alerts and cross
//! references are owned by a product and keyed by its id.

pub mod inventory;
pub mod matching;
pub mod product;
pub mod value_objects;

pub use inventory::{
    ChangeType, HistorySource, InventoryRecord, InventoryUpdate, NewHistoryEntry, PriceAlert,
    PriceDirection, PriceSample, StockHistory, UrlStatus,
};
pub use matching::{CatalogItem, CrossReference, MatchCandidate, MatchType, PriceComparison, ScoreBreakdown};
pub use product::{
    Condition, ExtractedListing, NaturalKey, Platform, Product, ProductStatus, SellerInfo,
    ValidatedListing,
};
pub use value_objects::{ProductKey, UrlError, ValidatedUrl};

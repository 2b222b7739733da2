//! HTML parsing for marketplace listing pages
//!
//! `context` indexes a page once, `strategies` holds the per-field fallback
//! chains and `product_detail_parser` runs them into an `ExtractedListing`.
//! The remaining modules are the text, price and image rules shared with the
//! validator and the matcher.

pub mod context;
pub mod images;
pub mod price;
pub mod product_detail_parser;
pub mod strategies;
pub mod structured_data;
pub mod text;

pub use context::PageContext;
pub use price::parse_price;
pub use product_detail_parser::ExtractionPipeline;
pub use structured_data::StructuredProduct;

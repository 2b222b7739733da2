//! Resale Scout - marketplace listing extraction, cross-catalog matching and
//! price drift monitoring.
//!
//! Listings from Japanese second-hand marketplaces are fetched, extracted
//! through per-field fallback chains, validated and stored with their
//! inventory state. Stored products are re-verified on a schedule, their price
//! history is analysed for trends, and they can be matched against a target
//! catalog to judge resale margins.

pub mod application;
pub mod domain;
pub mod infrastructure;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability of the listing behind an inventory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Active,
    Sold,
    Error,
}

impl UrlStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Sold => "sold",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "sold" => Self::Sold,
            "error" => Self::Error,
            _ => Self::Active,
        }
    }

    /// Sold and errored listings are no longer monitoring targets
    pub const fn is_delisted(self) -> bool {
        matches!(self, Self::Sold | Self::Error)
    }
}

/// Monitoring state owned 1:1 by a product
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub id: i64,
    pub product_id: i64,
    pub current_stock: i64,
    pub current_price: i64,
    pub monitoring_enabled: bool,
    pub url_status: UrlStatus,
    pub consecutive_failures: i64,
    pub last_verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Initial,
    Price,
    Stock,
    Both,
}

impl ChangeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Price => "price",
            Self::Stock => "stock",
            Self::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "price" => Self::Price,
            "stock" => Self::Stock,
            "both" => Self::Both,
            _ => Self::Initial,
        }
    }

    /// Classify a delta; `None` when nothing moved
    pub const fn from_flags(price_changed: bool, stock_changed: bool) -> Option<Self> {
        match (price_changed, stock_changed) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Price),
            (false, true) => Some(Self::Stock),
            (false, false) => None,
        }
    }
}

/// Where a history row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    Scrape,
    Rescrape,
    Monitor,
    Analyzer,
}

impl HistorySource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Rescrape => "rescrape",
            Self::Monitor => "monitor",
            Self::Analyzer => "analyzer",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "rescrape" => Self::Rescrape,
            "monitor" => Self::Monitor,
            "analyzer" => Self::Analyzer,
            _ => Self::Scrape,
        }
    }
}

/// Append-only history row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockHistory {
    pub id: i64,
    pub product_id: i64,
    pub previous_price: Option<i64>,
    pub new_price: Option<i64>,
    pub previous_stock: Option<i64>,
    pub new_stock: Option<i64>,
    pub change_type: ChangeType,
    pub source: HistorySource,
    pub detected_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// History row to be appended; `detected_at` is assigned by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub previous_price: Option<i64>,
    pub new_price: Option<i64>,
    pub previous_stock: Option<i64>,
    pub new_stock: Option<i64>,
    pub change_type: ChangeType,
    pub source: HistorySource,
    pub metadata: Option<serde_json::Value>,
}

impl NewHistoryEntry {
    pub const fn initial(price: i64, stock: i64) -> Self {
        Self {
            previous_price: None,
            new_price: Some(price),
            previous_stock: None,
            new_stock: Some(stock),
            change_type: ChangeType::Initial,
            source: HistorySource::Scrape,
            metadata: None,
        }
    }
}

/// Inventory fields rewritten after a successful verification
#[derive(Debug, Clone, Copy)]
pub struct InventoryUpdate {
    pub current_price: i64,
    pub current_stock: i64,
    pub url_status: UrlStatus,
}

/// Price sample fed into trend analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub price: i64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    Drop,
    Rise,
}

impl PriceDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Rise => "rise",
        }
    }
}

/// Major price movement surfaced to the notification collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAlert {
    pub product_id: i64,
    pub old_price: i64,
    pub new_price: i64,
    pub change_percent: f64,
    pub direction: PriceDirection,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_from_flags() {
        assert_eq!(ChangeType::from_flags(true, true), Some(ChangeType::Both));
        assert_eq!(ChangeType::from_flags(true, false), Some(ChangeType::Price));
        assert_eq!(ChangeType::from_flags(false, true), Some(ChangeType::Stock));
        assert_eq!(ChangeType::from_flags(false, false), None);
    }

    #[test]
    fn delisted_states() {
        assert!(!UrlStatus::Active.is_delisted());
        assert!(UrlStatus::Sold.is_delisted());
        assert!(UrlStatus::Error.is_delisted());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source marketplaces the extraction pipeline knows how to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    YahooAuctions,
    Mercari,
    Rakuma,
    Generic,
}

impl Platform {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YahooAuctions => "yahoo_auctions",
            Self::Mercari => "mercari",
            Self::Rakuma => "rakuma",
            Self::Generic => "generic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "yahoo_auctions" => Some(Self::YahooAuctions),
            "mercari" => Some(Self::Mercari),
            "rakuma" => Some(Self::Rakuma),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item condition as normalized across marketplaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    Excellent,
    Used,
    Poor,
    Unknown,
}

impl Condition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Excellent => "excellent",
            Self::Used => "used",
            Self::Poor => "poor",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "new" => Self::New,
            "excellent" => Self::Excellent,
            "used" => Self::Used,
            "poor" => Self::Poor,
            _ => Self::Unknown,
        }
    }

    /// Map a marketplace condition label (Japanese or schema.org) onto the normalized scale.
    ///
    /// Order matters: "未使用に近い" must resolve to `Excellent` before "未使用" hits `New`,
    /// and "やや傷や汚れあり" to `Used` before "傷や汚れあり" hits `Poor`.
    pub fn from_label(label: &str) -> Option<Self> {
        const RULES: &[(&[&str], Condition)] = &[
            (&["未使用に近い", "目立った傷や汚れなし", "美品", "like new", "excellent"], Condition::Excellent),
            (&["やや傷や汚れあり"], Condition::Used),
            (&["全体的に状態が悪い", "傷や汚れあり", "ジャンク", "damaged", "poor", "for parts"], Condition::Poor),
            (&["中古", "usedcondition", "refurbished", "used"], Condition::Used),
            (&["新品", "未使用", "未開封", "newcondition", "brand new", "new"], Condition::New),
        ];

        let lower = label.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }

        RULES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, condition)| *condition)
    }
}

/// Soft lifecycle state of a product row. Products are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Archived,
}

impl ProductStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "archived" { Self::Archived } else { Self::Active }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SellerInfo {
    pub name: Option<String>,
    pub rating: Option<f64>,
}

/// (platform, source item id) pair identifying a listing across re-scrapes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub platform: Platform,
    pub source_item_id: String,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.source_item_id)
    }
}

/// Persisted product row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub platform: Platform,
    pub source_item_id: String,
    pub product_key: String,
    pub source_url: String,
    pub title: String,
    pub description: String,
    /// Smallest currency unit (yen)
    pub price: i64,
    pub condition: Condition,
    pub category: String,
    pub images: Vec<String>,
    pub seller: SellerInfo,
    pub platform_payload: serde_json::Map<String, serde_json::Value>,
    pub status: ProductStatus,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            platform: self.platform,
            source_item_id: self.source_item_id.clone(),
        }
    }
}

/// Raw candidate record produced by the extraction pipeline, before cleaning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedListing {
    pub platform: Platform,
    pub source_item_id: Option<String>,
    pub source_url: String,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub condition: Condition,
    pub category: String,
    pub images: Vec<String>,
    pub seller: SellerInfo,
    pub stock: i64,
    pub sold_out: bool,
    pub platform_payload: serde_json::Map<String, serde_json::Value>,
    /// field name -> strategy that produced it
    #[serde(skip)]
    pub strategy_trace: Vec<(&'static str, &'static str)>,
}

/// Listing that passed validation and cleaning; the only input the persistence layer accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedListing {
    pub platform: Platform,
    pub source_item_id: String,
    pub product_key: String,
    pub source_url: String,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub condition: Condition,
    pub category: String,
    pub images: Vec<String>,
    pub seller: SellerInfo,
    pub stock: i64,
    pub sold_out: bool,
    pub platform_payload: serde_json::Map<String, serde_json::Value>,
    pub scraped_at: DateTime<Utc>,
}

impl ValidatedListing {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            platform: self.platform,
            source_item_id: self.source_item_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_labels_resolve_most_specific_first() {
        assert_eq!(Condition::from_label("未使用に近い"), Some(Condition::Excellent));
        assert_eq!(Condition::from_label("新品、未使用"), Some(Condition::New));
        assert_eq!(Condition::from_label("やや傷や汚れあり"), Some(Condition::Used));
        assert_eq!(Condition::from_label("全体的に状態が悪い"), Some(Condition::Poor));
        assert_eq!(Condition::from_label("https://schema.org/NewCondition"), Some(Condition::New));
        assert_eq!(Condition::from_label("   "), None);
    }

    #[test]
    fn platform_round_trips_through_storage_name() {
        for platform in [Platform::YahooAuctions, Platform::Mercari, Platform::Rakuma, Platform::Generic] {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("ebay"), None);
    }
}

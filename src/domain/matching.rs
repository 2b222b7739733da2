use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Item returned by the target catalog search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    /// Price in the catalog currency (major units)
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    High,
    Similar,
    /// Below the acceptance band; informational only, never persisted
    Variant,
}

impl MatchType {
    /// Fixed confidence bands: [0.9, 1] exact, [0.8, 0.9) high, [0.75, 0.8) similar
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::Exact
        } else if confidence >= 0.8 {
            Self::High
        } else if confidence >= 0.75 {
            Self::Similar
        } else {
            Self::Variant
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::High => "high",
            Self::Similar => "similar",
            Self::Variant => "variant",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "exact" => Self::Exact,
            "high" => Self::High,
            "similar" => Self::Similar,
            _ => Self::Variant,
        }
    }

    pub const fn is_persistable(self) -> bool {
        !matches!(self, Self::Variant)
    }
}

/// Price snapshot taken when the match was scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceComparison {
    /// Source price, smallest source currency unit
    pub source_price: i64,
    /// Candidate price as listed by the catalog
    pub catalog_price: Option<f64>,
    pub catalog_currency: Option<String>,
    /// Candidate price converted into source currency units
    pub converted_price: Option<f64>,
    pub exchange_rate: f64,
    /// converted - source; positive means the catalog sells higher
    pub price_gap: Option<f64>,
    pub price_gap_percent: Option<f64>,
}

/// Per-component breakdown of a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub title_similarity: f64,
    pub brand_match: f64,
    pub price_range_score: f64,
}

/// Transient scored result; becomes a `CrossReference` only when accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub item: CatalogItem,
    pub confidence: f64,
    pub match_type: MatchType,
    pub breakdown: ScoreBreakdown,
    pub price_comparison: PriceComparison,
}

/// Persisted match row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossReference {
    pub id: i64,
    pub product_id: i64,
    pub external_id: String,
    pub external_title: String,
    pub external_url: Option<String>,
    pub confidence: f64,
    pub match_type: MatchType,
    pub price_comparison: PriceComparison,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, MatchType::Exact)]
    #[case(0.9, MatchType::Exact)]
    #[case(0.8999, MatchType::High)]
    #[case(0.8, MatchType::High)]
    #[case(0.7999, MatchType::Similar)]
    #[case(0.75, MatchType::Similar)]
    #[case(0.7499, MatchType::Variant)]
    #[case(0.0, MatchType::Variant)]
    fn confidence_bands(#[case] confidence: f64, #[case] expected: MatchType) {
        assert_eq!(MatchType::from_confidence(confidence), expected);
    }

    #[test]
    fn variants_are_never_persistable() {
        assert!(!MatchType::Variant.is_persistable());
        assert!(MatchType::Similar.is_persistable());
    }
}

//! Validator/Cleaner: the gate between extraction and persistence
//!
//! A listing that leaves here has clean bounded text, a price inside the
//! configured range, only valid image URLs and a stable product key.

use chrono::Utc;

use crate::domain::{ExtractedListing, ProductKey, SellerInfo, ValidatedListing, ValidatedUrl};
use crate::infrastructure::config::ExtractionConfig;
use crate::infrastructure::parsing::images::dedupe_images;
use crate::infrastructure::parsing::text::clean_text;
use crate::infrastructure::pipeline_error::ValidationError;

const CATEGORY_MAX_CHARS: usize = 100;
const SELLER_NAME_MAX_CHARS: usize = 100;
/// Ratings above this are counts, not scores, and are dropped
const SELLER_RATING_MAX: f64 = 1_000_000.0;

#[derive(Debug, Clone)]
pub struct ListingValidator {
    config: ExtractionConfig,
}

impl ListingValidator {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, listing: ExtractedListing) -> Result<ValidatedListing, ValidationError> {
        let title = clean_text(&listing.title, self.config.title_max_chars);
        if title.is_empty() {
            return Err(ValidationError::MissingField("title"));
        }

        if listing.source_url.trim().is_empty() {
            return Err(ValidationError::MissingField("sourceUrl"));
        }
        let source_url = ValidatedUrl::new(&listing.source_url)?;

        if listing.price < 0 || listing.price > self.config.price_ceiling {
            return Err(ValidationError::PriceOutOfRange {
                price: listing.price,
                ceiling: self.config.price_ceiling,
            });
        }

        let product_key = ProductKey::from_url(&source_url).into_string();
        let source_item_id = listing
            .source_item_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| product_key.clone());

        let category = clean_text(&listing.category, CATEGORY_MAX_CHARS);
        let seller = SellerInfo {
            name: listing
                .seller
                .name
                .map(|name| clean_text(&name, SELLER_NAME_MAX_CHARS))
                .filter(|name| !name.is_empty()),
            rating: listing
                .seller
                .rating
                .filter(|rating| rating.is_finite() && (0.0..=SELLER_RATING_MAX).contains(rating)),
        };

        Ok(ValidatedListing {
            platform: listing.platform,
            source_item_id,
            product_key,
            source_url: source_url.as_str().to_string(),
            title,
            description: clean_text(&listing.description, self.config.description_max_chars),
            price: listing.price,
            condition: listing.condition,
            category,
            images: dedupe_images(listing.images, self.config.max_images),
            seller,
            stock: listing.stock.max(0),
            sold_out: listing.sold_out,
            platform_payload: listing.platform_payload,
            scraped_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Condition, Platform, UrlError};
    use rstest::rstest;

    fn listing() -> ExtractedListing {
        ExtractedListing {
            platform: Platform::Mercari,
            source_item_id: Some("m11112222333".into()),
            source_url: "https://jp.mercari.com/item/m11112222333".into(),
            title: "  <b>Canon</b> EOS&nbsp;R6 &amp; レンズ  ".into(),
            description: "説明\n\n  二行目".into(),
            price: 150_000,
            condition: Condition::Excellent,
            category: " カメラ ".into(),
            images: vec![
                "https://static.mercdn.net/a.jpg".into(),
                "https://static.mercdn.net/a.jpg".into(),
                "https://static.mercdn.net/noimage.png".into(),
            ],
            seller: SellerInfo {
                name: Some(" seller ".into()),
                rating: Some(f64::NAN),
            },
            stock: 1,
            sold_out: false,
            platform_payload: serde_json::Map::new(),
            strategy_trace: Vec::new(),
        }
    }

    fn validator() -> ListingValidator {
        ListingValidator::new(ExtractionConfig::default())
    }

    #[test]
    fn cleans_text_images_and_seller() {
        let validated = validator().validate(listing()).unwrap();

        assert_eq!(validated.title, "Canon EOS R6 & レンズ");
        assert_eq!(validated.description, "説明 二行目");
        assert_eq!(validated.category, "カメラ");
        assert_eq!(validated.images, vec!["https://static.mercdn.net/a.jpg"]);
        assert_eq!(validated.seller.name.as_deref(), Some("seller"));
        assert_eq!(validated.seller.rating, None);
        assert_eq!(validated.product_key.len(), 16);
        assert_eq!(validated.source_item_id, "m11112222333");
    }

    #[test]
    fn product_key_is_stable_across_url_spelling() {
        let mut a = listing();
        a.source_url = "HTTPS://JP.MERCARI.COM/item/m11112222333/#photos".into();
        let b = listing();

        let a = validator().validate(a).unwrap();
        let b = validator().validate(b).unwrap();
        assert_eq!(a.product_key, b.product_key);
    }

    #[test]
    fn missing_item_id_falls_back_to_product_key() {
        let mut raw = listing();
        raw.source_item_id = None;
        let validated = validator().validate(raw).unwrap();
        assert_eq!(validated.source_item_id, validated.product_key);
    }

    #[test]
    fn truncates_long_titles() {
        let mut raw = listing();
        raw.title = "あ".repeat(500);
        let validated = validator().validate(raw).unwrap();
        assert_eq!(validated.title.chars().count(), 200);
    }

    #[rstest]
    #[case(-1)]
    #[case(100_000_001)]
    fn rejects_price_outside_range(#[case] price: i64) {
        let mut raw = listing();
        raw.price = price;
        assert!(matches!(
            validator().validate(raw),
            Err(ValidationError::PriceOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_blank_title_and_bad_url() {
        let mut blank = listing();
        blank.title = "<p>  </p>".into();
        assert_eq!(validator().validate(blank).unwrap_err(), ValidationError::MissingField("title"));

        let mut bad_url = listing();
        bad_url.source_url = "mailto:someone@example.com".into();
        assert_eq!(
            validator().validate(bad_url).unwrap_err(),
            ValidationError::InvalidSourceUrl(UrlError::UnsupportedScheme("mailto".into()))
        );
    }
}

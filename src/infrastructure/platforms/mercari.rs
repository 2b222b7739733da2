//! Mercari (メルカリ)

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::{FieldLabels, FieldSelectors, PlatformProfile, capture_from_path, put};
use crate::domain::{Platform, ValidatedUrl};
use crate::infrastructure::parsing::PageContext;

static ITEM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?:item|shops/product)/([A-Za-z0-9]+)").expect("valid mercari id regex"));

pub static PROFILE: PlatformProfile = PlatformProfile {
    platform: Platform::Mercari,
    hosts: &["mercari.com"],
    item_id,
    selectors: FieldSelectors {
        title: &["[data-testid='name'] h1", "[data-testid='name']", "h1[class*='heading']"],
        price: &["[data-testid='price']", "[data-testid='product-price']", "[class*='price'] span"],
        description: &["[data-testid='description']", "pre[class*='description']"],
        condition: &["[data-testid='商品の状態']", "span[data-testid='item-condition']"],
        category: &["[data-testid='item-detail-category'] a:last-of-type", "a[href*='category_id']:last-of-type"],
        seller_name: &["[data-testid='seller-link'] p", "a[href*='/user/profile/'] p"],
        seller_rating: &["[data-testid='seller-link'] [aria-label]"],
        images: &["[data-testid='image-gallery']", "[data-testid='carousel-item']", "div[class*='slick'] figure"],
        sold_out: &["[data-testid='thumbnail-sticker']", "[aria-label='売り切れ']"],
    },
    labels: FieldLabels {
        condition: &["商品の状態"],
        category: &["カテゴリー", "カテゴリ"],
    },
    default_category: "その他",
    sold_markers: &["この商品は売り切れです", "売り切れました"],
    payload,
};

fn item_id(url: &ValidatedUrl) -> Option<String> {
    capture_from_path(&ITEM_ID, url)
}

/// Who pays shipping and how it ships
fn payload(page: &PageContext<'_>) -> Map<String, Value> {
    let mut payload = Map::new();

    let payer = page
        .select_text(&["[data-testid='配送料の負担']"])
        .or_else(|| page.labelled_value(&["配送料の負担"]));
    put(&mut payload, "shippingPayer", payer.map(Value::String));

    let method = page
        .select_text(&["[data-testid='配送の方法']"])
        .or_else(|| page.labelled_value(&["配送の方法"]));
    put(&mut payload, "shippingMethod", method.map(Value::String));

    payload
}

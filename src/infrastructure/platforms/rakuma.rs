//! Rakuma (ラクマ, formerly Fril)

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::{FieldLabels, FieldSelectors, PlatformProfile, capture_from_path, put};
use crate::domain::{Platform, ValidatedUrl};
use crate::infrastructure::parsing::PageContext;

static ITEM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(?:item/)?([0-9a-f]{16,})").expect("valid rakuma id regex"));

pub static PROFILE: PlatformProfile = PlatformProfile {
    platform: Platform::Rakuma,
    hosts: &["fril.jp", "rakuma.rakuten.co.jp"],
    item_id,
    selectors: FieldSelectors {
        title: &["h1.item__name", ".item__name", "h1[itemprop='name']"],
        price: &[".item__price", "p.item__price", "[itemprop='price']"],
        description: &[".item__description", "[itemprop='description']"],
        condition: &[".item__condition", "[itemprop='itemCondition']"],
        category: &[".item__category a:last-of-type", ".breadcrumb li:last-child a"],
        seller_name: &[".item__user-name", ".user-name"],
        seller_rating: &[".item__user-rating", ".user-rating"],
        images: &[".sp-slides", ".item__image", ".photo-gallery"],
        sold_out: &[".item__sold", ".sold-out-label"],
    },
    labels: FieldLabels {
        condition: &["商品の状態"],
        category: &["カテゴリ"],
    },
    default_category: "その他",
    sold_markers: &["SOLD OUT", "売り切れました"],
    payload,
};

fn item_id(url: &ValidatedUrl) -> Option<String> {
    capture_from_path(&ITEM_ID, url)
}

fn payload(page: &PageContext<'_>) -> Map<String, Value> {
    let mut payload = Map::new();
    let payer = page
        .labelled_value(&["配送料の負担", "送料"])
        .or_else(|| page.select_text(&[".item__shipping-payer"]));
    put(&mut payload, "shippingPayer", payer.map(Value::String));
    payload
}

//! Fallback for shops without a dedicated profile

use serde_json::{Map, Value};

use super::{FieldLabels, FieldSelectors, PlatformProfile};
use crate::domain::{Platform, ValidatedUrl};
use crate::infrastructure::parsing::PageContext;

pub static PROFILE: PlatformProfile = PlatformProfile {
    platform: Platform::Generic,
    hosts: &[],
    item_id,
    selectors: FieldSelectors {
        title: &[],
        price: &[],
        description: &[],
        condition: &[],
        category: &[],
        seller_name: &[],
        seller_rating: &[],
        images: &[],
        sold_out: &[],
    },
    labels: FieldLabels {
        condition: &["商品の状態", "状態", "Condition"],
        category: &["カテゴリ", "Category"],
    },
    default_category: "",
    sold_markers: &["SOLD OUT", "売り切れました", "販売終了"],
    payload,
};

/// Generic pages carry no recognizable id; callers fall back to the product key
fn item_id(_url: &ValidatedUrl) -> Option<String> {
    None
}

fn payload(_page: &PageContext<'_>) -> Map<String, Value> {
    Map::new()
}

//! Yahoo! Auctions (ヤフオク!)

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

use super::{FieldLabels, FieldSelectors, PlatformProfile, capture_from_path, put};
use crate::domain::{Platform, ValidatedUrl};
use crate::infrastructure::parsing::PageContext;
use crate::infrastructure::parsing::price::parse_price;

static ITEM_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/auction/([a-z]?\d+)").expect("valid auction id regex"));

pub static PROFILE: PlatformProfile = PlatformProfile {
    platform: Platform::YahooAuctions,
    hosts: &["auctions.yahoo.co.jp"],
    item_id,
    selectors: FieldSelectors {
        title: &["h1.ProductTitle__text", ".ProductTitle__text", "h1[class*='ProductTitle']"],
        price: &[
            ".Price--current .Price__value",
            "dd.Price__value",
            ".Price__value",
            "[class*='Price__value']",
        ],
        description: &[".ProductExplanation__commentBody", "#ProductExplanation", "#adoc"],
        condition: &[],
        category: &["#yjBreadcrumbs a:last-of-type", ".ProductCategory__link"],
        seller_name: &[".Seller__name a", ".Seller__name", "[class*='Seller__name']"],
        seller_rating: &[".Seller__ratingSum", ".Seller__rating a"],
        images: &[".ProductImage__body", ".ProductImage__inner", "#imageSlider"],
        sold_out: &[".ClosedHeader", "[class*='ClosedHeader']"],
    },
    labels: FieldLabels {
        condition: &["状態", "商品の状態"],
        category: &["カテゴリ"],
    },
    default_category: "オークション",
    sold_markers: &["このオークションは終了しています", "オークションは終了しました"],
    payload,
};

fn item_id(url: &ValidatedUrl) -> Option<String> {
    capture_from_path(&ITEM_ID, url)
}

/// Bid count, auction end time and buyout price
fn payload(page: &PageContext<'_>) -> Map<String, Value> {
    let mut payload = Map::new();

    let bids = page
        .select_text(&[".Count__number", "[class*='Count__number']"])
        .or_else(|| page.labelled_value(&["入札件数"]))
        .and_then(|text| parse_price(&text));
    put(&mut payload, "bidCount", bids.map(|n| json!(n)));

    let end_time = page.labelled_value(&["終了日時"]);
    put(&mut payload, "auctionEndTime", end_time.map(Value::String));

    let buyout = page
        .select_text(&[".Price--buynow .Price__value", "[class*='Price--buynow'] [class*='Price__value']"])
        .and_then(|text| parse_price(&text));
    put(&mut payload, "buyoutPrice", buyout.map(|n| json!(n)));

    payload
}

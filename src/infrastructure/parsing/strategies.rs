//! Per-field extraction strategies
//!
//! Every field has an ordered list of named, pure strategy functions. The
//! pipeline walks a list until one returns a value that passes the field's
//! plausibility check, recording which strategy won. Order within each list is
//! structured data, meta tags, platform selectors, generic page structure and
//! finally free-text patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::PageContext;
use super::images::resolve_image_url;
use super::price::{find_yen_amount, parse_price};
use crate::domain::{Condition, ValidatedUrl};

pub type StrategyFn<T> = fn(&PageContext<'_>) -> Option<T>;

/// Named strategy; the name ends up in the extraction trace and in errors
pub type Strategy<T> = (&'static str, StrategyFn<T>);

static CONDITION_TEXT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"商品の状態\s*[:：]?\s*(\S+)").expect("valid condition regex"));

static DECIMAL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid decimal regex"));

/// Separators between a product name and the site name in `<title>`
const TITLE_SUFFIX_SEPARATORS: &[&str] = &[" | ", "｜", " - ", " – ", " — "];

const GENERIC_PRICE_SELECTORS: &[&str] = &[
    "[itemprop='price']",
    "[class*='price']",
    "[class*='Price']",
    "[id*='price']",
];

const GENERIC_BREADCRUMB_SELECTORS: &[&str] = &[
    "[itemtype*='BreadcrumbList'] [itemprop='name']",
    "nav[aria-label*='breadcrumb'] li",
    ".breadcrumb li",
    ".breadcrumbs li",
];

const GENERIC_IMAGE_SELECTORS: &[&str] = &["main img", "article img", "[class*='gallery'] img", "img"];

/// How many generic `img` elements the structural fallback looks at
const GENERIC_IMAGE_LIMIT: usize = 5;

const SOLD_AVAILABILITY: &[&str] = &["soldout", "outofstock", "discontinued"];

pub const TITLE: &[Strategy<String>] = &[
    ("json_ld", title_json_ld),
    ("meta", title_meta),
    ("platform_selectors", title_platform),
    ("generic_structure", title_generic),
    ("text_pattern", title_from_document_title),
];

pub const PRICE: &[Strategy<i64>] = &[
    ("json_ld", price_json_ld),
    ("meta", price_meta),
    ("platform_selectors", price_platform),
    ("generic_structure", price_generic),
    ("text_pattern", price_text_pattern),
];

pub const SOURCE_URL: &[Strategy<String>] = &[
    ("canonical_link", source_url_canonical),
    ("meta", source_url_meta),
    ("page_url", source_url_page),
];

pub const DESCRIPTION: &[Strategy<String>] = &[
    ("json_ld", description_json_ld),
    ("meta", description_meta),
    ("platform_selectors", description_platform),
    ("generic_structure", description_generic),
];

pub const CONDITION: &[Strategy<Condition>] = &[
    ("json_ld", condition_json_ld),
    ("meta", condition_meta),
    ("platform_selectors", condition_platform),
    ("generic_structure", condition_labelled),
    ("text_pattern", condition_text_pattern),
];

pub const CATEGORY: &[Strategy<String>] = &[
    ("json_ld", category_json_ld),
    ("meta", category_meta),
    ("platform_selectors", category_platform),
    ("generic_structure", category_generic),
];

pub const SELLER_NAME: &[Strategy<String>] = &[
    ("json_ld", seller_name_json_ld),
    ("platform_selectors", seller_name_platform),
    ("generic_structure", seller_name_labelled),
];

pub const SELLER_RATING: &[Strategy<f64>] = &[
    ("json_ld", seller_rating_json_ld),
    ("platform_selectors", seller_rating_platform),
];

/// Image strategies are unioned rather than short-circuited
pub const IMAGES: &[Strategy<Vec<String>>] = &[
    ("json_ld", images_json_ld),
    ("meta", images_meta),
    ("platform_selectors", images_platform),
    ("generic_structure", images_generic),
];

/// Sold/ended detection; any hit marks the listing sold out
pub const SOLD_OUT: &[Strategy<bool>] = &[
    ("json_ld", sold_out_json_ld),
    ("meta", sold_out_meta),
    ("platform_selectors", sold_out_platform),
    ("text_pattern", sold_out_text),
];

fn title_json_ld(page: &PageContext<'_>) -> Option<String> {
    page.structured.as_ref()?.name()
}

fn title_meta(page: &PageContext<'_>) -> Option<String> {
    first_meta(page, &["og:title", "twitter:title"])
}

fn title_platform(page: &PageContext<'_>) -> Option<String> {
    page.select_text(page.profile.selectors.title)
}

fn title_generic(page: &PageContext<'_>) -> Option<String> {
    page.select_text(&["h1"])
}

/// `<title>` without the trailing site name
fn title_from_document_title(page: &PageContext<'_>) -> Option<String> {
    let title = page.document_title()?;
    let name = TITLE_SUFFIX_SEPARATORS
        .iter()
        .filter_map(|separator| title.split_once(separator).map(|(head, _)| head))
        .min_by_key(|head| head.len())
        .unwrap_or(title.as_str());
    Some(name.trim().to_string())
}

fn price_json_ld(page: &PageContext<'_>) -> Option<i64> {
    parse_price(&page.structured.as_ref()?.price_text()?)
}

fn price_meta(page: &PageContext<'_>) -> Option<i64> {
    first_meta(page, &["product:price:amount", "og:price:amount", "price"]).and_then(|text| parse_price(&text))
}

fn price_platform(page: &PageContext<'_>) -> Option<i64> {
    page.select_text(page.profile.selectors.price)
        .and_then(|text| parse_price(&text))
}

fn price_generic(page: &PageContext<'_>) -> Option<i64> {
    page.select_attr(&["[itemprop='price'][content]"], "content")
        .or_else(|| page.select_text(GENERIC_PRICE_SELECTORS))
        .and_then(|text| parse_price(&text))
}

fn price_text_pattern(page: &PageContext<'_>) -> Option<i64> {
    find_yen_amount(page.text())
}

fn source_url_canonical(page: &PageContext<'_>) -> Option<String> {
    page.select_attr(&["link[rel='canonical']"], "href")
        .and_then(|href| page.base.join(&href).ok())
        .map(|url| url.to_string())
}

fn source_url_meta(page: &PageContext<'_>) -> Option<String> {
    first_meta(page, &["og:url"])
        .and_then(|href| page.base.join(&href).ok())
        .map(|url| url.to_string())
}

fn source_url_page(page: &PageContext<'_>) -> Option<String> {
    Some(page.url.as_str().to_string())
}

fn description_json_ld(page: &PageContext<'_>) -> Option<String> {
    page.structured.as_ref()?.description()
}

fn description_meta(page: &PageContext<'_>) -> Option<String> {
    first_meta(page, &["og:description", "description"])
}

fn description_platform(page: &PageContext<'_>) -> Option<String> {
    page.select_text(page.profile.selectors.description)
}

fn description_generic(page: &PageContext<'_>) -> Option<String> {
    page.select_text(&["[itemprop='description']", "[class*='description']", "#description"])
}

fn condition_json_ld(page: &PageContext<'_>) -> Option<Condition> {
    Condition::from_label(&page.structured.as_ref()?.condition()?)
}

fn condition_meta(page: &PageContext<'_>) -> Option<Condition> {
    first_meta(page, &["product:condition", "itemcondition"]).and_then(|label| Condition::from_label(&label))
}

fn condition_platform(page: &PageContext<'_>) -> Option<Condition> {
    page.select_text(page.profile.selectors.condition)
        .and_then(|text| Condition::from_label(&text))
}

fn condition_labelled(page: &PageContext<'_>) -> Option<Condition> {
    page.labelled_value(page.profile.labels.condition)
        .and_then(|text| Condition::from_label(&text))
}

fn condition_text_pattern(page: &PageContext<'_>) -> Option<Condition> {
    let captures = CONDITION_TEXT_REGEX.captures(page.text())?;
    Condition::from_label(captures.get(1)?.as_str())
}

fn category_json_ld(page: &PageContext<'_>) -> Option<String> {
    last_segment(&page.structured.as_ref()?.category()?)
}

fn category_meta(page: &PageContext<'_>) -> Option<String> {
    last_segment(&first_meta(page, &["product:category"])?)
}

fn category_platform(page: &PageContext<'_>) -> Option<String> {
    page.select_text(page.profile.selectors.category)
}

/// Last breadcrumb item, else the カテゴリ table row
fn category_generic(page: &PageContext<'_>) -> Option<String> {
    page.select_texts(GENERIC_BREADCRUMB_SELECTORS)
        .pop()
        .or_else(|| page.labelled_value(page.profile.labels.category))
}

fn seller_name_json_ld(page: &PageContext<'_>) -> Option<String> {
    page.structured.as_ref()?.seller_name()
}

fn seller_name_platform(page: &PageContext<'_>) -> Option<String> {
    page.select_text(page.profile.selectors.seller_name)
}

fn seller_name_labelled(page: &PageContext<'_>) -> Option<String> {
    page.labelled_value(&["出品者", "Seller"])
}

fn seller_rating_json_ld(page: &PageContext<'_>) -> Option<f64> {
    let rating = page.structured.as_ref()?.raw().get("aggregateRating")?.get("ratingValue")?;
    match rating {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn seller_rating_platform(page: &PageContext<'_>) -> Option<f64> {
    page.select_text(page.profile.selectors.seller_rating)
        .and_then(|text| parse_decimal(&text))
}

fn images_json_ld(page: &PageContext<'_>) -> Option<Vec<String>> {
    let images = page.structured.as_ref()?.images();
    Some(images.iter().filter_map(|src| resolve_image_url(&page.base, src)).collect())
}

fn images_meta(page: &PageContext<'_>) -> Option<Vec<String>> {
    first_meta(page, &["og:image", "og:image:url", "twitter:image"])
        .and_then(|src| resolve_image_url(&page.base, &src))
        .map(|url| vec![url])
}

fn images_platform(page: &PageContext<'_>) -> Option<Vec<String>> {
    Some(page.images(page.profile.selectors.images))
}

fn images_generic(page: &PageContext<'_>) -> Option<Vec<String>> {
    Some(page.images(GENERIC_IMAGE_SELECTORS).into_iter().take(GENERIC_IMAGE_LIMIT).collect())
}

fn sold_out_json_ld(page: &PageContext<'_>) -> Option<bool> {
    let availability = page.structured.as_ref()?.availability()?.to_lowercase();
    SOLD_AVAILABILITY.iter().any(|marker| availability.contains(marker)).then_some(true)
}

fn sold_out_meta(page: &PageContext<'_>) -> Option<bool> {
    let availability = first_meta(page, &["product:availability", "og:availability"])?.to_lowercase();
    (availability.contains("out of stock") || availability == "oos").then_some(true)
}

fn sold_out_platform(page: &PageContext<'_>) -> Option<bool> {
    page.exists(page.profile.selectors.sold_out).then_some(true)
}

fn sold_out_text(page: &PageContext<'_>) -> Option<bool> {
    page.contains_any(page.profile.sold_markers).then_some(true)
}

/// Trimmed length over 5 characters and not just digits or punctuation
pub fn is_plausible_title(title: &str) -> bool {
    let trimmed = title.trim();
    trimmed.chars().count() > 5 && trimmed.chars().any(char::is_alphabetic)
}

pub fn is_plausible_price(price: i64, ceiling: i64) -> bool {
    price > 0 && price < ceiling
}

pub fn is_plausible_source_url(candidate: &str) -> bool {
    ValidatedUrl::new(candidate).is_ok()
}

fn first_meta(page: &PageContext<'_>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| page.meta(key)).map(ToString::to_string)
}

/// "家電 > カメラ > ミラーレス" -> "ミラーレス"
fn last_segment(path: &str) -> Option<String> {
    path.rsplit(['>', '/', '＞'])
        .map(str::trim)
        .find(|segment| !segment.is_empty())
        .map(ToString::to_string)
}

fn parse_decimal(text: &str) -> Option<f64> {
    let normalized = super::text::normalize_width(text).replace(',', "");
    DECIMAL_REGEX.find(&normalized)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_plausibility() {
        assert!(is_plausible_title("Canon EOS R6"));
        assert!(is_plausible_title("ミラーレス一眼カメラ"));
        assert!(!is_plausible_title("  abc  "));
        assert!(!is_plausible_title("123456789"));
        assert!(!is_plausible_title("!!!---???"));
        assert!(!is_plausible_title("【】・★★★"));
    }

    #[test]
    fn price_plausibility_excludes_zero_and_ceiling() {
        assert!(is_plausible_price(1, 100));
        assert!(!is_plausible_price(0, 100));
        assert!(!is_plausible_price(100, 100));
    }

    #[test]
    fn category_paths_keep_the_leaf() {
        assert_eq!(last_segment("家電 > カメラ > ミラーレス").as_deref(), Some("ミラーレス"));
        assert_eq!(last_segment("Cameras").as_deref(), Some("Cameras"));
        assert_eq!(last_segment(" > "), None);
    }

    #[test]
    fn decimals_tolerate_full_width_and_separators() {
        assert_eq!(parse_decimal("評価 ４.８"), Some(4.8));
        assert_eq!(parse_decimal("1,234件"), Some(1234.0));
        assert_eq!(parse_decimal("なし"), None);
    }
}

//! Price text parsing
//!
//! Prices are whole yen. Currency marks, separators, tax notes and full-width
//! digits are tolerated; the first number in the text wins.

use once_cell::sync::Lazy;
use regex::Regex;

use super::text::normalize_width;

static NUMBER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").expect("valid number regex"));

/// Price written with a yen mark or 円 suffix, for free-text search
static YEN_AMOUNT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[¥￥]\s*(\d{1,3}(?:,\d{3})+|\d+)|(\d{1,3}(?:,\d{3})+|\d+)\s*円").expect("valid yen regex")
});

/// Parse the first number in `text` as a whole-yen amount
pub fn parse_price(text: &str) -> Option<i64> {
    let normalized = normalize_width(text).replace('，', ",");
    let number = NUMBER_REGEX.find(&normalized)?.as_str().replace(',', "");
    let whole = number.split('.').next()?;
    whole.parse().ok()
}

/// First explicit yen amount in free text
pub fn find_yen_amount(text: &str) -> Option<i64> {
    let normalized = normalize_width(text);
    let captures = YEN_AMOUNT_REGEX.captures(&normalized)?;
    let digits = captures.get(1).or_else(|| captures.get(2))?.as_str();
    digits.replace(',', "").parse().ok()
}

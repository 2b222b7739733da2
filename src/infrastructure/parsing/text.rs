//! Text normalization shared by extraction, cleaning and title analysis

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

/// Fold full-width ASCII (Ｃａｎｏｎ, １２３) and the ideographic space to half-width
pub fn normalize_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Collapse every whitespace run into a single space and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove markup tags, leaving their text
pub fn strip_markup(text: &str) -> String {
    TAG_REGEX.replace_all(text, " ").into_owned()
}

/// Truncate to at most `max_chars` characters without splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Entity decode, markup strip, whitespace collapse, truncate
pub fn clean_text(raw: &str, max_chars: usize) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let stripped = strip_markup(&decoded);
    // Entities like &lt;b&gt; decode into markup, so strip twice
    let decoded_again = html_escape::decode_html_entities(&stripped);
    truncate_chars(&collapse_whitespace(&strip_markup(&decoded_again)), max_chars)
}

//! Image URL rules shared by extraction and cleaning

use std::collections::HashSet;
use url::Url;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "avif"];

const PLACEHOLDER_MARKERS: &[&str] = &[
    "noimage",
    "no_image",
    "no-image",
    "placeholder",
    "spacer",
    "blank.gif",
    "transparent.gif",
    "loading.gif",
    "dummy",
];

/// Resolve `src` against `base`; `None` for data URIs and unparseable values
pub fn resolve_image_url(base: &Url, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    base.join(src).ok().map(|u| u.to_string())
}

/// http(s), not a placeholder, and either extension-less or a known image extension
pub fn is_valid_image_url(candidate: &str) -> bool {
    let Ok(parsed) = Url::parse(candidate) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let path = parsed.path().to_lowercase();
    if PLACEHOLDER_MARKERS.iter().any(|marker| path.contains(marker)) {
        return false;
    }

    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, extension)) => IMAGE_EXTENSIONS.contains(&extension),
        None => true,
    }
}

/// Keep valid URLs in first-seen order, without duplicates, at most `max`
pub fn dedupe_images<I>(candidates: I, max: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|url| is_valid_image_url(url))
        .filter(|url| seen.insert(url.clone()))
        .take(max)
        .collect()
}

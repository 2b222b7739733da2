//! Parse context shared by every extraction strategy
//!
//! The document is parsed once; meta tags, JSON-LD and visible text are indexed
//! up front so strategies stay cheap, pure lookups.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::trace;
use url::Url;

use super::structured_data::StructuredProduct;
use super::text::collapse_whitespace;
use crate::domain::ValidatedUrl;
use crate::infrastructure::platforms::PlatformProfile;

const HIDDEN_TEXT_PARENTS: &[&str] = &["script", "style", "noscript", "template"];
const IMAGE_SOURCE_ATTRS: &[&str] = &["data-src", "data-original", "data-lazy-src", "src"];

pub struct PageContext<'a> {
    pub document: Html,
    pub url: &'a ValidatedUrl,
    pub base: Url,
    pub profile: &'static PlatformProfile,
    pub structured: Option<StructuredProduct>,
    meta: HashMap<String, String>,
    text: String,
}

impl<'a> PageContext<'a> {
    pub fn new(html: &str, url: &'a ValidatedUrl, profile: &'static PlatformProfile) -> Option<Self> {
        let document = Html::parse_document(html);
        let base = Url::parse(url.as_str()).ok()?;
        let structured = StructuredProduct::from_document(&document);
        let meta = index_meta(&document);
        let text = visible_text(&document);

        trace!(
            url = url.as_str(),
            has_json_ld = structured.is_some(),
            meta_tags = meta.len(),
            "Page indexed"
        );

        Some(Self {
            document,
            url,
            base,
            profile,
            structured,
            meta,
            text,
        })
    }

    /// Content of a `<meta>` tag by property, name or itemprop (case-insensitive key)
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Visible body text with whitespace collapsed
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn document_title(&self) -> Option<String> {
        self.select_text(&["title"])
    }

    /// First non-empty element text over an ordered selector list
    pub fn select_text(&self, selectors: &[&str]) -> Option<String> {
        selectors.iter().filter_map(|s| parse_selector(s)).find_map(|selector| {
            self.document
                .select(&selector)
                .map(|element| element_text(&element))
                .find(|text| !text.is_empty())
        })
    }

    /// Every non-empty element text matched by any selector, in order
    pub fn select_texts(&self, selectors: &[&str]) -> Vec<String> {
        selectors
            .iter()
            .filter_map(|s| parse_selector(s))
            .flat_map(|selector| {
                self.document
                    .select(&selector)
                    .map(|element| element_text(&element))
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// First non-empty attribute value over an ordered selector list
    pub fn select_attr(&self, selectors: &[&str], attr: &str) -> Option<String> {
        selectors.iter().filter_map(|s| parse_selector(s)).find_map(|selector| {
            self.document
                .select(&selector)
                .filter_map(|element| element.value().attr(attr))
                .map(str::trim)
                .find(|value| !value.is_empty())
                .map(ToString::to_string)
        })
    }

    pub fn exists(&self, selectors: &[&str]) -> bool {
        selectors
            .iter()
            .filter_map(|s| parse_selector(s))
            .any(|selector| self.document.select(&selector).next().is_some())
    }

    /// Image sources under the given selectors (the element itself or nested `img`), resolved
    pub fn images(&self, selectors: &[&str]) -> Vec<String> {
        let Some(img) = parse_selector("img") else {
            return Vec::new();
        };

        selectors
            .iter()
            .filter_map(|s| parse_selector(s))
            .flat_map(|selector| self.document.select(&selector).collect::<Vec<_>>())
            .flat_map(|element| {
                if element.value().name() == "img" {
                    vec![element]
                } else {
                    element.select(&img).collect()
                }
            })
            .filter_map(|image| image_source(&image))
            .filter_map(|src| super::images::resolve_image_url(&self.base, &src))
            .collect()
    }

    /// Value next to a `dt`/`th` label, e.g. 商品の状態 → 目立った傷や汚れなし
    pub fn labelled_value(&self, labels: &[&str]) -> Option<String> {
        if labels.is_empty() {
            return None;
        }
        let selector = parse_selector("dt, th")?;

        self.document.select(&selector).find_map(|label| {
            let label_text = element_text(&label);
            if !labels.iter().any(|wanted| label_text.contains(wanted)) {
                return None;
            }
            label
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .map(|value| element_text(&value))
                .find(|text| !text.is_empty())
        })
    }

    pub fn contains_any(&self, markers: &[&str]) -> bool {
        markers.iter().any(|marker| self.text.contains(marker))
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    Selector::parse(selector).ok()
}

fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn image_source(image: &ElementRef<'_>) -> Option<String> {
    let element = image.value();
    IMAGE_SOURCE_ATTRS
        .iter()
        .find_map(|attr| element.attr(attr).filter(|v| !v.trim().is_empty()))
        .or_else(|| {
            element
                .attr("srcset")
                .and_then(|srcset| srcset.split(',').next())
                .and_then(|first| first.split_whitespace().next())
        })
        .map(ToString::to_string)
}

fn index_meta(document: &Html) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    let Some(selector) = parse_selector("meta[content]") else {
        return meta;
    };

    for element in document.select(&selector) {
        let value = element.value();
        let Some(content) = value.attr("content").map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        for key_attr in ["property", "name", "itemprop"] {
            if let Some(key) = value.attr(key_attr) {
                meta.entry(key.to_lowercase()).or_insert_with(|| content.to_string());
            }
        }
    }
    meta
}

fn visible_text(document: &Html) -> String {
    let mut text = String::new();

    for node in document.root_element().descendants() {
        let Some(chunk) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| HIDDEN_TEXT_PARENTS.contains(&name.as_str()));
        if !hidden {
            text.push_str(chunk);
            text.push(' ');
        }
    }

    collapse_whitespace(&text)
}

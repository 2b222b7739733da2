//! Embedded JSON-LD `Product` metadata
//!
//! Marketplaces embed schema.org data inconsistently: single objects, arrays,
//! `@graph` wrappers, prices as strings or numbers, offers as object or list.
//! The accessors here flatten those shapes.

use scraper::{Html, Selector};
use serde_json::Value;

/// The first schema.org `Product` node found on the page
#[derive(Debug, Clone)]
pub struct StructuredProduct(Value);

impl StructuredProduct {
    pub fn from_document(document: &Html) -> Option<Self> {
        let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

        document
            .select(&selector)
            .filter_map(|script| serde_json::from_str::<Value>(&script.text().collect::<String>()).ok())
            .find_map(|value| find_product(&value).cloned())
            .map(Self)
    }

    pub fn name(&self) -> Option<String> {
        string_at(&self.0, "name")
    }

    pub fn description(&self) -> Option<String> {
        string_at(&self.0, "description")
    }

    pub fn category(&self) -> Option<String> {
        string_at(&self.0, "category")
    }

    pub fn sku(&self) -> Option<String> {
        string_at(&self.0, "sku").or_else(|| string_at(&self.0, "productID"))
    }

    pub fn brand(&self) -> Option<String> {
        match self.0.get("brand")? {
            Value::String(brand) => Some(brand.clone()),
            other => string_at(other, "name"),
        }
    }

    pub fn condition(&self) -> Option<String> {
        string_at(&self.0, "itemCondition").or_else(|| self.offer_string("itemCondition"))
    }

    /// Offer price as written (string or number)
    pub fn price_text(&self) -> Option<String> {
        self.offers().find_map(|offer| match offer.get("price").or_else(|| offer.get("lowPrice"))? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn availability(&self) -> Option<String> {
        self.offer_string("availability")
    }

    pub fn seller_name(&self) -> Option<String> {
        self.offers().find_map(|offer| match offer.get("seller")? {
            Value::String(name) => Some(name.clone()),
            seller => string_at(seller, "name"),
        })
    }

    pub fn images(&self) -> Vec<String> {
        match self.0.get("image") {
            Some(Value::String(url)) => vec![url.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(url) => Some(url.clone()),
                    other => string_at(other, "url").or_else(|| string_at(other, "contentUrl")),
                })
                .collect(),
            Some(other) => string_at(other, "url").into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Raw node, for platform payload extractors
    pub fn raw(&self) -> &Value {
        &self.0
    }

    fn offers(&self) -> impl Iterator<Item = &Value> {
        let offers: Vec<&Value> = match self.0.get("offers") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(offer) => vec![offer],
            None => Vec::new(),
        };
        offers.into_iter()
    }

    fn offer_string(&self, key: &str) -> Option<String> {
        self.offers().find_map(|offer| string_at(offer, key))
    }
}

fn is_product(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(kind)) => kind == "Product",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some("Product")),
        _ => false,
    }
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            if is_product(value) {
                Some(value)
            } else {
                map.get("@graph").and_then(find_product)
            }
        }
        _ => None,
    }
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

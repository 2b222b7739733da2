//! Catalog matching end to end: query building, scoring, persistence

mod common;

use common::{harness, mercari_page};
use resale_scout_lib::application::title_analysis::TitleAnalysis;
use resale_scout_lib::application::{MatchError, ScrapeOptions};
use resale_scout_lib::domain::{CatalogItem, MatchType};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ITEM_URL: &str = "https://jp.mercari.com/item/m99887766554";
const TITLE: &str = "Apple iPhone 14 Pro 128GB";

fn item(external_id: &str, title: &str, brand: Option<&str>, usd: f64) -> CatalogItem {
    CatalogItem {
        external_id: external_id.to_string(),
        title: title.to_string(),
        brand: brand.map(ToString::to_string),
        price: Some(usd),
        currency: Some("USD".to_string()),
        url: Some(format!("https://catalog.example/dp/{external_id}")),
    }
}

async fn registered(h: &common::Harness) -> i64 {
    h.pages.serve(ITEM_URL, mercari_page(TITLE, 120_000, false));
    let result = h
        .context
        .scraper
        .scrape_product(ITEM_URL, ScrapeOptions::default(), &CancellationToken::new())
        .await;
    result.product_id.unwrap()
}

#[tokio::test]
async fn known_brand_outranks_unknown_brand_with_same_overlap() {
    let h = harness().await;
    let product_id = registered(&h).await;
    let product = h.context.products.require_product(product_id).await.unwrap();
    let analysis = TitleAnalysis::new(&product.title, 5);

    let branded = h
        .context
        .matcher
        .score(&product, &analysis, item("B0APPLE", "iPhone 14 Pro 128GB", Some("Apple"), 800.0));
    let unbranded = h
        .context
        .matcher
        .score(&product, &analysis, item("B0PLAIN", "iPhone 14 Pro 128GB", None, 800.0));

    assert_eq!(
        branded.breakdown.title_similarity,
        unbranded.breakdown.title_similarity
    );
    assert!(branded.confidence > unbranded.confidence);
    assert_eq!(branded.breakdown.brand_match, 1.0);
    assert_eq!(unbranded.breakdown.brand_match, 0.3);
    // 800 USD at the default rate is exactly the source price
    assert_eq!(branded.breakdown.price_range_score, 1.0);
    assert_eq!(branded.price_comparison.converted_price, Some(120_000.0));
}

#[tokio::test]
async fn find_matches_dedupes_filters_and_persists() {
    let h = harness().await;
    let product_id = registered(&h).await;

    let apple = item("B0APPLE", "iPhone 14 Pro 128GB", Some("Apple"), 800.0);
    let plain = item("B0PLAIN", "iPhone 14 Pro 128GB", None, 800.0);
    h.catalog.answer("iphone", vec![apple.clone(), plain]);
    h.catalog.answer("iphone apple", vec![apple]);

    let result = h
        .context
        .matcher
        .find_matches(product_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.catalog.queries(), vec!["iphone", "iphone apple"]);
    assert_eq!(h.delay.recorded(), vec![Duration::from_millis(1_000)]);

    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].item.external_id, "B0APPLE");
    assert_eq!(result.candidates[0].match_type, MatchType::High);

    let stored = h.context.cross_refs.list_for_product(product_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!((0.75..=1.0).contains(&stored[0].confidence));
}

#[tokio::test]
async fn rematch_replaces_previous_set() {
    let h = harness().await;
    let product_id = registered(&h).await;
    let cancel = CancellationToken::new();

    h.catalog
        .answer("iphone", vec![item("B0FIRST", "Apple iPhone 14 Pro 128GB", None, 800.0)]);
    h.context.matcher.find_matches(product_id, &cancel).await.unwrap();

    h.catalog
        .answer("iphone", vec![item("B0SECOND", "Apple iPhone 14 Pro 128GB", None, 790.0)]);
    h.context.matcher.find_matches(product_id, &cancel).await.unwrap();

    let stored = h.context.cross_refs.list_for_product(product_id).await.unwrap();
    let ids: Vec<&str> = stored.iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["B0SECOND"]);
}

#[tokio::test]
async fn unavailable_catalog_keeps_existing_matches() {
    let h = harness().await;
    let product_id = registered(&h).await;
    let cancel = CancellationToken::new();

    h.catalog
        .answer("iphone", vec![item("B0APPLE", "iPhone 14 Pro 128GB", Some("Apple"), 800.0)]);
    h.context.matcher.find_matches(product_id, &cancel).await.unwrap();

    h.catalog.set_failing(true);
    let error = h.context.matcher.find_matches(product_id, &cancel).await.unwrap_err();
    assert_eq!(error, MatchError::CatalogUnavailable { attempted: 2 });

    assert_eq!(h.context.cross_refs.list_for_product(product_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_product_is_a_persistence_error() {
    let h = harness().await;
    let error = h
        .context
        .matcher
        .find_matches(4242, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, MatchError::Persistence(_)));
}

#[tokio::test]
async fn refresh_only_touches_stale_products() {
    let h = harness().await;
    registered(&h).await;
    h.catalog
        .answer("iphone", vec![item("B0APPLE", "iPhone 14 Pro 128GB", Some("Apple"), 800.0)]);
    let cancel = CancellationToken::new();

    let first = h.context.matcher.refresh_stale_matches(7, 10, &cancel).await.unwrap();
    assert_eq!((first.examined, first.refreshed, first.errors, first.matches), (1, 1, 0, 1));

    let second = h.context.matcher.refresh_stale_matches(7, 10, &cancel).await.unwrap();
    assert_eq!(second.examined, 0);
}

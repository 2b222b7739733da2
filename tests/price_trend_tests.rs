//! Change detection, trend analysis and the price report over stored history

mod common;

use common::{harness, mercari_page};
use resale_scout_lib::application::{Prediction, ScrapeOptions};
use resale_scout_lib::domain::{HistorySource, PriceDirection};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const ITEM_URL: &str = "https://jp.mercari.com/item/m31415926535";

async fn registered(h: &common::Harness, price: i64) -> i64 {
    h.pages.serve(ITEM_URL, mercari_page("SONY α7 III ボディ ILCE-7M3", price, false));
    h.context
        .scraper
        .scrape_product(ITEM_URL, ScrapeOptions::default(), &CancellationToken::new())
        .await
        .product_id
        .unwrap()
}

#[tokio::test]
async fn small_change_is_classified_but_not_recorded() {
    let h = harness().await;
    let product_id = registered(&h, 10_000).await;

    let analysis = h
        .context
        .analyzer
        .detect_price_change(product_id, 10_000, 10_300, None)
        .await
        .unwrap();

    assert!(!analysis.change.is_significant);
    assert!(analysis.history.is_none());
    assert_eq!(h.context.products.history(product_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn major_rise_records_history_alert_and_context() {
    let h = harness().await;
    let product_id = registered(&h, 10_000).await;

    let analysis = h
        .context
        .analyzer
        .detect_price_change(product_id, 10_000, 13_000, Some(json!({ "reason": "restock" })))
        .await
        .unwrap();

    assert!(analysis.change.is_major);
    assert_eq!(analysis.change.change_amount, 3_000);
    let history = analysis.history.unwrap();
    assert_eq!(history.source, HistorySource::Analyzer);
    let metadata = history.metadata.unwrap();
    assert_eq!(metadata["context"]["reason"], "restock");
    assert!(metadata["trend"]["direction"].is_string());

    assert_eq!(analysis.alert.map(|a| a.direction), Some(PriceDirection::Rise));
    assert_eq!(h.alerts.alerts().len(), 1);
    assert_eq!(h.context.products.alerts(product_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn trend_and_prediction_read_history() {
    let h = harness().await;
    let product_id = registered(&h, 10_000).await;
    h.context
        .analyzer
        .detect_price_change(product_id, 10_000, 13_000, None)
        .await
        .unwrap();

    let trend = h.context.analyzer.analyze_trend(product_id, 13_000).await.unwrap();
    assert_eq!(trend.sample_count, 2);
    assert_eq!((trend.min_price, trend.max_price), (10_000, 13_000));
    assert!((trend.average_price - 11_500.0).abs() < 1e-9);

    let prediction = h.context.analyzer.predict_trend(product_id, 7).await.unwrap();
    assert!(matches!(
        prediction,
        Prediction::InsufficientData {
            sample_count: 2,
            required: 5,
            ..
        }
    ));
}

#[tokio::test]
async fn price_report_covers_active_products() {
    let h = harness().await;
    let product_id = registered(&h, 10_000).await;

    let report = h.context.reporter.generate_price_report(None, 30).await.unwrap();

    assert_eq!(report.period_days, 30);
    assert_eq!(report.summary.total_products, 1);
    assert_eq!(report.report_data[0].product_id, product_id);
    assert_eq!(report.report_data[0].current_price, 10_000);

    let empty = h.context.reporter.generate_price_report(Some(&[]), 30).await.unwrap();
    assert_eq!(empty.summary.total_products, 0);
    assert!(empty.summary.most_volatile.is_none());
}

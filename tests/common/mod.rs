//! Shared fakes and fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use resale_scout_lib::application::ScoutContext;
use resale_scout_lib::domain::CatalogItem;
use resale_scout_lib::infrastructure::config::AppConfig;
use resale_scout_lib::infrastructure::{
    CatalogError, CatalogSearch, DatabaseConnection, FetchError, FetchFailure, FetchedPage, PageSource,
    RecordingAlertSink, RecordingDelay,
};

/// Page source whose pages can be swapped between runs.
/// Unknown URLs fail with a network error.
#[derive(Default)]
pub struct SwitchablePages {
    pages: Mutex<HashMap<String, Result<String, u16>>>,
}

impl SwitchablePages {
    pub fn serve(&self, url: &str, body: String) {
        self.pages.lock().unwrap().insert(url.to_string(), Ok(body));
    }

    pub fn fail_with_status(&self, url: &str, status: u16) {
        self.pages.lock().unwrap().insert(url.to_string(), Err(status));
    }

    pub fn remove(&self, url: &str) {
        self.pages.lock().unwrap().remove(url);
    }
}

#[async_trait]
impl PageSource for SwitchablePages {
    async fn fetch(&self, url: &str, _cancel: &CancellationToken) -> Result<FetchedPage, FetchFailure> {
        let page = self.pages.lock().unwrap().get(url).cloned();
        match page {
            Some(Ok(body)) => Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                body,
                attempts: 1,
            }),
            Some(Err(status)) => Err(FetchFailure {
                error: FetchError::HttpStatus {
                    url: url.to_string(),
                    status,
                },
                attempts: 1,
            }),
            None => Err(FetchFailure {
                error: FetchError::Network {
                    url: url.to_string(),
                    message: "connection reset".into(),
                },
                attempts: 6,
            }),
        }
    }
}

/// Catalog that answers from a query table and records what it was asked
#[derive(Default)]
pub struct ScriptedCatalog {
    answers: Mutex<HashMap<String, Vec<CatalogItem>>>,
    failing: Mutex<bool>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedCatalog {
    pub fn answer(&self, query: &str, items: Vec<CatalogItem>) {
        self.answers.lock().unwrap().insert(query.to_string(), items);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogSearch for ScriptedCatalog {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        self.queries.lock().unwrap().push(query.to_string());
        if *self.failing.lock().unwrap() {
            return Err(CatalogError::Status(503));
        }
        let mut items = self.answers.lock().unwrap().get(query).cloned().unwrap_or_default();
        items.truncate(limit);
        Ok(items)
    }
}

pub struct Harness {
    pub context: ScoutContext,
    pub pages: Arc<SwitchablePages>,
    pub catalog: Arc<ScriptedCatalog>,
    pub alerts: Arc<RecordingAlertSink>,
    pub delay: Arc<RecordingDelay>,
}

pub async fn harness() -> Harness {
    harness_with(AppConfig::default()).await
}

pub async fn harness_with(config: AppConfig) -> Harness {
    let database = DatabaseConnection::in_memory().await.unwrap();
    let pages = Arc::new(SwitchablePages::default());
    let catalog = Arc::new(ScriptedCatalog::default());
    let alerts = Arc::new(RecordingAlertSink::default());
    let delay = Arc::new(RecordingDelay::new());

    let context = ScoutContext::assemble(
        config,
        database,
        pages.clone(),
        catalog.clone(),
        alerts.clone(),
        delay.clone(),
        None,
    );

    Harness {
        context,
        pages,
        catalog,
        alerts,
        delay,
    }
}

/// Mercari item page; `sold` adds the sold-out sticker
pub fn mercari_page(title: &str, price: i64, sold: bool) -> String {
    let sticker = if sold {
        r#"<div data-testid="thumbnail-sticker">SOLD</div>"#
    } else {
        ""
    };
    format!(
        r#"<html><head><title>{title} - メルカリ</title></head><body>
             <div data-testid="name"><h1>{title}</h1></div>
             <div data-testid="price">¥{price}</div>
             <div data-testid="商品の状態">目立った傷や汚れなし</div>
             <div data-testid="description">動作確認済みです。</div>
             {sticker}
           </body></html>"#
    )
}

/// Plain shop page read through the generic fallbacks, padded past the
/// fetch client's minimum body size
pub fn generic_page(title: &str, price: i64) -> String {
    let padding = "良好な状態です。".repeat(80);
    format!(
        r#"<html><head><title>{title} | Example Shop</title></head><body>
             <h1>{title}</h1>
             <span class="item-price">¥{price}</span>
             <p class="description">{padding}</p>
           </body></html>"#
    )
}

//! Target catalog search
//!
//! The matcher only sees `CatalogSearch`; the HTTP implementation talks to a JSON
//! search endpoint returning either `{"items": [...]}` or a bare array.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::CatalogItem;
use crate::infrastructure::config::CatalogConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(String),

    #[error("catalog returned HTTP {0}")]
    Status(u16),

    #[error("catalog response could not be decoded: {0}")]
    Decode(String),

    #[error("catalog search cancelled")]
    Cancelled,
}

#[async_trait]
pub trait CatalogSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, CatalogError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { items: Vec<CatalogItem> },
    Bare(Vec<CatalogItem>),
}

pub struct HttpCatalogClient {
    client: Client,
    config: CatalogConfig,
}

impl HttpCatalogClient {
    pub fn new(config: CatalogConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create catalog client: {e}"))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CatalogSearch for HttpCatalogClient {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let limit_param = limit.to_string();
        let mut request = self
            .client
            .get(&self.config.search_endpoint)
            .query(&[("q", query), ("limit", limit_param.as_str())]);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::select! {
            result = request.send() => result.map_err(|e| CatalogError::Request(e.to_string()))?,
            () = cancel.cancelled() => return Err(CatalogError::Cancelled),
        };

        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status().as_u16()));
        }

        let body = tokio::select! {
            result = response.text() => result.map_err(|e| CatalogError::Request(e.to_string()))?,
            () = cancel.cancelled() => return Err(CatalogError::Cancelled),
        };

        let items = match serde_json::from_str::<SearchResponse>(&body) {
            Ok(SearchResponse::Wrapped { items } | SearchResponse::Bare(items)) => items,
            Err(e) => return Err(CatalogError::Decode(e.to_string())),
        };

        debug!(query, results = items.len(), "Catalog search finished");
        Ok(items.into_iter().take(limit).collect())
    }
}

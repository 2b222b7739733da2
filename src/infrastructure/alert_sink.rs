//! Notification collaborator for major price moves

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::domain::{PriceAlert, Product};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("alert delivery failed: {0}")]
pub struct AlertError(pub String);

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, product: &Product, alert: &PriceAlert) -> Result<(), AlertError>;
}

/// Writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, product: &Product, alert: &PriceAlert) -> Result<(), AlertError> {
        warn!(
            product_id = product.id,
            title = %product.title,
            old_price = alert.old_price,
            new_price = alert.new_price,
            change_percent = %format!("{:.1}%", alert.change_percent * 100.0),
            direction = alert.direction.as_str(),
            "🚨 Major price change"
        );
        Ok(())
    }
}

/// POSTs alerts as JSON
pub struct WebhookAlertSink {
    client: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create webhook client: {e}"))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, product: &Product, alert: &PriceAlert) -> Result<(), AlertError> {
        let payload = json!({
            "productId": product.id,
            "title": product.title,
            "sourceUrl": product.source_url,
            "platform": product.platform,
            "alert": alert,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AlertError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AlertError(format!("webhook returned HTTP {}", response.status())))
        }
    }
}

/// Keeps alerts in memory
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<PriceAlert>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<PriceAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, _product: &Product, alert: &PriceAlert) -> Result<(), AlertError> {
        self.alerts
            .lock()
            .map_err(|_| AlertError("recording sink poisoned".to_string()))?
            .push(alert.clone());
        Ok(())
    }
}

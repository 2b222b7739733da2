//! Price change classification, trend analysis and forecasting
//!
//! Changes are measured relative to the old price. A significant change is
//! worth a history row; a major one also raises an alert that is persisted
//! with the row and handed to the `AlertSink`.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::statistics::{LinearFit, linear_regression, mean, sample_std_dev};
use crate::domain::{
    ChangeType, HistorySource, NewHistoryEntry, PriceAlert, PriceDirection, PriceSample, Product, StockHistory,
};
use crate::infrastructure::alert_sink::AlertSink;
use crate::infrastructure::config::{TrendConfig, defaults};
use crate::infrastructure::pipeline_error::PersistenceResult;
use crate::infrastructure::product_repository::ProductRepository;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Pure classification of one price move
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub old_price: i64,
    pub new_price: i64,
    pub change_amount: i64,
    /// Fraction of the old price, e.g. -0.333 for 150 -> 100
    pub change_percent: f64,
    pub is_significant: bool,
    pub is_major: bool,
}

impl PriceChange {
    pub fn direction(&self) -> Option<PriceDirection> {
        match self.change_amount.signum() {
            -1 => Some(PriceDirection::Drop),
            1 => Some(PriceDirection::Rise),
            _ => None,
        }
    }

    /// Alert record for a major move
    pub fn alert_for(&self, product_id: i64) -> Option<PriceAlert> {
        if !self.is_major {
            return None;
        }
        Some(PriceAlert {
            product_id,
            old_price: self.old_price,
            new_price: self.new_price,
            change_percent: self.change_percent,
            direction: self.direction()?,
            created_at: Utc::now(),
        })
    }
}

/// Result of `detect_price_change`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnalysis {
    pub product_id: i64,
    #[serde(flatten)]
    pub change: PriceChange,
    pub history: Option<StockHistory>,
    pub alert: Option<PriceAlert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

impl TrendDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub product_id: i64,
    pub current_price: i64,
    pub lookback_days: i64,
    pub sample_count: usize,
    pub direction: TrendDirection,
    /// Yen per day from the least-squares fit
    pub slope_per_day: f64,
    /// Sample standard deviation over mean
    pub volatility: f64,
    pub average_price: f64,
    pub current_to_average: f64,
    pub min_price: i64,
    pub max_price: i64,
}

impl TrendAnalysis {
    /// Compact form stored in history metadata
    pub fn snapshot(&self) -> Value {
        json!({
            "direction": self.direction.as_str(),
            "slopePerDay": self.slope_per_day,
            "volatility": self.volatility,
            "averagePrice": self.average_price,
            "sampleCount": self.sample_count,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Prediction {
    InsufficientData {
        product_id: i64,
        sample_count: usize,
        required: usize,
    },
    Forecast {
        product_id: i64,
        horizon_days: i64,
        predicted_price: i64,
        r_squared: f64,
        margin_of_error: f64,
        confidence: f64,
        sample_count: usize,
    },
}

pub struct PriceTrendAnalyzer {
    products: ProductRepository,
    alerts: Arc<dyn AlertSink>,
    config: TrendConfig,
}

impl PriceTrendAnalyzer {
    pub fn new(products: ProductRepository, alerts: Arc<dyn AlertSink>, config: TrendConfig) -> Self {
        Self {
            products,
            alerts,
            config,
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Classify a move from `old_price` to `new_price`
    pub fn classify(&self, old_price: i64, new_price: i64) -> PriceChange {
        let change_amount = new_price - old_price;
        let change_percent = match (old_price, new_price) {
            (0, 0) => 0.0,
            (0, _) => 1.0,
            _ => change_amount as f64 / old_price as f64,
        };
        let magnitude = change_percent.abs();

        PriceChange {
            old_price,
            new_price,
            change_amount,
            change_percent,
            is_significant: magnitude >= self.config.significant_threshold,
            is_major: magnitude >= self.config.major_threshold,
        }
    }

    /// Classify a move and record it: significant writes a history row, major
    /// also persists an alert and notifies the sink
    pub async fn detect_price_change(
        &self,
        product_id: i64,
        old_price: i64,
        new_price: i64,
        metadata: Option<Value>,
    ) -> PersistenceResult<ChangeAnalysis> {
        let change = self.classify(old_price, new_price);
        if !change.is_significant {
            debug!(product_id, old_price, new_price, "Price change below threshold");
            return Ok(ChangeAnalysis {
                product_id,
                change,
                history: None,
                alert: None,
            });
        }

        let product = self.products.require_product(product_id).await?;
        let trend = self.analyze_trend(product_id, new_price).await?;
        let entry = NewHistoryEntry {
            previous_price: Some(old_price),
            new_price: Some(new_price),
            previous_stock: None,
            new_stock: None,
            change_type: ChangeType::Price,
            source: HistorySource::Analyzer,
            metadata: Some(history_metadata(&trend, metadata)),
        };
        let alert = change.alert_for(product_id);

        let history = {
            let guard = self.products.lock_product(&product.natural_key()).await;
            self.products
                .append_history(&guard, product_id, &entry, alert.as_ref())
                .await?
        };

        if let Some(alert) = &alert {
            self.notify(&product, alert).await;
        }

        Ok(ChangeAnalysis {
            product_id,
            change,
            history: Some(history),
            alert,
        })
    }

    /// Hand a persisted alert to the sink; delivery failures are logged only
    pub async fn notify(&self, product: &Product, alert: &PriceAlert) {
        info!(
            product_id = product.id,
            old_price = alert.old_price,
            new_price = alert.new_price,
            direction = alert.direction.as_str(),
            "Major price change"
        );
        if let Err(e) = self.alerts.notify(product, alert).await {
            warn!(product_id = product.id, error = %e, "Alert delivery failed");
        }
    }

    pub async fn analyze_trend(&self, product_id: i64, current_price: i64) -> PersistenceResult<TrendAnalysis> {
        self.analyze_trend_over(product_id, current_price, self.config.lookback_days)
            .await
    }

    /// Trend over an explicit window, clamped to the supported lookback
    pub async fn analyze_trend_over(
        &self,
        product_id: i64,
        current_price: i64,
        lookback_days: i64,
    ) -> PersistenceResult<TrendAnalysis> {
        let lookback_days = lookback_days.clamp(1, defaults::MAX_LOOKBACK_DAYS);
        let since = Utc::now() - Duration::days(lookback_days);
        let samples = self.products.price_samples(product_id, since).await?;
        Ok(self.trend_from_samples(product_id, current_price, lookback_days, &samples))
    }

    pub fn trend_from_samples(
        &self,
        product_id: i64,
        current_price: i64,
        lookback_days: i64,
        samples: &[PriceSample],
    ) -> TrendAnalysis {
        let prices: Vec<f64> = samples.iter().map(|s| s.price as f64).collect();
        let average_price = mean(&prices).unwrap_or(current_price as f64);
        let volatility = if average_price > 0.0 {
            sample_std_dev(&prices) / average_price
        } else {
            0.0
        };

        let slope_per_day = fit(samples).map_or(0.0, |fit| fit.slope);
        let direction = if average_price <= 0.0 || (slope_per_day.abs() / average_price) < self.config.stable_dead_zone {
            TrendDirection::Stable
        } else if slope_per_day > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Falling
        };

        TrendAnalysis {
            product_id,
            current_price,
            lookback_days,
            sample_count: samples.len(),
            direction,
            slope_per_day,
            volatility,
            average_price,
            current_to_average: if average_price > 0.0 {
                current_price as f64 / average_price
            } else {
                1.0
            },
            min_price: samples.iter().map(|s| s.price).min().unwrap_or(current_price),
            max_price: samples.iter().map(|s| s.price).max().unwrap_or(current_price),
        }
    }

    pub async fn predict_trend(&self, product_id: i64, horizon_days: i64) -> PersistenceResult<Prediction> {
        let since = Utc::now() - Duration::days(self.config.lookback_days.clamp(1, defaults::MAX_LOOKBACK_DAYS));
        let samples = self.products.price_samples(product_id, since).await?;
        Ok(self.prediction_from_samples(product_id, horizon_days, &samples))
    }

    pub fn prediction_from_samples(&self, product_id: i64, horizon_days: i64, samples: &[PriceSample]) -> Prediction {
        let required = self.config.min_prediction_samples;
        let insufficient = Prediction::InsufficientData {
            product_id,
            sample_count: samples.len(),
            required,
        };
        if samples.len() < required {
            return insufficient;
        }
        let Some(line) = fit(samples) else {
            return insufficient;
        };
        let Some(first) = samples.first() else {
            return insufficient;
        };

        let prices: Vec<f64> = samples.iter().map(|s| s.price as f64).collect();
        let average = mean(&prices).unwrap_or_default();
        let volatility = if average > 0.0 { sample_std_dev(&prices) / average } else { 0.0 };

        let now_x = (Utc::now() - first.detected_at).num_milliseconds() as f64 / MS_PER_DAY;
        let predicted = line.predict(now_x + horizon_days as f64).max(0.0);

        let data_factor = (samples.len() as f64 / self.config.saturation_samples.max(1) as f64).min(1.0);
        let confidence = (line.r_squared * data_factor * (1.0 - volatility).max(0.1)).clamp(0.0, 1.0);

        Prediction::Forecast {
            product_id,
            horizon_days,
            predicted_price: predicted.round() as i64,
            r_squared: line.r_squared,
            margin_of_error: (1.0 - line.r_squared).max(0.05),
            confidence,
            sample_count: samples.len(),
        }
    }
}

/// Fit price against days since the first sample
fn fit(samples: &[PriceSample]) -> Option<LinearFit> {
    let first = samples.first()?.detected_at;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| ((s.detected_at - first).num_milliseconds() as f64 / MS_PER_DAY, s.price as f64))
        .collect();
    linear_regression(&points)
}

fn history_metadata(trend: &TrendAnalysis, caller: Option<Value>) -> Value {
    let mut metadata = json!({ "trend": trend.snapshot() });
    if let (Some(caller), Some(object)) = (caller, metadata.as_object_mut()) {
        object.insert("context".to_string(), caller);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::alert_sink::RecordingAlertSink;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use chrono::DateTime;
    use rstest::rstest;

    async fn analyzer() -> PriceTrendAnalyzer {
        let db = DatabaseConnection::in_memory().await.unwrap();
        PriceTrendAnalyzer::new(
            ProductRepository::new(db.pool().clone()),
            Arc::new(RecordingAlertSink::default()),
            TrendConfig::default(),
        )
    }

    fn series(prices: &[i64]) -> Vec<PriceSample> {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(day, price)| PriceSample {
                price: *price,
                detected_at: start + Duration::days(day as i64),
            })
            .collect()
    }

    #[rstest]
    #[case(150, 100, true, true)]
    #[case(150, 145, false, false)]
    #[case(100, 105, true, false)]
    #[case(100, 120, true, true)]
    #[case(0, 0, false, false)]
    #[case(0, 500, true, true)]
    #[tokio::test]
    async fn classifies_moves(#[case] old: i64, #[case] new: i64, #[case] significant: bool, #[case] major: bool) {
        let change = analyzer().await.classify(old, new);
        assert_eq!(change.is_significant, significant);
        assert_eq!(change.is_major, major);
    }

    #[tokio::test]
    async fn rising_series_is_rising() {
        let analyzer = analyzer().await;
        let trend = analyzer.trend_from_samples(1, 1_400, 30, &series(&[1_000, 1_100, 1_200, 1_300, 1_400]));

        assert_eq!(trend.direction, TrendDirection::Rising);
        assert!((trend.slope_per_day - 100.0).abs() < 1e-6);
        assert_eq!(trend.min_price, 1_000);
        assert_eq!(trend.max_price, 1_400);
        assert!((trend.average_price - 1_200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tiny_slope_is_stable() {
        let analyzer = analyzer().await;
        let trend = analyzer.trend_from_samples(1, 10_001, 30, &series(&[10_000, 10_001, 10_000, 10_002]));
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[tokio::test]
    async fn empty_history_uses_current_price() {
        let analyzer = analyzer().await;
        let trend = analyzer.trend_from_samples(1, 5_000, 30, &[]);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.average_price, 5_000.0);
        assert_eq!(trend.volatility, 0.0);
        assert_eq!(trend.current_to_average, 1.0);
    }

    #[tokio::test]
    async fn prediction_needs_five_samples() {
        let analyzer = analyzer().await;
        let prediction = analyzer.prediction_from_samples(1, 7, &series(&[100, 110, 120, 130]));
        assert!(matches!(
            prediction,
            Prediction::InsufficientData {
                sample_count: 4,
                required: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn perfect_line_forecast() {
        let analyzer = analyzer().await;
        let prediction = analyzer.prediction_from_samples(1, 7, &series(&[1_000, 1_010, 1_020, 1_030, 1_040, 1_050]));

        match prediction {
            Prediction::Forecast {
                r_squared,
                margin_of_error,
                confidence,
                sample_count,
                predicted_price,
                ..
            } => {
                assert!((r_squared - 1.0).abs() < 1e-9);
                assert!((margin_of_error - 0.05).abs() < 1e-9);
                assert_eq!(sample_count, 6);
                // 6 of 30 samples caps the data factor at 0.2
                assert!(confidence > 0.18 && confidence <= 0.2);
                assert!(predicted_price > 1_050);
            }
            other => panic!("expected forecast, got {other:?}"),
        }
    }
}

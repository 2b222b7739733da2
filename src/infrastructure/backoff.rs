//! Retry backoff and the delay seam
//!
//! Waiting goes through `Delay` so retry loops can be driven without real time.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::FetchConfig;

/// Cancellable sleep
#[async_trait]
pub trait Delay: Send + Sync {
    /// Wait for `duration`. Returns `false` if `cancel` fired first.
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

/// Real time, via the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if duration.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

/// Returns immediately and remembers every requested duration
#[derive(Debug, Default)]
pub struct RecordingDelay {
    recorded: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.recorded
            .lock()
            .map(|recorded| recorded.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(duration);
        }
        !cancel.is_cancelled()
    }
}

/// Linear backoff with random jitter: retry `n` waits `base * n + U(0, jitter)`, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay before retry `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(fastrand::u64(0..=jitter_ms));
        (self.base.saturating_mul(retry.max(1)) + jitter).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_linearly_within_jitter() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
        };

        for retry in 1..=5 {
            let delay = policy.delay_for(retry);
            let floor = Duration::from_millis(1000 * u64::from(retry));
            assert!(delay >= floor && delay <= floor + Duration::from_millis(500), "retry {retry}: {delay:?}");
        }
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(10),
            max: Duration::from_secs(15),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(5), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn cancelled_sleep_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!TokioDelay.sleep(Duration::from_secs(60), &cancel).await);
    }

    #[tokio::test]
    async fn recording_delay_keeps_requested_durations() {
        let delay = RecordingDelay::new();
        let cancel = CancellationToken::new();
        assert!(delay.sleep(Duration::from_millis(5), &cancel).await);
        assert!(delay.sleep(Duration::from_millis(7), &cancel).await);
        assert_eq!(delay.recorded(), vec![Duration::from_millis(5), Duration::from_millis(7)]);
    }
}

//! Collection stage: the platform client as an injected capability, wrapped in
//! an explicit retry policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, WarehouseError};
use crate::ingest::write_batch;
use crate::models::RawMessageRecord;

/// Typed failure of one fetch call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectError {
    /// Server asked us to wait before retrying
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-indicated wait
        retry_after: Duration,
    },
    /// Network drop or similar; safe to retry
    #[error("transient failure: {0}")]
    Transient(String),
    /// Not retryable (bad channel, auth failure, ...)
    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// Source of channel messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collector: Send + Sync {
    /// Fetch up to `limit` recent messages of one channel
    async fn fetch_channel(&self, channel: &str, limit: usize)
        -> std::result::Result<Vec<RawMessageRecord>, CollectError>;
}

/// Retry behaviour around a single channel fetch
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed; `None` retries without bound
    pub max_attempts: Option<u32>,
    /// First transient backoff
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Random spread applied to transient backoff, within [0, 1]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(900),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt + 1` after a transient failure.
    ///
    /// `base * 2^attempt`, capped at `max_delay`, then spread by
    /// `1 ± jitter_factor`.
    #[must_use]
    pub fn transient_backoff(&self, attempt: u32) -> Duration {
        let exp = 2_f64.powi(attempt.min(30) as i32);
        let capped = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let factor = if self.jitter_factor > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor)
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    /// Wait to apply after `err`, or `None` when the error is not retryable
    #[must_use]
    pub fn wait_for(&self, err: &CollectError, attempt: u32) -> Option<Duration> {
        match err {
            CollectError::RateLimited { retry_after } => Some(*retry_after),
            CollectError::Transient(_) => Some(self.transient_backoff(attempt)),
            CollectError::Fatal(_) => None,
        }
    }
}

/// Fetch one channel, retrying the same call per `policy`
pub async fn fetch_with_retry<C: Collector + ?Sized>(
    collector: &C,
    channel: &str,
    limit: usize,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<RawMessageRecord>> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(WarehouseError::Cancelled("collect"));
        }

        let err = match collector.fetch_channel(channel, limit).await {
            Ok(records) => return Ok(records),
            Err(err) => err,
        };

        let Some(wait) = policy.wait_for(&err, attempt) else {
            return Err(WarehouseError::Collector {
                channel: channel.to_string(),
                reason: err.to_string(),
            });
        };

        attempt = attempt.saturating_add(1);
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(WarehouseError::RetriesExhausted {
                channel: channel.to_string(),
                attempts: attempt,
                last_wait: wait,
            });
        }

        warn!(channel, attempt, wait_ms = wait.as_millis() as u64, error = %err, "Fetch failed, retrying");
        tokio::select! {
            () = cancel.cancelled() => return Err(WarehouseError::Cancelled("collect")),
            () = tokio::time::sleep(wait) => {}
        }
    }
}

/// Outcome of one collection run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectReport {
    /// Batch files written, one per successful channel
    pub batch_files: Vec<PathBuf>,
    /// Records fetched across channels
    pub messages: usize,
    /// Channels that failed, with the reason
    pub failed_channels: Vec<(String, String)>,
}

/// Fetch every channel and persist each as a batch file.
///
/// A failing channel is reported and does not stop the others; cancellation
/// stops the run.
pub async fn collect_channels<C: Collector + ?Sized>(
    collector: &C,
    channels: &[String],
    limit: usize,
    policy: &RetryPolicy,
    raw_dir: &Path,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> Result<CollectReport> {
    let mut report = CollectReport::default();

    for channel in channels {
        match fetch_with_retry(collector, channel, limit, policy, cancel).await {
            Ok(records) => {
                let path = write_batch(raw_dir, date, channel, &records)?;
                info!(channel, messages = records.len(), "Channel collected");
                report.messages += records.len();
                report.batch_files.push(path);
            }
            Err(WarehouseError::Cancelled(stage)) => return Err(WarehouseError::Cancelled(stage)),
            Err(e) => {
                error!(channel, error = %e, "Channel collection failed");
                report.failed_channels.push((channel.clone(), e.to_string()));
            }
        }
    }

    Ok(report)
}

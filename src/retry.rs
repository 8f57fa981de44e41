//! Exponential backoff with jitter, cancellation and an injectable sleep.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CaError, Result};

/// Backoff schedule for transient custodian faults.
///
/// Retry `n` (zero based) waits `base_delay_ms * 2^n`, capped at
/// `max_delay_ms`, plus a random jitter in `[0, max_jitter_ms)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            base_delay_ms: 1000,
            max_delay_ms: 120_000,
            max_jitter_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry `retry`, without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Backoff before retry `retry`, with jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.max_jitter_ms)
        };
        self.backoff(retry) + Duration::from_millis(jitter)
    }
}

/// Bounded polling of a long-running custodian operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_polls: 150,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Source of delays for backoff and polling.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested delay.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// Runs `future` unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CaError::Cancelled),
        result = future => result,
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
pub async fn sleep_cancellable(
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<()> {
    cancellable(cancel, async {
        sleeper.sleep(duration).await;
        Ok(())
    })
    .await
}

/// Calls `op` until it succeeds, fails permanently or the retry budget is spent.
///
/// Only [`CaError::is_transient`] errors are retried; the last error is
/// returned once `policy.max_retries` retries have failed. Cancellation aborts
/// the current attempt or backoff and is returned as [`CaError::Cancelled`]
/// without being counted as a failed attempt.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        let err = match cancellable(cancel, op()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err {
            CaError::Cancelled => {
                debug!(operation, retries, "cancelled");
                return Err(err);
            }
            err if err.is_transient() && retries < policy.max_retries => {
                let delay = policy.delay_for(retries);
                retries += 1;
                warn!(
                    operation,
                    attempt = retries,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                if let Err(err) = sleep_cancellable(sleeper, cancel, delay).await {
                    debug!(operation, retries, "cancelled during backoff");
                    return Err(err);
                }
            }
            err => {
                if err.is_transient() {
                    warn!(
                        operation,
                        attempts = retries + 1,
                        error = %err,
                        "retry budget exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

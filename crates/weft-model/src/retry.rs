// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Retry wrapper for provider calls (§4.D retry policy).
//!
//! Transient errors (network failures, 5xx, 429) are retried with backoff;
//! fatal errors (auth, invalid request, content-filter refusal) propagate
//! immediately.

use std::time::Duration;

use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use thiserror::Error;
use weft_config::{BackoffStrategy, RetryConfig};

/// Classification of a provider-adapter failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network error, 5xx, or 429 — worth retrying.
    #[error("transient provider error: {0}")]
    Transient(#[source] anyhow::Error),
    /// Auth failure, invalid request, or content-filter refusal — never
    /// retried.
    #[error("fatal provider error: {0}")]
    Fatal(#[source] anyhow::Error),
}

fn build_backoff(cfg: &RetryConfig) -> ExponentialBackoff<SystemClock> {
    let multiplier = match cfg.strategy {
        BackoffStrategy::Fixed => 1.0,
        BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => 2.0,
    };
    ExponentialBackoff {
        current_interval: Duration::from_millis(cfg.initial_delay_ms),
        initial_interval: Duration::from_millis(cfg.initial_delay_ms),
        multiplier,
        max_interval: Duration::from_millis(cfg.max_delay_ms),
        max_elapsed_time: None,
        randomization_factor: if cfg.strategy == BackoffStrategy::ExponentialWithJitter {
            0.5
        } else {
            0.0
        },
        clock: SystemClock::default(),
        ..ExponentialBackoff::default()
    }
}

/// Run `op` under the configured retry policy, attempting at most
/// `cfg.attempts` times. Retries only on [`ProviderError::Transient`];
/// [`ProviderError::Fatal`] propagates immediately.
pub async fn retry_send<T, F, Fut>(cfg: &RetryConfig, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut backoff = build_backoff(cfg);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(ProviderError::Fatal(e)) => return Err(e),
            Err(ProviderError::Transient(e)) => {
                if attempt >= cfg.attempts {
                    return Err(e);
                }
                let Some(delay) = backoff.next_backoff() else {
                    return Err(e);
                };
                tracing::warn!(attempt, ?delay, error = %e, "retrying transient provider error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of batches to the remote collector.
//!
//! [`Deliver`] is the seam between the worker and the network. [`HttpDelivery`] POSTs each batch
//! as a JSON array; any non-2xx answer or transport error counts as a failed attempt.
//! [`send_with_retry`] runs one batch through the configured [`RetryStrategy`].

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::batch::Batch;
use crate::config::WorkerConfig;
use crate::errors::{Creation, DeliveryError};

/// How failed attempts are repeated. The counter is the number of retries after the first
/// attempt, so a batch sees at most `retries + 1` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Immediate(u32),
    /// Retries with a pause of `n * delay_ms` before the n-th retry.
    LinearBackoff(u32, u64),
}

impl RetryStrategy {
    #[must_use]
    pub fn retries(&self) -> u32 {
        match self {
            RetryStrategy::Immediate(retries) | RetryStrategy::LinearBackoff(retries, _) => {
                *retries
            }
        }
    }

    fn pause_before_retry(&self, retry: u32) -> Option<Duration> {
        match self {
            RetryStrategy::Immediate(_) => None,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Some(Duration::from_millis(delay_ms.saturating_mul(u64::from(retry))))
            }
        }
    }
}

#[async_trait]
pub trait Deliver: Send + Sync {
    /// Sends one batch. Called once per attempt.
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct HttpDelivery {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDelivery {
    pub fn new(config: &WorkerConfig) -> Result<Self, Creation> {
        let client = build_client(config.https_proxy.as_deref(), config.timeout)?;
        Ok(HttpDelivery {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Deliver for HttpDelivery {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let body = batch.to_json()?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status))
        }
    }
}

pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

/// Result of pushing one batch through the retry loop.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub attempts: u32,
    /// Last error when every attempt failed.
    pub result: Result<(), DeliveryError>,
}

pub async fn send_with_retry(
    deliverer: &dyn Deliver,
    batch: &Batch,
    strategy: RetryStrategy,
) -> DeliveryOutcome {
    let mut attempts = 0;

    loop {
        let time = Instant::now();
        attempts += 1;
        let result = deliverer.deliver(batch).await;
        let elapsed = time.elapsed();

        match result {
            Ok(()) => {
                debug!(
                    "INSIGHTS | Delivered batch of {} in {} ms ({} attempts)",
                    batch.len(),
                    elapsed.as_millis(),
                    attempts
                );
                return DeliveryOutcome {
                    attempts,
                    result: Ok(()),
                };
            }
            Err(e) => {
                if attempts > strategy.retries() {
                    return DeliveryOutcome {
                        attempts,
                        result: Err(e),
                    };
                }
                debug!(
                    "INSIGHTS | Delivery attempt {} failed after {} ms: {}",
                    attempts,
                    elapsed.as_millis(),
                    e
                );
                if let Some(pause) = strategy.pause_before_retry(attempts) {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

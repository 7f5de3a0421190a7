// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::RetryStrategy;
use crate::errors::Creation;

pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_PARALLELISM: usize = 1;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for one batching worker. Fixed for the lifetime of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Collector URL. Empty disables the whole pipeline.
    pub endpoint: String,
    /// Records per batch; a batch is flushed as soon as it reaches this size.
    pub batch_size: usize,
    /// Maximum number of deliveries in flight at once.
    pub parallelism: usize,
    /// Additional attempts after the first failed delivery of a batch.
    pub retries: u32,
    /// Maximum time a partial batch may accumulate. `None` means size-only batching.
    pub window_time: Option<Duration>,
    /// Bound of the submission queue.
    pub queue_capacity: usize,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    /// Base pause of the linear backoff: the n-th retry waits n times this. `None` retries
    /// immediately.
    pub retry_backoff: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            endpoint: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            retries: DEFAULT_RETRIES,
            window_time: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout: DEFAULT_TIMEOUT,
            https_proxy: None,
            retry_backoff: None,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        WorkerConfig {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.endpoint.is_empty()
    }

    pub fn validate(&self) -> Result<(), Creation> {
        if self.batch_size == 0 {
            return Err(Creation::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(Creation::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Creation::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self.retry_backoff {
            Some(delay) => RetryStrategy::LinearBackoff(self.retries, delay_millis(delay)),
            None => RetryStrategy::Immediate(self.retries),
        }
    }
}

fn delay_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Caller execution model the dispatcher has to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Plain threads; `log` parks the calling thread while the queue is full.
    #[default]
    Blocking,
    /// Inside a tokio runtime; `log` never waits.
    Cooperative,
}

impl FromStr for ExecutionMode {
    type Err = Creation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "blocking" | "sync" => Ok(ExecutionMode::Blocking),
            "cooperative" | "async" => Ok(ExecutionMode::Cooperative),
            other => Err(Creation::InvalidConfig(format!(
                "unknown execution mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsightsConfig {
    pub worker: WorkerConfig,
    pub mode: ExecutionMode,
}

impl InsightsConfig {
    /// Reads the `INSIGHTS_*` environment variables. Unset variables fall back to defaults,
    /// set but unparsable ones are an error.
    pub fn from_env() -> Result<InsightsConfig, Creation> {
        let endpoint = env::var("INSIGHTS_WORKER_ENDPOINT").unwrap_or_default();

        let batch_size = parse_env::<usize>("INSIGHTS_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        let parallelism =
            parse_env::<usize>("INSIGHTS_PARALLELISM")?.unwrap_or(DEFAULT_PARALLELISM);
        let retries = parse_env::<u32>("INSIGHTS_RETRIES")?.unwrap_or(DEFAULT_RETRIES);
        let window_time =
            parse_env::<u64>("INSIGHTS_WINDOW_TIME_MS")?.map(Duration::from_millis);
        let queue_capacity =
            parse_env::<usize>("INSIGHTS_QUEUE_CAPACITY")?.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let timeout = parse_env::<u64>("INSIGHTS_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let retry_backoff =
            parse_env::<u64>("INSIGHTS_RETRY_BACKOFF_MS")?.map(Duration::from_millis);
        let mode = parse_env::<ExecutionMode>("INSIGHTS_MODE")?.unwrap_or_default();

        let https_proxy = env::var("INSIGHTS_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();

        let worker = WorkerConfig {
            endpoint,
            batch_size,
            parallelism,
            retries,
            window_time,
            queue_capacity,
            timeout,
            https_proxy,
            retry_backoff,
        };
        worker.validate()?;

        Ok(InsightsConfig { worker, mode })
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>, Creation>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Creation::InvalidConfig(format!("{name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

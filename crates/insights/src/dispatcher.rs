// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! User-facing entry point for emitting insights.
//!
//! [`Dispatch`] is the submission capability; [`InsightsManager`] picks one implementation once,
//! at construction, from the configured endpoint and [`ExecutionMode`]:
//!
//! - [`NullDispatcher`]: no endpoint configured, every call only warns.
//! - [`BlockingDispatcher`]: for plain threads. The worker runs on its own OS thread with a
//!   private runtime and `log` returns once the record is queued. Called from inside a runtime
//!   it only stages the record, in order, instead of parking the thread.
//! - [`CooperativeDispatcher`]: for callers inside a tokio runtime. The worker is spawned on that
//!   runtime and `log` returns without waiting for the queue.
//!
//! None of these ever surface an error to the caller.

use serde_json::Value;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ExecutionMode, InsightsConfig, WorkerConfig};
use crate::delivery::{Deliver, HttpDelivery};
use crate::errors::Creation;
use crate::payload::{InsightRecord, InsightsType, RequestContext};
use crate::queue::BlockingSubmitter;
use crate::worker::{BatchingWorker, WorkerReport};

const WORKER_THREAD_NAME: &str = "insights-worker";

pub trait Dispatch: Send + Sync {
    /// Builds a record from `data` and the request scope and hands it to the worker.
    fn log(&self, data: Value, ctx: &RequestContext, insights_type: InsightsType);

    fn log_request(&self) {
        warn!("INSIGHTS | Attempted to log request but request logging is not supported");
    }

    fn log_response(&self) {
        warn!("INSIGHTS | Attempted to log response but response logging is not supported");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

impl Dispatch for NullDispatcher {
    fn log(&self, _data: Value, _ctx: &RequestContext, _insights_type: InsightsType) {
        warn!("INSIGHTS | Attempted to log insight but no worker endpoint is configured");
    }
}

pub struct BlockingDispatcher {
    submitter: Option<BlockingSubmitter>,
    worker: Option<JoinHandle<WorkerReport>>,
}

impl BlockingDispatcher {
    pub fn start(config: &WorkerConfig, deliverer: Arc<dyn Deliver>) -> Result<Self, Creation> {
        let (tx, worker) = BatchingWorker::new(config, deliverer);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let submitter = tx.into_blocking(runtime.handle());
        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(worker.run()))?;

        debug!("INSIGHTS | Blocking insights worker started");
        Ok(BlockingDispatcher {
            submitter: Some(submitter),
            worker: Some(handle),
        })
    }

    /// Closes the queue and waits for the worker thread to drain it.
    pub fn shutdown(mut self) -> Option<WorkerReport> {
        self.submitter.take();
        let handle = self.worker.take()?;
        match handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("INSIGHTS | Insights worker thread panicked");
                None
            }
        }
    }
}

impl Dispatch for BlockingDispatcher {
    fn log(&self, data: Value, ctx: &RequestContext, insights_type: InsightsType) {
        let record = InsightRecord::new(data, ctx, insights_type);
        if let Some(submitter) = &self.submitter {
            if let Err(e) = submitter.submit(record) {
                error!("INSIGHTS | {}, insight discarded", e);
            }
        }
    }
}

pub struct CooperativeDispatcher {
    staging: Option<mpsc::UnboundedSender<InsightRecord>>,
    worker: Option<TaskHandle<WorkerReport>>,
}

impl CooperativeDispatcher {
    /// Spawns the worker on the current tokio runtime.
    ///
    /// `log` pushes onto an unbounded staging channel drained by a single forwarding task, so the
    /// caller never waits while the forwarder absorbs queue backpressure in submission order.
    pub fn start(config: &WorkerConfig, deliverer: Arc<dyn Deliver>) -> Result<Self, Creation> {
        let runtime = Handle::try_current().map_err(|_| Creation::NoRuntime)?;
        let (tx, worker) = BatchingWorker::new(config, deliverer);
        let (staging, mut staged) = mpsc::unbounded_channel::<InsightRecord>();

        runtime.spawn(async move {
            while let Some(record) = staged.recv().await {
                if let Err(e) = tx.submit(record).await {
                    error!("INSIGHTS | {}, stopping insight forwarding", e);
                    break;
                }
            }
        });
        let worker = runtime.spawn(worker.run());

        debug!("INSIGHTS | Cooperative insights worker started");
        Ok(CooperativeDispatcher {
            staging: Some(staging),
            worker: Some(worker),
        })
    }

    /// Closes the queue and waits for the worker task to drain it.
    pub async fn shutdown(mut self) -> Option<WorkerReport> {
        self.staging.take();
        let handle = self.worker.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("INSIGHTS | Insights worker task failed: {}", e);
                None
            }
        }
    }
}

impl Dispatch for CooperativeDispatcher {
    fn log(&self, data: Value, ctx: &RequestContext, insights_type: InsightsType) {
        let record = InsightRecord::new(data, ctx, insights_type);
        if let Some(staging) = &self.staging {
            if staging.send(record).is_err() {
                error!("INSIGHTS | Insight forwarding stopped, insight discarded");
            }
        }
    }
}

enum Dispatcher {
    Null(NullDispatcher),
    Blocking(BlockingDispatcher),
    Cooperative(CooperativeDispatcher),
}

/// Facade owning the producer side of the pipeline.
///
/// The default manager is disabled: it accepts every call and only warns.
pub struct InsightsManager {
    dispatcher: Dispatcher,
}

impl InsightsManager {
    /// Like [`InsightsManager::try_new`], but any construction error leaves the manager
    /// disabled instead of failing.
    #[must_use]
    pub fn new(config: &InsightsConfig) -> Self {
        match Self::try_new(config) {
            Ok(manager) => manager,
            Err(e) => {
                error!("INSIGHTS | Failed to start insights worker, insights disabled: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn try_new(config: &InsightsConfig) -> Result<Self, Creation> {
        info!(
            "INSIGHTS | Initialising insights manager with endpoint '{}', batch_size {}, parallelism {}, retries {}, window_time {:?}",
            config.worker.endpoint,
            config.worker.batch_size,
            config.worker.parallelism,
            config.worker.retries,
            config.worker.window_time
        );
        if !config.worker.is_enabled() {
            warn!("INSIGHTS | Insights manager not initialised as empty URL provided");
            return Ok(Self::disabled());
        }
        config.worker.validate()?;
        let deliverer = Arc::new(HttpDelivery::new(&config.worker)?);
        Self::with_deliverer(config, deliverer)
    }

    /// Uses `deliverer` in place of the HTTP client.
    pub fn with_deliverer(
        config: &InsightsConfig,
        deliverer: Arc<dyn Deliver>,
    ) -> Result<Self, Creation> {
        if !config.worker.is_enabled() {
            warn!("INSIGHTS | Insights manager not initialised as empty URL provided");
            return Ok(Self::disabled());
        }
        config.worker.validate()?;

        let dispatcher = match config.mode {
            ExecutionMode::Blocking => {
                Dispatcher::Blocking(BlockingDispatcher::start(&config.worker, deliverer)?)
            }
            ExecutionMode::Cooperative => {
                Dispatcher::Cooperative(CooperativeDispatcher::start(&config.worker, deliverer)?)
            }
        };
        info!("INSIGHTS | Insights worker running in {:?} mode", config.mode);
        Ok(InsightsManager { dispatcher })
    }

    #[must_use]
    pub fn disabled() -> Self {
        InsightsManager {
            dispatcher: Dispatcher::Null(NullDispatcher),
        }
    }

    /// `None` when disabled.
    #[must_use]
    pub fn mode(&self) -> Option<ExecutionMode> {
        match self.dispatcher {
            Dispatcher::Null(_) => None,
            Dispatcher::Blocking(_) => Some(ExecutionMode::Blocking),
            Dispatcher::Cooperative(_) => Some(ExecutionMode::Cooperative),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.mode().is_some()
    }

    /// Flushes everything submitted so far and stops the worker. Must not be called from
    /// inside a tokio runtime; a cooperative worker is only closed here and drains on its own.
    pub fn shutdown_blocking(self) -> Option<WorkerReport> {
        match self.dispatcher {
            Dispatcher::Null(_) => None,
            Dispatcher::Blocking(dispatcher) => dispatcher.shutdown(),
            Dispatcher::Cooperative(dispatcher) => {
                debug!("INSIGHTS | Closing cooperative worker without waiting for it");
                drop(dispatcher);
                None
            }
        }
    }

    /// Flushes everything submitted so far and stops the worker.
    pub async fn shutdown(self) -> Option<WorkerReport> {
        match self.dispatcher {
            Dispatcher::Null(_) => None,
            Dispatcher::Blocking(dispatcher) => {
                match tokio::task::spawn_blocking(move || dispatcher.shutdown()).await {
                    Ok(report) => report,
                    Err(e) => {
                        error!("INSIGHTS | Failed to join insights worker: {}", e);
                        None
                    }
                }
            }
            Dispatcher::Cooperative(dispatcher) => dispatcher.shutdown().await,
        }
    }

    fn inner(&self) -> &dyn Dispatch {
        match &self.dispatcher {
            Dispatcher::Null(dispatcher) => dispatcher,
            Dispatcher::Blocking(dispatcher) => dispatcher,
            Dispatcher::Cooperative(dispatcher) => dispatcher,
        }
    }
}

impl Default for InsightsManager {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Dispatch for InsightsManager {
    fn log(&self, data: Value, ctx: &RequestContext, insights_type: InsightsType) {
        self.inner().log(data, ctx, insights_type);
    }

    fn log_request(&self) {
        self.inner().log_request();
    }

    fn log_response(&self) {
        self.inner().log_response();
    }
}

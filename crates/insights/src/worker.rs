// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background worker turning queued records into batched deliveries.
//!
//! # States
//!
//! ```text
//!            record                    size reached / window expired
//!   Idle ──────────────> Accumulating ──────────────────────────────> Flushing
//!    ^                        ^                                          │
//!    │                        └──────── records arrived meanwhile ───────┤
//!    └────────────────────────────────── nothing held ───────────────────┘
//! ```
//!
//! A flush hands the batch to a delivery task. At most `parallelism` delivery tasks run at once;
//! when every slot is taken the worker waits for one to free up before starting the next
//! delivery, while producers keep filling the queue up to its capacity.
//!
//! Once every producer handle is dropped the worker flushes the partial batch, waits for all
//! in-flight deliveries and returns a [`WorkerReport`].

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::batch::{Batch, BatchAccumulator};
use crate::config::WorkerConfig;
use crate::delivery::{send_with_retry, Deliver, DeliveryOutcome, RetryStrategy};
use crate::queue::{self, QueueReceiver, QueueSender};

/// Counters for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub batches_delivered: u64,
    pub batches_dropped: u64,
    pub records_delivered: u64,
    pub records_dropped: u64,
    /// Delivery attempts across all batches, retries included.
    pub attempts: u64,
}

pub struct BatchingWorker {
    rx: QueueReceiver,
    deliverer: Arc<dyn Deliver>,
    accumulator: BatchAccumulator,
    retry_strategy: RetryStrategy,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<(usize, DeliveryOutcome)>,
    /// Records handed to delivery tasks that have not reported back yet.
    pending_records: u64,
    report: WorkerReport,
}

impl BatchingWorker {
    /// Creates the submission queue and the worker consuming it. The sender is the only way to
    /// feed the worker; dropping every clone of it stops the worker.
    #[must_use]
    pub fn new(config: &WorkerConfig, deliverer: Arc<dyn Deliver>) -> (QueueSender, Self) {
        let (tx, rx) = queue::channel(config.queue_capacity);
        let worker = BatchingWorker {
            rx,
            deliverer,
            accumulator: BatchAccumulator::new(config.batch_size, config.window_time),
            retry_strategy: config.retry_strategy(),
            permits: Arc::new(Semaphore::new(config.parallelism.max(1))),
            in_flight: JoinSet::new(),
            pending_records: 0,
            report: WorkerReport::default(),
        };
        (tx, worker)
    }

    pub async fn run(mut self) -> WorkerReport {
        debug!("INSIGHTS | Batching worker started");

        loop {
            let deadline = self.accumulator.deadline();
            tokio::select! {
                biased;

                Some(result) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.record_outcome(result);
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(batch) = self.accumulator.take() {
                        debug!("INSIGHTS | Window expired with {} insights held", batch.len());
                        self.flush(batch).await;
                    }
                }
                received = self.rx.recv() => match received {
                    Some(record) => {
                        if let Some(batch) = self.accumulator.push(record) {
                            self.flush(batch).await;
                        }
                    }
                    None => break,
                },
            }
        }

        debug!("INSIGHTS | Submission queue closed, draining worker");
        if let Some(batch) = self.accumulator.take() {
            self.flush(batch).await;
        }
        while let Some(result) = self.in_flight.join_next().await {
            self.record_outcome(result);
        }
        if self.pending_records > 0 {
            // only tasks that failed without returning their batch size leave records here
            error!(
                "INSIGHTS | {} insights lost with failed delivery tasks",
                self.pending_records
            );
            self.report.records_dropped += self.pending_records;
            self.pending_records = 0;
        }

        let report = self.report;
        info!(
            "INSIGHTS | Batching worker stopped: {} batches delivered, {} dropped, {} attempts",
            report.batches_delivered, report.batches_dropped, report.attempts
        );
        report
    }

    async fn flush(&mut self, batch: Batch) {
        // Blocks only the spawning of new deliveries, the queue keeps accepting records
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            error!(
                "INSIGHTS | Delivery slots unavailable, dropping batch of {} insights",
                batch.len()
            );
            self.report.batches_dropped += 1;
            self.report.records_dropped += batch.len() as u64;
            return;
        };

        debug!("INSIGHTS | Flushing batch of {} insights", batch.len());
        let deliverer = Arc::clone(&self.deliverer);
        let strategy = self.retry_strategy;
        self.pending_records += batch.len() as u64;
        self.in_flight.spawn(async move {
            let outcome = send_with_retry(deliverer.as_ref(), &batch, strategy).await;
            drop(permit);
            (batch.len(), outcome)
        });
    }

    fn record_outcome(&mut self, result: Result<(usize, DeliveryOutcome), JoinError>) {
        match result {
            Ok((len, outcome)) => {
                self.pending_records -= len as u64;
                self.report.attempts += u64::from(outcome.attempts);
                match outcome.result {
                    Ok(()) => {
                        self.report.batches_delivered += 1;
                        self.report.records_delivered += len as u64;
                    }
                    Err(e) => {
                        error!(
                            "INSIGHTS | Dropping batch of {} insights after {} attempts: {}",
                            len, outcome.attempts, e
                        );
                        self.report.batches_dropped += 1;
                        self.report.records_dropped += len as u64;
                    }
                }
            }
            Err(e) => {
                error!("INSIGHTS | Delivery task failed: {}", e);
                self.report.batches_dropped += 1;
            }
        }
    }
}

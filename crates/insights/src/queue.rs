// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, ordered submission queue between producers and the batching worker.
//!
//! Any number of cloned [`QueueSender`]s feed exactly one [`QueueReceiver`]. A full queue
//! suspends the producer: `submit` yields the calling task, [`BlockingSubmitter::submit`] parks
//! the calling thread with no upper wait bound. Records are never dropped to make room.

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::errors::QueueClosed;
use crate::payload::InsightRecord;

#[must_use]
pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Clone, Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<InsightRecord>,
}

impl QueueSender {
    /// Waits for free capacity without blocking the scheduler thread.
    pub async fn submit(&self, record: InsightRecord) -> Result<(), QueueClosed> {
        self.tx.send(record).await.map_err(|_| QueueClosed)
    }

    /// Turns this sender into a submitter for plain threads. Its forwarding task is spawned on
    /// `runtime`, which has to be driven for submissions to make progress.
    #[must_use]
    pub fn into_blocking(self, runtime: &Handle) -> BlockingSubmitter {
        let (staging, mut staged) = mpsc::unbounded_channel::<Staged>();
        runtime.spawn(async move {
            while let Some(Staged { record, accepted }) = staged.recv().await {
                if let Err(e) = self.submit(record).await {
                    error!("INSIGHTS | {}, stopping insight forwarding", e);
                    break;
                }
                if let Some(accepted) = accepted {
                    // the submitter may have given up waiting, nothing to do then
                    let _ = accepted.send(());
                }
            }
        });
        BlockingSubmitter { staging }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
struct Staged {
    record: InsightRecord,
    accepted: Option<oneshot::Sender<()>>,
}

/// Queue producer for callers outside the async scheduler.
///
/// Every submission goes through one forwarding task, so records reach the queue in the order
/// they were submitted no matter which thread submitted them.
#[derive(Clone, Debug)]
pub struct BlockingSubmitter {
    staging: mpsc::UnboundedSender<Staged>,
}

impl BlockingSubmitter {
    /// Parks the calling thread until the record is accepted by the queue.
    ///
    /// Parking a thread that belongs to a tokio runtime is not allowed, so from inside a runtime
    /// this returns as soon as the record is staged. Ordering is kept either way.
    pub fn submit(&self, record: InsightRecord) -> Result<(), QueueClosed> {
        if Handle::try_current().is_ok() {
            warn!("INSIGHTS | Blocking submit inside a runtime, not waiting for the queue");
            return self
                .staging
                .send(Staged {
                    record,
                    accepted: None,
                })
                .map_err(|_| QueueClosed);
        }

        let (accepted, acceptance) = oneshot::channel();
        self.staging
            .send(Staged {
                record,
                accepted: Some(accepted),
            })
            .map_err(|_| QueueClosed)?;
        acceptance.blocking_recv().map_err(|_| QueueClosed)
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<InsightRecord>,
}

impl QueueReceiver {
    /// Next record in submission order, or `None` once every sender is gone and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<InsightRecord> {
        self.rx.recv().await
    }

    /// Stops accepting new records. Already queued records can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{InsightsType, RequestContext};
    use serde_json::json;
    use std::time::Duration;

    fn record(n: u64) -> InsightRecord {
        InsightRecord::new(
            json!(n),
            &RequestContext::new(format!("req-{n}")),
            InsightsType::CustomInsight,
        )
    }

    #[tokio::test]
    async fn test_preserves_submission_order() {
        let (tx, mut rx) = channel(16);
        for n in 0..10 {
            tx.submit(record(n)).await.expect("queue open");
        }
        drop(tx);

        let mut received = Vec::new();
        while let Some(r) = rx.recv().await {
            received.push(r.data().as_u64().unwrap());
        }
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_submit_suspends_while_full() {
        let (tx, mut rx) = channel(1);
        tx.submit(record(0)).await.expect("queue open");

        let pending = tokio::time::timeout(Duration::from_millis(50), tx.submit(record(1))).await;
        assert!(pending.is_err(), "submit should wait for free capacity");

        assert_eq!(rx.recv().await.unwrap().data(), &json!(0));
        tx.submit(record(1)).await.expect("queue open");
        assert_eq!(rx.recv().await.unwrap().data(), &json!(1));
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let (tx, mut rx) = channel(4);
        rx.close();
        assert!(tx.is_closed());
        assert_eq!(tx.submit(record(0)).await, Err(QueueClosed));
    }

    async fn drain_values(rx: &mut QueueReceiver) -> Vec<u64> {
        let mut received = Vec::new();
        while let Some(r) = rx.recv().await {
            received.push(r.data().as_u64().unwrap());
        }
        received
    }

    #[test]
    fn test_blocking_submit_waits_for_consumer() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (tx, mut rx) = channel(1);
        let submitter = tx.into_blocking(runtime.handle());

        let producer = std::thread::spawn(move || {
            for n in 0..5 {
                submitter.submit(record(n)).expect("queue open");
            }
        });

        let received = runtime.block_on(drain_values(&mut rx));
        producer.join().unwrap();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_blocking_submit_returns_once_accepted() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (tx, mut rx) = channel(1);
        let submitter = tx.into_blocking(runtime.handle());

        let producer = std::thread::spawn(move || {
            submitter.submit(record(0)).expect("queue open");
            // queue holds one record and nobody reads it yet
            submitter.submit(record(1)).expect("queue open");
        });

        runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(!producer.is_finished(), "second submit should wait for capacity");
            assert_eq!(rx.recv().await.unwrap().data(), &json!(0));
            assert_eq!(rx.recv().await.unwrap().data(), &json!(1));
        });
        producer.join().unwrap();
    }

    #[test]
    fn test_blocking_submit_fails_once_queue_closed() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (tx, mut rx) = channel(1);
        rx.close();
        let submitter = tx.into_blocking(runtime.handle());

        let producer = std::thread::spawn(move || submitter.submit(record(0)));
        runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        // stops the forwarder if it never saw the record
        drop(runtime);
        assert_eq!(producer.join().unwrap(), Err(QueueClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_submit_inside_runtime_keeps_order() {
        let (tx, mut rx) = channel(2);
        let submitter = tx.into_blocking(&Handle::current());

        let producer = tokio::task::spawn_blocking(move || {
            for n in 0..200 {
                submitter.submit(record(n)).expect("staged");
            }
        });

        let received = drain_values(&mut rx).await;
        producer.await.unwrap();
        assert_eq!(received, (0..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_blocking_submit_on_scheduler_thread_does_not_block() {
        let (tx, mut rx) = channel(1);
        let submitter = tx.into_blocking(&Handle::current());
        submitter.submit(record(0)).expect("staged");
        submitter.submit(record(1)).expect("staged");
        drop(submitter);

        assert_eq!(drain_values(&mut rx).await, vec![0, 1]);
    }
}

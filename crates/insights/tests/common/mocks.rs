// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock delivery backends

use async_trait::async_trait;
use insights::{Batch, Deliver, DeliveryError};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records the numeric payload of every delivered batch.
#[derive(Default)]
pub struct RecordingDeliver {
    batches: Mutex<Vec<Vec<u64>>>,
}

impl RecordingDeliver {
    pub fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deliver for RecordingDeliver {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let values = batch
            .records()
            .iter()
            .map(|r| r.data().as_u64().expect("numeric payload"))
            .collect();
        self.batches.lock().unwrap().push(values);
        Ok(())
    }
}

/// Holds every delivery for `delay` and tracks how many overlap.
pub struct ConcurrencyProbe {
    delay: Duration,
    current: AtomicUsize,
    max_seen: AtomicUsize,
    completed: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        ConcurrencyProbe {
            delay,
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deliver for ConcurrencyProbe {
    async fn deliver(&self, _batch: &Batch) -> Result<(), DeliveryError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `failures` attempts, then succeeds.
pub struct FlakyDeliver {
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyDeliver {
    pub fn new(failures: usize) -> Self {
        FlakyDeliver {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deliver for FlakyDeliver {
    async fn deliver(&self, _batch: &Batch) -> Result<(), DeliveryError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(DeliveryError::Status(StatusCode::BAD_GATEWAY));
        }
        Ok(())
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::payload::InsightRecord;

/// Records delivered together in one request, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Batch {
    records: Vec<InsightRecord>,
}

impl Batch {
    #[must_use]
    pub fn new(records: Vec<InsightRecord>) -> Self {
        Batch { records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[InsightRecord] {
        &self.records
    }

    /// JSON array of records.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.records)
    }
}

/// Partial batch held by the worker between flushes.
///
/// The window starts with the first record of a batch; an empty accumulator has no deadline.
#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    window_time: Option<Duration>,
    buffer: Vec<InsightRecord>,
    deadline: Option<Instant>,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(batch_size: usize, window_time: Option<Duration>) -> Self {
        let batch_size = batch_size.max(1);
        BatchAccumulator {
            batch_size,
            window_time,
            buffer: Vec::with_capacity(batch_size),
            deadline: None,
        }
    }

    /// Adds a record and hands back a full batch once `batch_size` is reached.
    pub fn push(&mut self, record: InsightRecord) -> Option<Batch> {
        if self.buffer.is_empty() {
            self.deadline = self.window_time.map(|window| Instant::now() + window);
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            return self.take();
        }
        None
    }

    /// Drains whatever is held, regardless of size.
    pub fn take(&mut self) -> Option<Batch> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        let records = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        Some(Batch::new(records))
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

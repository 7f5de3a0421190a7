// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised while building the insights pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cooperative mode requires a running tokio runtime")]
    NoRuntime,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to start insights worker: {0}")]
    WorkerStart(#[from] std::io::Error),
}

/// A single failed delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Endpoint responded with status {0}")]
    Status(StatusCode),

    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The worker side of the queue is gone; the record was not accepted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Submission queue is closed")]
pub struct QueueClosed;

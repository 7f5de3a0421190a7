// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side insights dispatch.
//!
//! Application code emits insight events through an [`InsightsManager`]. Each event is wrapped
//! into an [`InsightRecord`], pushed onto a bounded submission queue and picked up by a
//! background [`BatchingWorker`] that groups records into batches and ships them to a remote
//! collector with bounded parallelism and retries.
//!
//! ```text
//!   caller ──log()──> InsightRecord ──> QueueSender ══ mpsc ══> BatchingWorker ──> Deliver
//!                                                                  │  (≤ parallelism
//!                                                                  │   in flight)
//!                                                                  └──> WorkerReport
//! ```
//!
//! When no endpoint is configured the manager degrades to a no-op dispatcher that only warns.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod payload;
pub mod queue;
pub mod worker;

pub use batch::Batch;
pub use config::{ExecutionMode, InsightsConfig, WorkerConfig};
pub use delivery::{Deliver, HttpDelivery, RetryStrategy};
pub use dispatcher::{
    BlockingDispatcher, CooperativeDispatcher, Dispatch, InsightsManager, NullDispatcher,
};
pub use errors::{Creation, DeliveryError, QueueClosed};
pub use payload::{InsightRecord, InsightsType, RequestContext};
pub use queue::{BlockingSubmitter, QueueReceiver, QueueSender};
pub use worker::{BatchingWorker, WorkerReport};

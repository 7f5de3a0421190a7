// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities and mocks for integration tests

#![allow(dead_code)]

pub mod mocks;

use insights::{InsightRecord, InsightsType, RequestContext};
use serde_json::json;

/// Record whose payload is the sequence number `n`.
pub fn numbered_record(n: u64) -> InsightRecord {
    InsightRecord::new(
        json!(n),
        &RequestContext::new(format!("req-{n}")),
        InsightsType::CustomInsight,
    )
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request id used when the surrounding request scope did not provide one.
pub const DEFAULT_REQUEST_ID: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightsType {
    InferRequest,
    InferResponse,
    #[default]
    CustomInsight,
}

/// Per-request state handed to the payload builder by the request-handling scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        RequestContext {
            request_id: request_id.into(),
        }
    }

    /// Falls back to [`DEFAULT_REQUEST_ID`] when the id is missing or blank.
    #[must_use]
    pub fn from_optional(request_id: Option<&str>) -> Self {
        match request_id.map(str::trim) {
            Some(id) if !id.is_empty() => RequestContext::new(id),
            _ => RequestContext::default(),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        RequestContext::new(DEFAULT_REQUEST_ID)
    }
}

/// A normalized insight ready to be queued. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    data: Value,
    request_id: String,
    insights_type: InsightsType,
}

impl InsightRecord {
    #[must_use]
    pub fn new(data: Value, ctx: &RequestContext, insights_type: InsightsType) -> Self {
        InsightRecord {
            data,
            request_id: ctx.request_id().to_string(),
            insights_type,
        }
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn insights_type(&self) -> InsightsType {
        self.insights_type
    }
}

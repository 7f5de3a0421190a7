// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use serde_json::Value;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use insights::{
    Dispatch, ExecutionMode, InsightsConfig, InsightsManager, InsightsType, RequestContext,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("INSIGHTS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let mut config = match InsightsConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on insights emitter startup: {e}");
            return;
        }
    };
    if config.mode != ExecutionMode::Cooperative {
        // stdin is read on the runtime, so submissions must not park its threads
        debug!("Overriding {:?} mode, the emitter always runs cooperatively", config.mode);
        config.mode = ExecutionMode::Cooperative;
    }

    let manager = InsightsManager::new(&config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded: u64 = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let (data, ctx, insights_type) = parse_line(&line);
                manager.log(data, &ctx, insights_type);
                forwarded += 1;
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from stdin: {e}");
                break;
            }
        }
    }

    info!("Read {forwarded} insights from stdin, flushing");
    if let Some(report) = manager.shutdown().await {
        info!(
            "Delivered {} insights in {} batches, dropped {} insights",
            report.records_delivered, report.batches_delivered, report.records_dropped
        );
    }
}

/// A line is either an envelope `{"data": .., "request_id": .., "insights_type": ..}` or any
/// other JSON value, which is sent as-is. Lines that are not JSON are sent as strings.
fn parse_line(line: &str) -> (Value, RequestContext, InsightsType) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            return (
                Value::String(line.to_string()),
                RequestContext::default(),
                InsightsType::default(),
            )
        }
    };

    let Value::Object(mut envelope) = value else {
        return (value, RequestContext::default(), InsightsType::default());
    };
    let Some(data) = envelope.remove("data") else {
        return (
            Value::Object(envelope),
            RequestContext::default(),
            InsightsType::default(),
        );
    };

    let ctx = RequestContext::from_optional(envelope.get("request_id").and_then(Value::as_str));
    let insights_type = envelope
        .remove("insights_type")
        .and_then(|kind| serde_json::from_value(kind).ok())
        .unwrap_or_default();
    (data, ctx, insights_type)
}

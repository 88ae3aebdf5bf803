// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote log-group/log-stream store.
//!
//! [`LogStore`] is the contract the shipper consumes. [`CloudWatchLogsClient`]
//! speaks it over HTTP to CloudWatch Logs; [`MemoryLogStore`] keeps the same
//! semantics in process.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod cloudwatch;
pub mod memory;
pub mod sigv4;

pub use cloudwatch::CloudWatchLogsClient;
pub use memory::MemoryLogStore;
pub use sigv4::Credentials;

/// A single entry appended to a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputLogEvent {
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl InputLogEvent {
    /// Entry stamped with the current wall-clock time.
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogGroup {
    pub log_group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStream {
    pub log_stream_name: String,
    /// Token the next append must carry; absent on a stream with no entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_sequence_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ingestion_time: Option<i64>,
}

/// Operations consumed from the remote log store.
///
/// "Already exists" is reported as [`StoreError::AlreadyExists`] so callers
/// can treat it as success.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Groups whose name starts with `prefix` (all groups when `None`).
    async fn describe_log_groups(&self, prefix: Option<&str>) -> Result<Vec<LogGroup>, StoreError>;

    async fn create_log_group(&self, name: &str) -> Result<(), StoreError>;

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), StoreError>;

    /// Streams of `group` whose name starts with `prefix`, with their
    /// current upload sequence token.
    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, StoreError>;

    /// Appends `events` using `sequence_token` and returns the token the next
    /// append must use.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: Vec<InputLogEvent>,
        sequence_token: Option<String>,
    ) -> Result<Option<String>, StoreError>;
}

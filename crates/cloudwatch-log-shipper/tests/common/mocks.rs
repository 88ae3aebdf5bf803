// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock connectors and stores for driving the pipeline without AWS

use cloudwatch_log_shipper::error::{ShipperError, StoreError};
use cloudwatch_log_shipper::service::Connector;
use cloudwatch_log_shipper::store::{
    Credentials, InputLogEvent, LogGroup, LogStore, LogStream, MemoryLogStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Connector that records every session it opens and hands out one shared
/// in-memory store
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingConnector {
    pub store: Arc<MemoryLogStore>,
    sessions: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl RecordingConnector {
    /// `(access key, region)` of each opened session
    pub fn sessions(&self) -> Vec<(String, String)> {
        self.sessions.lock().unwrap().clone()
    }
}

impl Connector for RecordingConnector {
    fn connect(
        &self,
        credentials: Credentials,
        region: &str,
    ) -> Result<Arc<dyn LogStore>, ShipperError> {
        self.sessions
            .lock()
            .unwrap()
            .push((credentials.access_key_id, region.to_string()));
        Ok(Arc::clone(&self.store) as Arc<dyn LogStore>)
    }
}

/// Store whose stream always exists but which rejects every append with a
/// stale token
#[allow(dead_code)]
#[derive(Default)]
pub struct RejectingStore {
    pub put_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl LogStore for RejectingStore {
    async fn describe_log_groups(&self, prefix: Option<&str>) -> Result<Vec<LogGroup>, StoreError> {
        Ok(prefix
            .map(|name| LogGroup {
                log_group_name: name.to_string(),
                creation_time: None,
                arn: None,
            })
            .into_iter()
            .collect())
    }

    async fn create_log_group(&self, name: &str) -> Result<(), StoreError> {
        Err(StoreError::AlreadyExists(name.to_string()))
    }

    async fn create_log_stream(&self, _group: &str, stream: &str) -> Result<(), StoreError> {
        Err(StoreError::AlreadyExists(stream.to_string()))
    }

    async fn describe_log_streams(
        &self,
        _group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, StoreError> {
        Ok(vec![LogStream {
            log_stream_name: prefix.to_string(),
            upload_sequence_token: Some("1".to_string()),
            creation_time: None,
            last_ingestion_time: None,
        }])
    }

    async fn put_log_events(
        &self,
        _group: &str,
        _stream: &str,
        _events: Vec<InputLogEvent>,
        _sequence_token: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::InvalidSequenceToken {
            expected: Some("2".to_string()),
        })
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process [`LogStore`] with the remote service's token semantics.
//!
//! Groups and streams live in memory, every append must carry the stream's
//! current token, and each operation is counted so callers can assert on the
//! exact remote traffic an operation caused.

use crate::error::StoreError;
use crate::store::{InputLogEvent, LogGroup, LogStore, LogStream};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct StreamState {
    token: Option<String>,
    events: Vec<InputLogEvent>,
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, BTreeMap<String, StreamState>>,
    next_token: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    describe_log_groups: AtomicUsize,
    create_log_group: AtomicUsize,
    create_log_stream: AtomicUsize,
    describe_log_streams: AtomicUsize,
    put_log_events: AtomicUsize,
}

/// Snapshot of how many times each operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub describe_log_groups: usize,
    pub create_log_group: usize,
    pub create_log_stream: usize,
    pub describe_log_streams: usize,
    pub put_log_events: usize,
}

impl StoreCalls {
    #[must_use]
    pub fn total(&self) -> usize {
        self.describe_log_groups
            + self.create_log_group
            + self.create_log_stream
            + self.describe_log_streams
            + self.put_log_events
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    state: Mutex<State>,
    calls: CallCounters,
    latency: Option<Duration>,
    unavailable: AtomicBool,
    drop_stream_creation: AtomicBool,
}

impl MemoryLogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that sleeps `latency` inside every operation, which lets
    /// concurrent callers interleave between describe and append.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Pre-creates a group.
    #[must_use]
    pub fn with_group(self, name: &str) -> Self {
        self.lock().groups.entry(name.to_string()).or_default();
        self
    }

    /// Pre-creates a stream (and its group) that already holds one entry, so
    /// its token is set.
    #[must_use]
    pub fn with_stream(self, group: &str, stream: &str) -> Self {
        {
            let mut state = self.lock();
            state.next_token += 1;
            let token = state.next_token.to_string();
            let streams = state.groups.entry(group.to_string()).or_default();
            let entry = streams.entry(stream.to_string()).or_default();
            entry.token = Some(token);
            entry.events.push(InputLogEvent {
                message: "seed".to_string(),
                timestamp: 0,
            });
        }
        self
    }

    /// Every operation fails with a service error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// `create_log_stream` reports success without creating anything.
    pub fn set_drop_stream_creation(&self, drop: bool) {
        self.drop_stream_creation.store(drop, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            describe_log_groups: self.calls.describe_log_groups.load(Ordering::SeqCst),
            create_log_group: self.calls.create_log_group.load(Ordering::SeqCst),
            create_log_stream: self.calls.create_log_stream.load(Ordering::SeqCst),
            describe_log_streams: self.calls.describe_log_streams.load(Ordering::SeqCst),
            put_log_events: self.calls.put_log_events.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.lock().groups.contains_key(group)
    }

    #[must_use]
    pub fn has_stream(&self, group: &str, stream: &str) -> bool {
        self.lock()
            .groups
            .get(group)
            .is_some_and(|streams| streams.contains_key(stream))
    }

    /// Entries appended to a stream, in acceptance order.
    #[must_use]
    pub fn events(&self, group: &str, stream: &str) -> Vec<InputLogEvent> {
        self.lock()
            .groups
            .get(group)
            .and_then(|streams| streams.get(stream))
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Api {
                code: "ServiceUnavailableException".to_string(),
                message: "The service cannot complete the request.".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn describe_log_groups(&self, prefix: Option<&str>) -> Result<Vec<LogGroup>, StoreError> {
        self.enter(&self.calls.describe_log_groups).await?;
        let prefix = prefix.unwrap_or_default();
        Ok(self
            .lock()
            .groups
            .keys()
            .filter(|name| name.starts_with(prefix))
            .map(|name| LogGroup {
                log_group_name: name.clone(),
                creation_time: None,
                arn: None,
            })
            .collect())
    }

    async fn create_log_group(&self, name: &str) -> Result<(), StoreError> {
        self.enter(&self.calls.create_log_group).await?;
        let mut state = self.lock();
        if state.groups.contains_key(name) {
            return Err(StoreError::AlreadyExists(
                "The specified log group already exists".to_string(),
            ));
        }
        state.groups.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), StoreError> {
        self.enter(&self.calls.create_log_stream).await?;
        if self.drop_stream_creation.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.lock();
        let Some(streams) = state.groups.get_mut(group) else {
            return Err(StoreError::ResourceNotFound(
                "The specified log group does not exist.".to_string(),
            ));
        };
        if streams.contains_key(stream) {
            return Err(StoreError::AlreadyExists(
                "The specified log stream already exists".to_string(),
            ));
        }
        streams.insert(stream.to_string(), StreamState::default());
        Ok(())
    }

    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, StoreError> {
        self.enter(&self.calls.describe_log_streams).await?;
        let state = self.lock();
        let Some(streams) = state.groups.get(group) else {
            return Err(StoreError::ResourceNotFound(
                "The specified log group does not exist.".to_string(),
            ));
        };
        Ok(streams
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, s)| LogStream {
                log_stream_name: name.clone(),
                upload_sequence_token: s.token.clone(),
                creation_time: None,
                last_ingestion_time: s.events.last().map(|e| e.timestamp),
            })
            .collect())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: Vec<InputLogEvent>,
        sequence_token: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        self.enter(&self.calls.put_log_events).await?;
        if events.is_empty() || events.iter().any(|e| e.message.is_empty()) {
            return Err(StoreError::Api {
                code: "InvalidParameterException".to_string(),
                message: "log events must have a non-empty message".to_string(),
            });
        }

        let mut state = self.lock();
        state.next_token += 1;
        let next = state.next_token.to_string();
        let Some(entry) = state
            .groups
            .get_mut(group)
            .and_then(|streams| streams.get_mut(stream))
        else {
            return Err(StoreError::ResourceNotFound(
                "The specified log stream does not exist.".to_string(),
            ));
        };
        if entry.token != sequence_token {
            return Err(StoreError::InvalidSequenceToken {
                expected: entry.token.clone(),
            });
        }
        entry.events.extend(events);
        entry.token = Some(next.clone());
        Ok(Some(next))
    }
}

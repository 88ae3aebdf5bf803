// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote log shipper: destination provisioning and token-ordered appends.
//!
//! # Append sequence
//!
//! ```text
//!   append(message)
//!        │
//!        v
//!   ┌──────────────────┐   missing   ┌───────────────┐
//!   │ describe stream  │ ──────────> │ create stream │
//!   └────────┬─────────┘             └───────┬───────┘
//!            │ token                         │
//!            │                      ┌────────v─────────┐
//!            │                      │ describe again   │ (still missing: drop)
//!            │                      └────────┬─────────┘
//!            v                               v
//!   ┌──────────────────────────────────────────────┐
//!   │ put one event with the just-resolved token   │ (rejected: drop)
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! The token is never cached. When appends are serialized the
//! describe-and-put pair runs under one async mutex; otherwise concurrent
//! appends may read the same token and all but one are rejected and dropped.

use crate::destination::Destination;
use crate::error::{ShipperError, StoreError};
use crate::store::{InputLogEvent, LogStore, LogStream};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of one [`LogShipper::append`] call.
#[derive(Debug)]
pub enum AppendOutcome {
    /// The entry was accepted; carries the token for the next append.
    Sent { next_token: Option<String> },
    /// The entry was dropped and the reason logged. Never retried.
    Dropped(ShipperError),
}

impl AppendOutcome {
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, AppendOutcome::Sent { .. })
    }
}

pub struct LogShipper {
    store: Arc<dyn LogStore>,
    destination: Destination,
    append_lock: Option<Mutex<()>>,
}

impl LogShipper {
    #[must_use]
    pub fn new(store: Arc<dyn LogStore>, destination: Destination, serialize_appends: bool) -> Self {
        Self {
            store,
            destination,
            append_lock: serialize_appends.then(|| Mutex::new(())),
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Makes sure the group and the stream exist.
    ///
    /// Lists existing groups for diagnostics, creates the group when it is
    /// absent, then creates the stream unless it is already there.
    pub async fn provision(&self) -> Result<(), ShipperError> {
        match self.list_groups().await {
            Ok(groups) if groups.is_empty() => debug!("No log groups found"),
            Ok(groups) => {
                for group in groups {
                    debug!("Log group name: {group}");
                }
            }
            Err(e) => warn!("Failed to list log groups: {e}"),
        }

        let group = self.destination.group();
        if self.ensure_destination_exists(group).await {
            debug!("Log group {group} exists");
        } else {
            info!("Log group {group} not found, creating it");
            self.create_group(group).await?;
        }

        self.create_stream(group, self.destination.stream()).await?;
        Ok(())
    }

    /// Names of every group visible with the session's credentials.
    pub async fn list_groups(&self) -> Result<Vec<String>, ShipperError> {
        Ok(self
            .store
            .describe_log_groups(None)
            .await?
            .into_iter()
            .map(|g| g.log_group_name)
            .collect())
    }

    /// Whether a group named exactly `group` exists.
    ///
    /// Best effort: a failing lookup reports `false`, which at worst leads to
    /// a redundant create that comes back as "already exists".
    pub async fn ensure_destination_exists(&self, group: &str) -> bool {
        match self.store.describe_log_groups(Some(group)).await {
            Ok(groups) => groups.iter().any(|g| g.log_group_name == group),
            Err(e) => {
                warn!("Failed to look up log group {group}: {e}");
                false
            }
        }
    }

    /// Creates `name`; an existing group counts as success.
    pub async fn create_group(&self, name: &str) -> Result<(), ShipperError> {
        match self.store.create_log_group(name).await {
            Ok(()) => {
                info!("Log group created: {name}");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!("Log group already exists: {name}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Creates `stream` in `group` unless it already exists, and returns the
    /// stream's current sequence token (`None` for a new or empty stream).
    pub async fn create_stream(
        &self,
        group: &str,
        stream: &str,
    ) -> Result<Option<String>, ShipperError> {
        match self.find_stream(group, stream).await {
            Ok(Some(existing)) => {
                debug!("Log stream already exists: {stream}");
                return Ok(existing.upload_sequence_token);
            }
            Ok(None) => {}
            Err(e) => debug!("Describe before create failed for {stream}: {e}"),
        }

        self.create_stream_unchecked(group, stream).await?;
        Ok(None)
    }

    /// Ships `message` as one entry and logs the outcome.
    ///
    /// Exactly one line is logged per dropped entry.
    pub async fn append(&self, message: &str) -> AppendOutcome {
        match self.try_append(message).await {
            Ok(next_token) => {
                debug!("Log event sent successfully");
                AppendOutcome::Sent { next_token }
            }
            Err(e) => {
                error!(
                    group = self.destination.group(),
                    stream = self.destination.stream(),
                    "Log event dropped: {e}"
                );
                AppendOutcome::Dropped(e)
            }
        }
    }

    /// [`Self::append`] without the logging: the caller owns the error.
    pub async fn try_append(&self, message: &str) -> Result<Option<String>, ShipperError> {
        if !self.destination.is_complete() {
            return Err(ShipperError::IncompleteDestination);
        }
        if message.is_empty() {
            return Err(ShipperError::EmptyMessage);
        }

        let event = InputLogEvent::now(message);

        let _guard = match &self.append_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let token = self.resolve_sequence_token().await?;
        let next_token = self
            .store
            .put_log_events(
                self.destination.group(),
                self.destination.stream(),
                vec![event],
                token,
            )
            .await?;
        Ok(next_token)
    }

    /// Describes the stream for its current token, creating it on demand.
    async fn resolve_sequence_token(&self) -> Result<Option<String>, ShipperError> {
        let group = self.destination.group();
        let stream = self.destination.stream();

        if let Some(existing) = self.find_stream(group, stream).await? {
            return Ok(existing.upload_sequence_token);
        }

        warn!("Log stream does not exist, creating log stream {stream}");
        self.create_stream_unchecked(group, stream).await?;

        match self.find_stream(group, stream).await? {
            Some(created) => Ok(created.upload_sequence_token),
            None => Err(ShipperError::StreamUnavailable {
                group: group.to_string(),
                stream: stream.to_string(),
            }),
        }
    }

    async fn create_stream_unchecked(&self, group: &str, stream: &str) -> Result<(), ShipperError> {
        match self.store.create_log_stream(group, stream).await {
            Ok(()) => {
                info!("Log stream created: {stream}");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!("Log stream already exists: {stream}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The stream named exactly `stream`, if any. Describe is prefix-based.
    async fn find_stream(&self, group: &str, stream: &str) -> Result<Option<LogStream>, StoreError> {
        Ok(self
            .store
            .describe_log_streams(group, stream)
            .await?
            .into_iter()
            .find(|s| s.log_stream_name == stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryLogStore, StoreCalls};
    use std::time::Duration;
    use tracing_test::traced_test;

    const GROUP: &str = "app-logs";
    const STREAM: &str = "0b6b2b6e-6f1c-4f43-9a7e-3f0f2a9c8d11_Pixel_7";

    fn shipper_with(store: &Arc<MemoryLogStore>, serialize: bool) -> LogShipper {
        LogShipper::new(
            Arc::clone(store) as Arc<dyn LogStore>,
            Destination::new(GROUP, STREAM),
            serialize,
        )
    }

    #[tokio::test]
    async fn test_ensure_destination_exists_after_create() {
        let store = Arc::new(MemoryLogStore::new().with_group("app-logs-old"));
        let shipper = shipper_with(&store, true);

        // prefix match alone is not enough
        assert!(!shipper.ensure_destination_exists("app-logs").await);
        assert!(!shipper.ensure_destination_exists("app").await);

        shipper.create_group("app-logs").await.unwrap();
        assert!(shipper.ensure_destination_exists("app-logs").await);

        // already exists is success
        shipper.create_group("app-logs").await.unwrap();
        assert!(shipper.ensure_destination_exists("app-logs").await);
    }

    #[tokio::test]
    async fn test_ensure_destination_exists_lookup_failure_is_false() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        store.set_unavailable(true);
        let shipper = shipper_with(&store, true);
        assert!(!shipper.ensure_destination_exists(GROUP).await);
    }

    #[tokio::test]
    async fn test_provision_creates_group_and_stream() {
        let store = Arc::new(MemoryLogStore::new());
        let shipper = shipper_with(&store, true);

        shipper.provision().await.unwrap();

        assert!(store.has_group(GROUP));
        assert!(store.has_stream(GROUP, STREAM));
        assert_eq!(store.calls().create_log_group, 1);
        assert_eq!(store.calls().create_log_stream, 1);
    }

    #[tokio::test]
    async fn test_provision_keeps_existing_destination() {
        let store = Arc::new(MemoryLogStore::new().with_stream(GROUP, STREAM));
        let shipper = shipper_with(&store, true);

        shipper.provision().await.unwrap();

        assert_eq!(store.calls().create_log_group, 0);
        assert_eq!(store.calls().create_log_stream, 0);
    }

    #[tokio::test]
    async fn test_provision_surfaces_store_errors() {
        let store = Arc::new(MemoryLogStore::new());
        store.set_unavailable(true);
        let shipper = shipper_with(&store, true);

        let err = shipper.provision().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(!store.has_group(GROUP));
    }

    #[tokio::test]
    async fn test_create_stream_returns_existing_token() {
        let store = Arc::new(MemoryLogStore::new().with_stream(GROUP, STREAM));
        let shipper = shipper_with(&store, true);

        let token = shipper.create_stream(GROUP, STREAM).await.unwrap();
        assert!(token.is_some());
        assert_eq!(store.calls().create_log_stream, 0);
    }

    #[tokio::test]
    async fn test_create_stream_new_stream_has_no_token() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        let shipper = shipper_with(&store, true);

        let token = shipper.create_stream(GROUP, STREAM).await.unwrap();
        assert_eq!(token, None);
        assert!(store.has_stream(GROUP, STREAM));
    }

    #[tokio::test]
    async fn test_create_stream_lost_race_counts_as_created() {
        let store = Arc::new(MemoryLogStore::with_latency(Duration::from_millis(20)).with_group(GROUP));
        let first = shipper_with(&store, false);
        let second = shipper_with(&store, false);

        // both describe before either creates, so one create sees the stream
        let (a, b) = tokio::join!(
            first.create_stream(GROUP, STREAM),
            second.create_stream(GROUP, STREAM)
        );

        assert_eq!(a.unwrap(), None);
        assert_eq!(b.unwrap(), None);
        assert_eq!(store.calls().create_log_stream, 2);
        assert!(store.has_stream(GROUP, STREAM));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_append_empty_message_is_dropped_without_remote_calls() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        let shipper = shipper_with(&store, true);

        let outcome = shipper.append("").await;

        assert!(matches!(
            outcome,
            AppendOutcome::Dropped(ShipperError::EmptyMessage)
        ));
        assert_eq!(store.calls(), StoreCalls::default());
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("Log event dropped"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one drop event, got {n}")),
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn test_append_incomplete_destination_is_dropped_without_remote_calls() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        let shipper = LogShipper::new(
            Arc::clone(&store) as Arc<dyn LogStore>,
            Destination::new(GROUP, ""),
            true,
        );

        let outcome = shipper.append("hello").await;

        assert!(matches!(
            outcome,
            AppendOutcome::Dropped(ShipperError::IncompleteDestination)
        ));
        assert_eq!(store.calls().total(), 0);
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("Log event dropped"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one drop event, got {n}")),
            }
        });
    }

    #[tokio::test]
    async fn test_first_append_to_empty_stream() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        let shipper = shipper_with(&store, true);
        shipper.create_stream(GROUP, STREAM).await.unwrap();
        let before = store.calls();

        let outcome = shipper.append("hello").await;

        assert!(outcome.is_sent());
        let after = store.calls();
        assert_eq!(after.describe_log_streams - before.describe_log_streams, 1);
        assert_eq!(after.create_log_stream - before.create_log_stream, 0);
        assert_eq!(after.put_log_events - before.put_log_events, 1);
        assert_eq!(store.events(GROUP, STREAM)[0].message, "hello");
    }

    #[tokio::test]
    async fn test_append_creates_missing_stream_on_demand() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        let shipper = shipper_with(&store, true);

        let outcome = shipper.append("hello").await;

        assert!(outcome.is_sent());
        let calls = store.calls();
        assert_eq!(calls.create_log_stream, 1);
        assert_eq!(calls.describe_log_streams, 2);
        assert_eq!(calls.put_log_events, 1);
        assert_eq!(store.events(GROUP, STREAM).len(), 1);
    }

    #[tokio::test]
    async fn test_append_dropped_when_stream_cannot_be_created() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        store.set_drop_stream_creation(true);
        let shipper = shipper_with(&store, true);

        let outcome = shipper.append("hello").await;

        assert!(matches!(
            outcome,
            AppendOutcome::Dropped(ShipperError::StreamUnavailable { .. })
        ));
        assert_eq!(store.calls().put_log_events, 0);
    }

    #[tokio::test]
    async fn test_append_uses_existing_token() {
        let store = Arc::new(MemoryLogStore::new().with_stream(GROUP, STREAM));
        let shipper = shipper_with(&store, true);

        let first = shipper.append("one").await;
        let second = shipper.append("two").await;

        assert!(first.is_sent());
        assert!(second.is_sent());
        let messages: Vec<_> = store
            .events(GROUP, STREAM)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["seed", "one", "two"]);
    }

    #[tokio::test]
    async fn test_append_timestamp_is_current() {
        let store = Arc::new(MemoryLogStore::new().with_group(GROUP));
        let shipper = shipper_with(&store, true);

        let before = chrono::Utc::now().timestamp_millis();
        assert!(shipper.append("hello").await.is_sent());
        let after = chrono::Utc::now().timestamp_millis();

        let event = &store.events(GROUP, STREAM)[0];
        assert!(event.timestamp >= before && event.timestamp <= after);
    }

    #[tokio::test]
    async fn test_append_rejected_is_not_retried() {
        let store = Arc::new(MemoryLogStore::new().with_stream(GROUP, STREAM));
        let shipper = shipper_with(&store, true);
        store.set_unavailable(true);

        let outcome = shipper.append("hello").await;

        assert!(matches!(
            outcome,
            AppendOutcome::Dropped(ShipperError::Store(_))
        ));
        assert_eq!(store.calls().describe_log_streams, 1);
        assert_eq!(store.calls().put_log_events, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_serialized_appends_both_succeed() {
        let store = Arc::new(
            MemoryLogStore::with_latency(Duration::from_millis(10)).with_stream(GROUP, STREAM),
        );
        let shipper = Arc::new(shipper_with(&store, true));

        let a = tokio::spawn({
            let shipper = Arc::clone(&shipper);
            async move { shipper.append("a").await.is_sent() }
        });
        let b = tokio::spawn({
            let shipper = Arc::clone(&shipper);
            async move { shipper.append("b").await.is_sent() }
        });

        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
        let mut messages: Vec<_> = store
            .events(GROUP, STREAM)
            .into_iter()
            .map(|e| e.message)
            .collect();
        messages.sort();
        assert_eq!(messages, vec!["a", "b", "seed"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_racy_appends_never_duplicate() {
        let store = Arc::new(
            MemoryLogStore::with_latency(Duration::from_millis(10)).with_stream(GROUP, STREAM),
        );
        let shipper = Arc::new(shipper_with(&store, false));

        let a = tokio::spawn({
            let shipper = Arc::clone(&shipper);
            async move { shipper.append("a").await.is_sent() }
        });
        let b = tokio::spawn({
            let shipper = Arc::clone(&shipper);
            async move { shipper.append("b").await.is_sent() }
        });

        let sent = [a.await.unwrap(), b.await.unwrap()];
        assert!(sent.iter().any(|s| *s));

        let events = store.events(GROUP, STREAM);
        let sent_count = sent.iter().filter(|s| **s).count();
        // seed entry plus exactly the accepted ones
        assert_eq!(events.len(), 1 + sent_count);
        assert_eq!(events.iter().filter(|e| e.message == "a").count(), usize::from(sent[0]));
        assert_eq!(events.iter().filter(|e| e.message == "b").count(), usize::from(sent[1]));
    }
}

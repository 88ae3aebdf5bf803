// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identity of the remote destination: log group plus a per-process stream.

use std::env;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Where log entries are appended remotely.
///
/// Built once per pipeline and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    group: String,
    stream: String,
}

impl Destination {
    #[must_use]
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }

    /// Destination in `group` with a freshly generated stream name.
    #[must_use]
    pub fn for_device(group: impl Into<String>, device_id: &str) -> Self {
        Self::new(group, generate_stream_name(device_id))
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Both names are set. Appends to an incomplete destination are dropped.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.group.trim().is_empty() && !self.stream.trim().is_empty()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

/// Builds `{uuid}_{device}` so that concurrent instances never share a stream.
#[must_use]
pub fn generate_stream_name(device_id: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), normalize_device_id(device_id))
}

/// Replaces every whitespace run with `_`. Stream names cannot contain `:`
/// or `*` either, so those are replaced as well.
#[must_use]
pub fn normalize_device_id(device_id: &str) -> String {
    let normalized = device_id
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace([':', '*'], "_");
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

/// Resolves the device identifier used in stream names.
///
/// Order: explicit configuration, `HOSTNAME`, the kernel hostname, then
/// `"unknown"`.
#[must_use]
pub fn resolve_device_id(configured: Option<&str>) -> String {
    if let Some(device_id) = configured.filter(|id| !id.trim().is_empty()) {
        return device_id.to_string();
    }

    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.trim().is_empty() {
            return hostname;
        }
    }

    match std::fs::read_to_string("/proc/sys/kernel/hostname") {
        Ok(hostname) if !hostname.trim().is_empty() => return hostname.trim().to_string(),
        Ok(_) => {}
        Err(e) => warn!("Failed to read system hostname: {}", e),
    }

    warn!("Could not determine device identifier, using 'unknown'");
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_normalize_device_id() {
        assert_eq!(normalize_device_id("Google Pixel 7"), "Google_Pixel_7");
        assert_eq!(normalize_device_id("  samsung\tSM-G991B \n"), "samsung_SM-G991B");
        assert_eq!(normalize_device_id("host:1*2"), "host_1_2");
        assert_eq!(normalize_device_id("   "), "unknown");
    }

    #[test]
    fn test_stream_name_shape() {
        let name = generate_stream_name("Google Pixel 7");
        let (id, device) = name.split_at(36);
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(device, "_Google_Pixel_7");
    }

    #[test]
    fn test_stream_names_never_collide() {
        let names: HashSet<String> = (0..10_000)
            .map(|_| generate_stream_name("Pixel 7"))
            .collect();
        assert_eq!(names.len(), 10_000);
    }

    #[test]
    fn test_destination_completeness() {
        assert!(Destination::new("group", "stream").is_complete());
        assert!(!Destination::new("", "stream").is_complete());
        assert!(!Destination::new("group", " ").is_complete());
    }

    #[test]
    fn test_configured_device_id_wins() {
        assert_eq!(resolve_device_id(Some("Pixel 7")), "Pixel 7");
        assert!(!resolve_device_id(Some("  ")).is_empty());
    }

    proptest! {
        #[test]
        fn stream_name_has_no_whitespace(device in "\\PC{0,40}") {
            let name = generate_stream_name(&device);
            prop_assert!(!name.chars().any(char::is_whitespace));
            prop_assert!(name.len() > 37);
        }
    }
}

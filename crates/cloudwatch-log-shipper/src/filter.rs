// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Feedback-loop filter for captured lines.
//!
//! Lines emitted by the shipping pipeline itself would be captured again and
//! shipped again, forever. Any line containing one of the markers below is
//! dropped before it reaches the shipper.

use crate::logger::LOG_PREFIX;

/// Markers identifying lines produced by the pipeline's own components.
pub const DEFAULT_MARKERS: &[&str] = &[
    "AWS4Signer",
    "com.amazonaws",
    "CloudWatchLogger",
    LOG_PREFIX,
    "cloudwatch_log_shipper",
];

#[derive(Debug, Clone)]
pub struct MarkerFilter {
    markers: Vec<String>,
}

impl Default for MarkerFilter {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl MarkerFilter {
    /// The default markers plus `extra`. Empty markers are ignored since
    /// they would match every line.
    #[must_use]
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers = DEFAULT_MARKERS
            .iter()
            .map(|m| (*m).to_string())
            .chain(extra.into_iter().map(Into::into))
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    #[must_use]
    pub fn accepts(&self, line: &str) -> bool {
        !self.markers.iter().any(|marker| line.contains(marker.as_str()))
    }

    #[must_use]
    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the log shipping pipeline.
//!
//! Every operation returns one of these types. Callers decide whether an
//! error costs a single unit of work (logged and dropped) or the session.

use thiserror::Error;

/// Errors reported by a [`crate::store::LogStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The group or stream being created already exists.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// The group or stream addressed by the request does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The append carried a stale or missing sequence token.
    #[error("invalid sequence token, expected {expected:?}")]
    InvalidSequenceToken { expected: Option<String> },

    /// Any other error returned by the remote service.
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    /// Transport-level issue (DNS, TLS, socket, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request or response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request could not be signed or built.
    #[error("request error: {0}")]
    Request(String),
}

impl StoreError {
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

/// Operation-level errors of the shipper and the service around it.
#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("log shipping is disabled")]
    Disabled,

    #[error("pipeline is not initialized")]
    NotInitialized,

    #[error("pipeline is already initialized")]
    AlreadyInitialized,

    #[error("unsupported region: {0}")]
    InvalidRegion(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("log message is empty")]
    EmptyMessage,

    #[error("log group name or log stream name is not set")]
    IncompleteDestination,

    #[error("log stream {stream} could not be resolved in group {group}")]
    StreamUnavailable { group: String, stream: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ShipperError {
    /// Whether later operations may still succeed after this error.
    ///
    /// Fatal errors cost the whole session: nothing can be shipped until a
    /// later `initialize` succeeds. Recoverable ones only cost the unit of
    /// work that hit them.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            ShipperError::InvalidRegion(_)
            | ShipperError::InvalidCredentials(_)
            | ShipperError::AlreadyInitialized
            | ShipperError::Disabled => false,
            ShipperError::NotInitialized
            | ShipperError::EmptyMessage
            | ShipperError::IncompleteDestination
            | ShipperError::StreamUnavailable { .. }
            | ShipperError::Store(_) => true,
        }
    }
}

/// Errors raised while validating [`crate::config::ShipperConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("no async runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Errors that terminate the capture loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to spawn capture process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture process has no stdout pipe")]
    MissingStdout,

    #[error("failed to read captured line: {0}")]
    Read(#[from] std::io::Error),
}

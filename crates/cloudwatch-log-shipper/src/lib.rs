// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Device log shipping to CloudWatch Logs.
//!
//! The crate has two halves joined by [`service::LogPipeline`]:
//! - [`capture`]: runs a log-capture subprocess and drops self-referential
//!   lines through [`filter`]
//! - [`shipper`]: provisions a per-process stream and appends one entry per
//!   accepted line through a [`store::LogStore`]
//!
//! ```no_run
//! use cloudwatch_log_shipper::{config::ShipperConfig, service::LogPipeline};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = LogPipeline::new(ShipperConfig::from_env()?)?;
//! pipeline.initialize("AKID", "secret", "us-east-1");
//! let capture = pipeline.start_capture();
//! pipeline.log_message("application started");
//! # drop(capture);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod capture;
pub mod config;
pub mod destination;
pub mod error;
pub mod filter;
pub mod http;
pub mod logger;
pub mod service;
pub mod shipper;
pub mod store;

pub use config::ShipperConfig;
pub use destination::Destination;
pub use error::{CaptureError, ConfigError, ShipperError, StoreError};
pub use service::LogPipeline;
pub use shipper::{AppendOutcome, LogShipper};

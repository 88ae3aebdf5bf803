// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup for the shipper's own diagnostics.
//!
//! The shipper reports drops, provisioning and capture state through
//! `tracing`. The host installs a subscriber with [`init`], or its own
//! subscriber using [`Formatter`] and [`filter_directive`].
//!
//! # Format
//!
//! ```text
//! LOGSHIP | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! For example:
//!
//! ```text
//! LOGSHIP | INFO | Log group created: device-logs
//! LOGSHIP | WARN | Log stream does not exist, creating log stream 0b6b..._Pixel_7
//! LOGSHIP | ERROR | Log event dropped: pipeline is not initialized
//! ```
//!
//! # Feedback loop
//!
//! On a device these lines go to the same system log that
//! [`LogCapture`](crate::capture::LogCapture) reads. Each shipped line would
//! produce a new diagnostic line, which would be captured and shipped again.
//! [`LOG_PREFIX`] is one of the default markers of
//! [`MarkerFilter`](crate::filter::MarkerFilter), so every line written by
//! [`Formatter`] is dropped at capture time. Changing the prefix requires
//! changing the filter's markers with it.
//!
//! # Filtering
//!
//! [`filter_directive`] turns off the HTTP stack's own targets. Their request
//! logs would otherwise reach the capture loop without the prefix.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Prefix of every diagnostic line, also a default capture filter marker.
pub const LOG_PREFIX: &str = "LOGSHIP";

/// Event formatter writing `LOGSHIP | LEVEL | ...` lines.
///
/// Spans are written from the root, each as `name{fields}: `. Event fields
/// follow the message in the subscriber's field format. No timestamp is
/// written; the system log adds its own.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Builds the `EnvFilter` directive for `log_level`.
///
/// `h2`, `hyper`, `hyper_util`, `rustls` and `reqwest` are always off,
/// whatever the level.
#[must_use]
pub fn filter_directive(log_level: &str) -> String {
    format!("h2=off,hyper=off,hyper_util=off,rustls=off,reqwest=off,{log_level}")
}

/// Installs the global subscriber.
///
/// Returns an error when the level cannot be parsed or a global subscriber is
/// already set; the host decides whether that matters.
pub fn init(log_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(filter_directive(log_level))?)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!("Logging subsystem enabled");
    Ok(())
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client used by the CloudWatch Logs store.
//!
//! One client is built per session by
//! [`CloudWatchConnector`](crate::service::CloudWatchConnector) and shared by
//! every request of that session, so connections to the regional endpoint are
//! pooled across appends.
//!
//! # Client configuration
//!
//! - **TLS**: rustls only. The crate does not link a platform TLS stack.
//! - **Timeout**: `ShipperConfig::request_timeout` bounds each CloudWatch
//!   call. An append that times out is dropped like any transport error.
//! - **Proxy**: `ShipperConfig::https_proxy` (`CLOUDWATCH_PROXY_HTTPS`) is
//!   applied to HTTPS traffic only. Endpoint overrides using plain HTTP go
//!   direct.
//! - **Connection pooling**: idle connections are kept for 270 seconds with a
//!   120 second TCP keep-alive.
//!
//! # Proxy fallback
//!
//! A proxy URL that reqwest cannot parse never fails the session. The error
//! is logged and the client connects directly instead:
//!
//! ```text
//! LOGSHIP | ERROR | Unable to parse proxy configuration: <reason>, falling back to direct connection
//! ```

use core::time::Duration;
use std::error::Error;
use tracing::error;

/// Creates the client for one CloudWatch Logs session.
///
/// # Arguments
///
/// * `timeout` - Upper bound for a single request, including the body read
/// * `https_proxy` - Optional proxy URL for HTTPS requests
///
/// # Returns
///
/// A rustls client. When `https_proxy` is invalid the returned client has no
/// proxy. When even that build fails, reqwest's defaults are returned and the
/// per-request timeout is lost; both cases are logged at error level.
#[must_use]
pub fn get_client(timeout: Duration, https_proxy: Option<&str>) -> reqwest::Client {
    match build_client(timeout, https_proxy) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(timeout, None) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

/// Builds the client, failing on an unparseable proxy URL.
fn build_client(
    timeout: Duration,
    https_proxy: Option<&str>,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(https_uri) = https_proxy {
        let proxy = reqwest::Proxy::https(https_uri)?;
        client = client.proxy(proxy);
    }

    Ok(client.build()?)
}

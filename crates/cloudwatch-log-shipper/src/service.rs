// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline handed to the host application.
//!
//! [`LogPipeline`] owns the destination identity and, once initialized, one
//! [`LogShipper`] bound to the session's region and credentials. Every call
//! returns immediately; work happens on tasks spawned onto the runtime that
//! was current when the pipeline was built. Failures are logged and dropped,
//! nothing is surfaced to the host as an error.

use crate::capture::{CaptureHandle, CaptureSource, LineSink, LogCapture};
use crate::config::ShipperConfig;
use crate::destination::{resolve_device_id, Destination};
use crate::error::{ConfigError, ShipperError};
use crate::filter::MarkerFilter;
use crate::http::get_client;
use crate::shipper::{AppendOutcome, LogShipper};
use crate::store::{CloudWatchLogsClient, Credentials, LogStore};
use regex::Regex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Opens the remote store for a session.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        credentials: Credentials,
        region: &str,
    ) -> Result<Arc<dyn LogStore>, ShipperError>;
}

/// Connects to CloudWatch Logs over HTTPS.
#[derive(Debug, Clone)]
pub struct CloudWatchConnector {
    request_timeout: Duration,
    https_proxy: Option<String>,
    endpoint: Option<String>,
}

impl CloudWatchConnector {
    #[must_use]
    pub fn from_config(config: &ShipperConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            https_proxy: config.https_proxy.clone(),
            endpoint: config.endpoint.clone(),
        }
    }
}

impl Connector for CloudWatchConnector {
    fn connect(
        &self,
        credentials: Credentials,
        region: &str,
    ) -> Result<Arc<dyn LogStore>, ShipperError> {
        let client = get_client(self.request_timeout, self.https_proxy.as_deref());
        let store =
            CloudWatchLogsClient::new(client, credentials, region, self.endpoint.as_deref())?;
        debug!("Connected to {} in {}", store.endpoint(), store.region());
        Ok(Arc::new(store))
    }
}

/// Hands every session the same store, e.g. a
/// [`crate::store::MemoryLogStore`] for dry runs.
pub struct StoreConnector {
    store: Arc<dyn LogStore>,
}

impl StoreConnector {
    #[must_use]
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }
}

impl Connector for StoreConnector {
    fn connect(
        &self,
        _credentials: Credentials,
        _region: &str,
    ) -> Result<Arc<dyn LogStore>, ShipperError> {
        Ok(Arc::clone(&self.store))
    }
}

fn region_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z]{2}(-gov|-iso[a-z]?)?-[a-z]+-\d{1,2}$").ok())
        .as_ref()
}

/// Rejects anything that is not shaped like an AWS region name.
pub fn validate_region(region: &str) -> Result<(), ShipperError> {
    match region_pattern() {
        Some(pattern) if pattern.is_match(region) => Ok(()),
        _ => Err(ShipperError::InvalidRegion(region.to_string())),
    }
}

/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct LogPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: ShipperConfig,
    destination: Destination,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    init_claimed: AtomicBool,
    shipper: OnceLock<Arc<LogShipper>>,
    provisioned: OnceCell<()>,
}

impl fmt::Debug for LogPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogPipeline")
            .field("destination", &self.inner.destination)
            .field("enabled", &self.inner.config.enabled)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl LogPipeline {
    /// Pipeline shipping to CloudWatch Logs.
    ///
    /// Must be called from within a tokio runtime; that runtime runs every
    /// task the pipeline spawns later, whichever thread calls into it.
    pub fn new(config: ShipperConfig) -> Result<Self, ConfigError> {
        let connector = Arc::new(CloudWatchConnector::from_config(&config));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(
        config: ShipperConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = Handle::try_current()?;

        let device_id = resolve_device_id(config.device_id.as_deref());
        let destination = Destination::for_device(config.effective_log_group(), &device_id);
        debug!("Log destination: {destination}");

        Ok(Self {
            inner: Arc::new(PipelineInner {
                config,
                destination,
                connector,
                runtime,
                init_claimed: AtomicBool::new(false),
                shipper: OnceLock::new(),
                provisioned: OnceCell::new(),
            }),
        })
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    #[must_use]
    pub fn config(&self) -> &ShipperConfig {
        &self.inner.config
    }

    /// Whether a session exists. Provisioning may still be running.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.shipper.get().is_some()
    }

    /// Builds the session and provisions the destination in the background.
    ///
    /// The session is installed before this returns, so messages logged
    /// right after it wait for provisioning instead of being dropped. The
    /// returned handle completes once provisioning has run; hosts may ignore
    /// it. Only the first successful call has an effect. A malformed region
    /// or blank credentials leave the pipeline uninitialized, and a corrected
    /// call may follow.
    pub fn initialize(&self, access_key: &str, secret_key: &str, region: &str) -> JoinHandle<()> {
        let credentials = Credentials::new(access_key, secret_key);

        let shipper = match self.inner.install_session(credentials, region) {
            Ok(shipper) => shipper,
            Err(ShipperError::Disabled) => {
                info!("Log shipping is disabled, skipping initialization");
                return self.inner.runtime.spawn(async {});
            }
            Err(e @ ShipperError::AlreadyInitialized) => {
                warn!("Ignoring initialize call: {e}");
                return self.inner.runtime.spawn(async {});
            }
            Err(e) => {
                error!("Failed to initialize log shipping: {e}");
                return self.inner.runtime.spawn(async {});
            }
        };

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(
            async move {
                inner.ensure_provisioned(&shipper).await;
                info!("Log shipping initialized for {}", inner.destination);
            }
            .in_current_span(),
        )
    }

    /// [`Self::initialize`] with the region and keys held by the
    /// configuration. Missing keys count as blank credentials.
    pub fn initialize_from_config(&self) -> JoinHandle<()> {
        let config = &self.inner.config;
        self.initialize(
            config.access_key.as_deref().unwrap_or_default(),
            config.secret_key.as_deref().unwrap_or_default(),
            &config.region,
        )
    }

    /// Ships `message` as one entry in the background.
    ///
    /// Messages logged while provisioning runs wait for it to finish.
    /// Messages logged before `initialize` are dropped.
    pub fn log_message(&self, message: impl Into<String>) -> JoinHandle<AppendOutcome> {
        let message = message.into();
        let shipper = self.inner.shipper.get().cloned();
        let enabled = self.inner.config.enabled;
        let inner = Arc::clone(&self.inner);

        self.inner.runtime.spawn(
            async move {
                match shipper {
                    Some(shipper) => {
                        inner.ensure_provisioned(&shipper).await;
                        shipper.append(&message).await
                    }
                    None if !enabled => AppendOutcome::Dropped(ShipperError::Disabled),
                    None => {
                        error!("Log event dropped: {}", ShipperError::NotInitialized);
                        AppendOutcome::Dropped(ShipperError::NotInitialized)
                    }
                }
            }
            .in_current_span(),
        )
    }

    /// Starts the capture loop with this pipeline as its sink.
    ///
    /// Returns `None` when log shipping is disabled.
    #[must_use]
    pub fn start_capture(&self) -> Option<CaptureHandle> {
        let config = &self.inner.config;
        if !config.enabled {
            info!("Log shipping is disabled, not capturing");
            return None;
        }

        let filter = MarkerFilter::new(config.extra_filter_markers.iter().cloned());
        let source = CaptureSource::from_config(config);
        let _runtime = self.inner.runtime.enter();
        Some(LogCapture::new(filter).spawn(source, Arc::new(self.clone())))
    }
}

impl LineSink for LogPipeline {
    fn submit(&self, line: String) {
        // detached; the outcome is logged by the shipper
        drop(self.log_message(line));
    }
}

impl PipelineInner {
    /// Claims the pipeline and installs the session. No remote call is made.
    fn install_session(
        &self,
        credentials: Credentials,
        region: &str,
    ) -> Result<Arc<LogShipper>, ShipperError> {
        if !self.config.enabled {
            return Err(ShipperError::Disabled);
        }
        if self.init_claimed.swap(true, Ordering::AcqRel) {
            return Err(ShipperError::AlreadyInitialized);
        }

        let shipper = match self.connect(credentials, region) {
            Ok(shipper) => Arc::new(shipper),
            Err(e) => {
                self.init_claimed.store(false, Ordering::Release);
                return Err(e);
            }
        };

        if self.shipper.set(Arc::clone(&shipper)).is_err() {
            return Err(ShipperError::AlreadyInitialized);
        }
        Ok(shipper)
    }

    /// Runs provisioning once; concurrent callers wait for that single run.
    /// Failures are logged and still count as done.
    async fn ensure_provisioned(&self, shipper: &LogShipper) {
        self.provisioned
            .get_or_init(|| async {
                if let Err(e) = shipper.provision().await {
                    error!("Failed to provision {}: {e}", self.destination);
                }
            })
            .await;
    }

    fn connect(&self, credentials: Credentials, region: &str) -> Result<LogShipper, ShipperError> {
        validate_region(region)?;
        if credentials.is_blank() {
            return Err(ShipperError::InvalidCredentials(
                "access key and secret key must not be blank".to_string(),
            ));
        }

        let store = self.connector.connect(credentials, region)?;
        Ok(LogShipper::new(
            store,
            self.destination.clone(),
            self.config.serialize_appends,
        ))
    }
}

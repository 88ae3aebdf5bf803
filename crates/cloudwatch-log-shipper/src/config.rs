// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

pub const DEFAULT_LOG_GROUP_NAME: &str = "android-device-logs";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_CAPTURE_PROGRAM: &str = "logcat";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration surface owned by the host application.
///
/// The pipeline only reads it; it is built once and handed to
/// [`crate::service::LogPipeline::new`].
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Log group every entry is appended to
    pub log_group_name: String,
    /// Used when `log_group_name` is blank
    pub log_group_name_fallback: Option<String>,
    /// AWS region, e.g. `us-east-1`
    pub region: String,
    /// Credentials for [`crate::service::LogPipeline::initialize_from_config`]
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Master switch for the whole pipeline
    pub enabled: bool,
    /// Device identifier embedded in the stream name (hostname when unset)
    pub device_id: Option<String>,
    /// Overrides `https://logs.{region}.amazonaws.com`
    pub endpoint: Option<String>,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    pub request_timeout: Duration,
    /// Program producing the diagnostic log stream on stdout
    pub capture_program: String,
    pub capture_args: Vec<String>,
    /// Markers dropped in addition to the built-in self-referential ones
    pub extra_filter_markers: Vec<String>,
    /// Serialize describe-and-send per pipeline instead of racing on the token
    pub serialize_appends: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            log_group_name: DEFAULT_LOG_GROUP_NAME.to_string(),
            log_group_name_fallback: None,
            region: DEFAULT_REGION.to_string(),
            access_key: None,
            secret_key: None,
            enabled: true,
            device_id: None,
            endpoint: None,
            https_proxy: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            capture_program: DEFAULT_CAPTURE_PROGRAM.to_string(),
            capture_args: Vec::new(),
            extra_filter_markers: Vec::new(),
            serialize_appends: true,
            log_level: "info".to_string(),
        }
    }
}

impl ShipperConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_group_name =
            env::var("CLOUDWATCH_LOG_GROUP").unwrap_or(defaults.log_group_name);
        let log_group_name_fallback = non_empty_var("CLOUDWATCH_LOG_GROUP_FALLBACK");
        let region = env::var("CLOUDWATCH_REGION")
            .or_else(|_| env::var("AWS_REGION"))
            .unwrap_or(defaults.region);
        let access_key = non_empty_var("AWS_ACCESS_KEY_ID");
        let secret_key = non_empty_var("AWS_SECRET_ACCESS_KEY");
        let enabled = env::var("CLOUDWATCH_LOGS_ENABLED")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.enabled);
        let device_id = non_empty_var("CLOUDWATCH_DEVICE_ID");
        let endpoint = non_empty_var("CLOUDWATCH_ENDPOINT");
        let https_proxy = env::var("CLOUDWATCH_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let request_timeout = env::var("CLOUDWATCH_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        let capture_program =
            env::var("CLOUDWATCH_CAPTURE_PROGRAM").unwrap_or(defaults.capture_program);
        let capture_args = env::var("CLOUDWATCH_CAPTURE_ARGS")
            .map(|val| val.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let extra_filter_markers = env::var("CLOUDWATCH_FILTER_MARKERS")
            .map(|val| {
                val.split(',')
                    .map(str::trim)
                    .filter(|marker| !marker.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let serialize_appends = env::var("CLOUDWATCH_SERIALIZE_APPENDS")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.serialize_appends);
        let log_level = env::var("CLOUDWATCH_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            log_group_name,
            log_group_name_fallback,
            region,
            access_key,
            secret_key,
            enabled,
            device_id,
            endpoint,
            https_proxy,
            request_timeout,
            capture_program,
            capture_args,
            extra_filter_markers,
            serialize_appends,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.effective_log_group().is_empty() {
            return Err(ConfigError::Invalid(
                "log group name and its fallback cannot both be empty".to_string(),
            ));
        }

        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("region cannot be empty".to_string()));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than 0".to_string(),
            ));
        }

        if self.capture_program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "capture program cannot be empty".to_string(),
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "endpoint '{endpoint}' must start with http:// or https://"
                )));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Group name entries are written to: the primary name, or the fallback
    /// when the primary is blank. Empty when both are blank.
    #[must_use]
    pub fn effective_log_group(&self) -> String {
        let primary = self.log_group_name.trim();
        if !primary.is_empty() {
            return primary.to_string();
        }
        self.log_group_name_fallback
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ShipperConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.serialize_appends);
        assert_eq!(config.effective_log_group(), DEFAULT_LOG_GROUP_NAME);
    }

    #[test]
    fn test_fallback_group_used_when_primary_blank() {
        let config = ShipperConfig {
            log_group_name: "  ".to_string(),
            log_group_name_fallback: Some("fallback-group".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_log_group(), "fallback-group");
    }

    #[test]
    fn test_primary_group_wins_over_fallback() {
        let config = ShipperConfig {
            log_group_name: "primary".to_string(),
            log_group_name_fallback: Some("fallback-group".to_string()),
            ..Default::default()
        };
        assert_eq!(config.effective_log_group(), "primary");
    }

    #[test]
    fn test_validate_empty_group_names() {
        let config = ShipperConfig {
            log_group_name: "".to_string(),
            log_group_name_fallback: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_region() {
        let config = ShipperConfig {
            region: "   ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_endpoint_scheme() {
        let config = ShipperConfig {
            endpoint: Some("localhost:4566".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ShipperConfig {
            endpoint: Some("http://localhost:4566".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = ShipperConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        for level in valid_levels {
            let config = ShipperConfig {
                log_level: level.to_string(),
                ..Default::default()
            };
            assert!(
                config.validate().is_ok(),
                "Log level '{}' should be valid",
                level
            );
        }

        let config = ShipperConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch Logs over its JSON 1.1 protocol.
//!
//! Each operation is a signed `POST /` whose `X-Amz-Target` header names the
//! action. Error responses carry a `__type` discriminator that is mapped onto
//! [`StoreError`].

use crate::error::StoreError;
use crate::store::sigv4::{self, Credentials, SigningRequest};
use crate::store::{InputLogEvent, LogGroup, LogStore, LogStream};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

const SERVICE: &str = "logs";
const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.1";
/// Upper bound on pages followed when listing groups.
const MAX_DESCRIBE_PAGES: usize = 10;

/// Signed HTTP client for one region.
#[derive(Debug, Clone)]
pub struct CloudWatchLogsClient {
    client: reqwest::Client,
    endpoint: Url,
    /// `host[:port]` as sent in the `Host` header
    host: String,
    region: String,
    credentials: Credentials,
}

impl CloudWatchLogsClient {
    /// Client for `https://logs.{region}.amazonaws.com`, or `endpoint` when
    /// given (local emulators, tests).
    pub fn new(
        client: reqwest::Client,
        credentials: Credentials,
        region: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self, StoreError> {
        let region = region.into();
        let endpoint = match endpoint {
            Some(endpoint) => endpoint.to_string(),
            None => default_endpoint(&region),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| StoreError::Request(format!("invalid endpoint '{endpoint}': {e}")))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(StoreError::Request(format!(
                    "endpoint '{endpoint}' has no host"
                )))
            }
        };

        Ok(Self {
            client,
            endpoint,
            host,
            region,
            credentials,
        })
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, payload: &Value) -> Result<T, StoreError> {
        let body = serde_json::to_vec(payload)?;
        let target = format!("{TARGET_PREFIX}.{action}");

        let signed = sigv4::sign(&SigningRequest {
            credentials: &self.credentials,
            region: &self.region,
            service: SERVICE,
            host: &self.host,
            content_type: CONTENT_TYPE_JSON,
            target: &target,
            body: &body,
            time: chrono::Utc::now(),
        })
        .map_err(StoreError::Request)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        headers.insert("X-Amz-Target", header_value(&target)?);
        headers.insert("X-Amz-Date", header_value(&signed.amz_date)?);
        headers.insert(AUTHORIZATION, header_value(&signed.authorization)?);
        if let Some(token) = &signed.security_token {
            headers.insert("X-Amz-Security-Token", header_value(token)?);
        }

        trace!("CloudWatch Logs request {action}");
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            debug!("CloudWatch Logs {action} failed with status {status}");
            return Err(classify_error(status.as_u16(), &bytes));
        }

        if bytes.is_empty() {
            return Ok(serde_json::from_value(Value::Object(serde_json::Map::new()))?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[must_use]
pub fn default_endpoint(region: &str) -> String {
    if region.starts_with("cn-") {
        format!("https://logs.{region}.amazonaws.com.cn")
    } else {
        format!("https://logs.{region}.amazonaws.com")
    }
}

fn header_value(value: &str) -> Result<HeaderValue, StoreError> {
    HeaderValue::from_str(value)
        .map_err(|e| StoreError::Request(format!("invalid header value: {e}")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsResponse {
    #[serde(default)]
    log_groups: Vec<LogGroup>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStream>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    #[serde(default)]
    next_sequence_token: Option<String>,
    #[serde(default)]
    rejected_log_events_info: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct EmptyResponse {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [InputLogEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
    #[serde(rename = "expectedSequenceToken", default)]
    expected_sequence_token: Option<String>,
}

/// Maps an error response onto the store taxonomy.
fn classify_error(status: u16, body: &[u8]) -> StoreError {
    let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) else {
        return StoreError::Api {
            code: format!("HTTP {status}"),
            message: String::from_utf8_lossy(body).into_owned(),
        };
    };

    // `__type` is either `Code` or `namespace#Code`
    let code = parsed
        .error_type
        .as_deref()
        .and_then(|t| t.rsplit('#').next())
        .unwrap_or_default()
        .to_string();
    let message = parsed.message.unwrap_or_default();

    match code.as_str() {
        "ResourceAlreadyExistsException" => StoreError::AlreadyExists(message),
        "ResourceNotFoundException" => StoreError::ResourceNotFound(message),
        "InvalidSequenceTokenException" | "DataAlreadyAcceptedException" => {
            StoreError::InvalidSequenceToken {
                expected: parsed.expected_sequence_token,
            }
        }
        "" => StoreError::Api {
            code: format!("HTTP {status}"),
            message,
        },
        _ => StoreError::Api { code, message },
    }
}

#[async_trait]
impl LogStore for CloudWatchLogsClient {
    async fn describe_log_groups(&self, prefix: Option<&str>) -> Result<Vec<LogGroup>, StoreError> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_DESCRIBE_PAGES {
            let mut payload = serde_json::Map::new();
            if let Some(prefix) = prefix {
                payload.insert("logGroupNamePrefix".to_string(), json!(prefix));
            }
            if let Some(token) = &next_token {
                payload.insert("nextToken".to_string(), json!(token));
            }

            let page: DescribeLogGroupsResponse = self
                .call("DescribeLogGroups", &Value::Object(payload))
                .await?;
            groups.extend(page.log_groups);

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(groups)
    }

    async fn create_log_group(&self, name: &str) -> Result<(), StoreError> {
        let _: EmptyResponse = self
            .call("CreateLogGroup", &json!({ "logGroupName": name }))
            .await?;
        Ok(())
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), StoreError> {
        let _: EmptyResponse = self
            .call(
                "CreateLogStream",
                &json!({ "logGroupName": group, "logStreamName": stream }),
            )
            .await?;
        Ok(())
    }

    async fn describe_log_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<LogStream>, StoreError> {
        let response: DescribeLogStreamsResponse = self
            .call(
                "DescribeLogStreams",
                &json!({ "logGroupName": group, "logStreamNamePrefix": prefix }),
            )
            .await?;
        Ok(response.log_streams)
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: Vec<InputLogEvent>,
        sequence_token: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        let request = PutLogEventsRequest {
            log_group_name: group,
            log_stream_name: stream,
            log_events: &events,
            sequence_token: sequence_token.as_deref(),
        };
        let response: PutLogEventsResponse = self
            .call("PutLogEvents", &serde_json::to_value(&request)?)
            .await?;

        if let Some(rejected) = response.rejected_log_events_info {
            debug!("CloudWatch Logs rejected part of the batch: {rejected}");
        }
        Ok(response.next_sequence_token)
    }
}

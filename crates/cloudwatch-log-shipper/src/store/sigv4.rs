// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS Signature Version 4 for JSON-protocol POST requests.
//!
//! Only what the CloudWatch Logs client needs: `POST /` with an empty query
//! string and the `content-type`, `host`, `x-amz-date`, `x-amz-target`
//! (and optionally `x-amz-security-token`) headers signed.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// Static AWS credentials supplied by the host application.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    #[must_use]
    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.access_key_id.trim().is_empty() || self.secret_access_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .finish()
    }
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub security_token: Option<String>,
}

/// Everything that goes into one signature.
pub struct SigningRequest<'a> {
    pub credentials: &'a Credentials,
    pub region: &'a str,
    pub service: &'a str,
    /// `host[:port]` exactly as sent in the `Host` header
    pub host: &'a str,
    pub content_type: &'a str,
    pub target: &'a str,
    pub body: &'a [u8],
    pub time: DateTime<Utc>,
}

/// Signs a `POST /` request.
pub fn sign(request: &SigningRequest<'_>) -> Result<SignedHeaders, String> {
    let amz_date = request.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = request.time.format("%Y%m%d").to_string();
    let security_token = request.credentials.session_token.clone();

    let mut headers = vec![
        ("content-type", request.content_type.trim()),
        ("host", request.host.trim()),
        ("x-amz-date", amz_date.as_str()),
    ];
    if let Some(token) = &security_token {
        headers.push(("x-amz-security-token", token.trim()));
    }
    headers.push(("x-amz-target", request.target.trim()));

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "POST\n/\n\n{canonical_headers}\n{signed_headers}\n{}",
        sha256_hex(request.body)
    );

    let scope = format!(
        "{date_stamp}/{}/{}/aws4_request",
        request.region, request.service
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &request.credentials.secret_access_key,
        &date_stamp,
        request.region,
        request.service,
    )?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    Ok(SignedHeaders {
        authorization: format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            request.credentials.access_key_id
        ),
        amz_date,
        security_token,
    })
}

pub(crate) fn derive_signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, String> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, String> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| e.to_string())?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_credentials() -> Credentials {
        Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
        )
    }

    #[test]
    fn test_signing_key_matches_documented_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sha256_of_empty_body() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_authorization_header_layout() {
        let credentials = example_credentials();
        let signed = sign(&SigningRequest {
            credentials: &credentials,
            region: "us-east-1",
            service: "logs",
            host: "logs.us-east-1.amazonaws.com",
            content_type: "application/x-amz-json-1.1",
            target: "Logs_20140328.CreateLogGroup",
            body: br#"{"logGroupName":"g"}"#,
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        })
        .unwrap();

        assert_eq!(signed.amz_date, "20240501T123000Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/us-east-1/logs/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date;x-amz-target, Signature="
        ));
        let signature = signed.authorization.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signed.security_token.is_none());
    }

    #[test]
    fn test_session_token_is_signed() {
        let credentials = example_credentials().with_session_token("session");
        let signed = sign(&SigningRequest {
            credentials: &credentials,
            region: "eu-west-1",
            service: "logs",
            host: "logs.eu-west-1.amazonaws.com",
            content_type: "application/x-amz-json-1.1",
            target: "Logs_20140328.PutLogEvents",
            body: b"{}",
            time: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        })
        .unwrap();

        assert!(signed
            .authorization
            .contains("SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target"));
        assert_eq!(signed.security_token.as_deref(), Some("session"));
    }

    #[test]
    fn test_signature_depends_on_body() {
        let credentials = example_credentials();
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let request = |body: &'static [u8]| SigningRequest {
            credentials: &credentials,
            region: "us-east-1",
            service: "logs",
            host: "localhost:4566",
            content_type: "application/x-amz-json-1.1",
            target: "Logs_20140328.PutLogEvents",
            body,
            time,
        };
        let first = sign(&request(b"{\"a\":1}")).unwrap();
        let second = sign(&request(b"{\"a\":2}")).unwrap();
        assert_ne!(first.authorization, second.authorization);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", example_credentials().with_session_token("tok"));
        assert!(debug.contains("AKIDEXAMPLE"));
        assert!(!debug.contains("EXAMPLEKEY"));
        assert!(!debug.contains("tok\""));
    }
}

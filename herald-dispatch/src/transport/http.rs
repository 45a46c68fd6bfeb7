//! JSON-over-HTTP broker transport

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use herald_common::{InstanceId, outgoing};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OutboundPayload, SendOptions, Transport, TransportReceipt};
use crate::error::TransportError;

const REQUEST_ID_HEADER: &str = "x-request-id";
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Broker API root, e.g. `https://broker.internal/v1`
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Name recorded as the provider in broker diagnostics
    #[serde(default = "default_provider")]
    pub provider: String,
}

const fn default_timeout_ms() -> u64 {
    10_000
}

fn default_provider() -> String {
    "broker".to_string()
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            timeout_ms: default_timeout_ms(),
            provider: default_provider(),
        }
    }
}

/// Successful send response
#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Error body; brokers disagree on where they put the message
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// # Errors
    ///
    /// [`TransportError::Other`] when the HTTP client cannot be built.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub const fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    /// `<base_url>/instances/<instance_id>/messages`, the id percent-encoded
    /// as a single path segment
    fn url(&self, instance_id: &InstanceId) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| {
            TransportError::Other(format!("invalid broker URL {}: {e}", self.config.base_url))
        })?;

        url.path_segments_mut()
            .map_err(|()| {
                TransportError::Other(format!(
                    "broker URL {} cannot take a path",
                    self.config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["instances", instance_id.as_str(), "messages"]);

        Ok(url)
    }
}

/// Broker timestamps come as RFC 3339 strings or epoch seconds/millis
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(number) => {
            let n = number.as_i64()?;
            if n.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(n).single()
            } else {
                Utc.timestamp_opt(n, 0).single()
            }
        }
        _ => None,
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(format!("HTTP request failed: {err}"))
    }
}

fn rejection(status: StatusCode, body: &str, request_id: Option<String>) -> TransportError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.to_string()
            }
        });

    match parsed.code {
        Some(code) if !code.trim().is_empty() => TransportError::Broker {
            code,
            message,
            status: Some(status.as_u16()),
            request_id,
        },
        _ => TransportError::Http {
            status: status.as_u16(),
            message,
            request_id,
        },
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    async fn send_message(
        &self,
        instance_id: &InstanceId,
        payload: &OutboundPayload,
        options: &SendOptions,
    ) -> Result<TransportReceipt, TransportError> {
        let url = self.url(instance_id)?;
        let mut request = self.client.post(url).json(payload);

        if let Some(key) = &options.idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| classify(&e))?;

        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| classify(&e))?;

        outgoing!(
            level = DEBUG,
            instance = %instance_id,
            status = %status,
            request_id = request_id.as_deref().unwrap_or(""),
            "Broker responded"
        );

        if !status.is_success() {
            return Err(rejection(status, &body, request_id));
        }

        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| TransportError::Other(format!("failed to parse broker response: {e}")))?;
        let parsed: SendResponse = serde_json::from_value(raw.clone())
            .map_err(|e| TransportError::Other(format!("unexpected broker response: {e}")))?;

        Ok(TransportReceipt {
            external_id: parsed.id,
            status: parsed.status.unwrap_or_else(|| "SENT".to_string()),
            timestamp: parsed.timestamp.as_ref().and_then(parse_timestamp),
            raw: Some(raw),
        })
    }
}

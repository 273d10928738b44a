//! Client for the external prediction service.

use std::time::Duration;

use async_trait::async_trait;
use fpr_core::{ForecastRequest, ForecastResult, ForecastShapeError};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ForecastRequestError {
    #[error("forecast request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("forecast service returned http {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("malformed forecast payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("malformed forecast payload: {0}")]
    Shape(#[from] ForecastShapeError),
}

#[async_trait]
pub trait ForecastClient: Send + Sync {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResult, ForecastRequestError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpForecastClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpForecastClient {
    pub fn new(endpoint: impl Into<String>, config: HttpClientConfig) -> Result<Self, ForecastRequestError> {
        let mut builder = reqwest::Client::builder().gzip(true).timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ForecastClient for HttpForecastClient {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResult, ForecastRequestError> {
        debug!(
            provider_code = %request.provider_code,
            fruit = %request.fruit_name,
            endpoint = %self.endpoint,
            "requesting forecast"
        );
        let resp = self.client.post(&self.endpoint).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ForecastRequestError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let raw = resp.text().await?;
        parse_forecast_body(&raw)
    }
}

/// Parses a raw response body from the prediction service.
///
/// The service emits `NaN` for missing values and sometimes wraps the whole
/// document in a JSON string, so the body is unwrapped and normalized before
/// it is deserialized.
pub fn parse_forecast_body(raw: &str) -> Result<ForecastResult, ForecastRequestError> {
    let trimmed = raw.trim();
    let unwrapped;
    let document = if trimmed.starts_with('"') {
        unwrapped = match serde_json::from_str::<JsonValue>(trimmed)? {
            JsonValue::String(inner) => inner,
            other => other.to_string(),
        };
        unwrapped.as_str()
    } else {
        trimmed
    };

    let normalized = normalize_nan_tokens(document);
    let result: ForecastResult = serde_json::from_str(&normalized)?;
    result.check_shape()?;
    Ok(result)
}

/// Replaces bare `NaN` tokens (optionally signed) outside string literals with `null`.
pub fn normalize_nan_tokens(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    let mut copied_to = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }

        let sign = usize::from(b == b'-' || b == b'+');
        if bytes[i + sign..].starts_with(b"NaN") && is_token_boundary(bytes, i, i + sign + 3) {
            out.push_str(&raw[copied_to..i]);
            out.push_str("null");
            i += sign + 3;
            copied_to = i;
            continue;
        }
        i += 1;
    }

    out.push_str(&raw[copied_to..]);
    out
}

fn is_token_boundary(bytes: &[u8], start: usize, end: usize) -> bool {
    let before_ok = start == 0 || !is_ident_byte(bytes[start - 1]);
    let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
    before_ok && after_ok
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

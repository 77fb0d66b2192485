//! Mapping of transport failures onto the shared provider error taxonomy.

use coinlens_core::error::ProviderError;
use serde::Deserialize;

/// Errors raised while setting up a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid header value for {0}")]
    InvalidHeader(String),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Common shapes of upstream error bodies
#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn describe(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<UpstreamErrorBody>(body)
        .ok()
        .and_then(|b| {
            b.msg.or(b.message).or_else(|| {
                b.error.map(|e| match e {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            })
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    if detail.is_empty() {
        format!("status {}", status)
    } else {
        format!("status {}: {}", status, detail)
    }
}

/// Classify a non-success HTTP status.
pub fn from_status(status: u16, body: &str) -> ProviderError {
    let message = describe(status, body);
    match status {
        429 => ProviderError::RateLimited(message),
        400 | 404 => ProviderError::NotFound(message),
        _ => ProviderError::UpstreamUnavailable(message),
    }
}

/// Classify a request that never produced a response.
pub fn from_reqwest(error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::UpstreamUnavailable(format!("request timed out: {}", error))
    } else if error.is_decode() {
        ProviderError::InvalidResponse(error.to_string())
    } else {
        ProviderError::UpstreamUnavailable(error.to_string())
    }
}

//! HTTP transport shared by the upstream clients.

use crate::config::ClientConfig;
use crate::error::{from_reqwest, from_status, ClientError};
use coinlens_core::error::{ProviderError, ProviderResult};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One failed attempt and whether another is worth making.
struct AttemptFailure {
    error: ProviderError,
    retryable: bool,
    retry_after: Option<Duration>,
}

/// HTTP transport for GET-only JSON APIs.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, ClientError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        if let Some(ref api_key) = config.api_key {
            let name = header::HeaderName::from_bytes(config.api_key_header.as_bytes())
                .map_err(|_| ClientError::InvalidHeader(config.api_key_header.clone()))?;
            let value = header::HeaderValue::from_str(api_key)
                .map_err(|_| ClientError::InvalidHeader(config.api_key_header.clone()))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    /// Build a URL for a path relative to the base URL.
    fn build_url(&self, path: &str) -> ProviderResult<url::Url> {
        self.config
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ProviderError::UpstreamUnavailable(format!("invalid request path '{}': {}", path, e)))
    }

    /// Execute a request with retries, returning the success body.
    async fn execute_with_retry(&self, request_builder: RequestBuilder) -> ProviderResult<String> {
        let retry_config = &self.config.retry_config;
        let mut attempt = 1;

        loop {
            let request = request_builder.try_clone().ok_or_else(|| {
                ProviderError::UpstreamUnavailable("request cannot be cloned".to_string())
            })?;

            let failure = match request.send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(body) => return Ok(body),
                    Err(e) => AttemptFailure {
                        error: from_reqwest(&e),
                        retryable: e.is_timeout(),
                        retry_after: None,
                    },
                },
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = retry_after(&response);
                    let body = response.text().await.unwrap_or_default();
                    AttemptFailure {
                        error: from_status(status, &body),
                        retryable: retry_config.should_retry_status(status),
                        retry_after,
                    }
                }
                Err(e) => AttemptFailure {
                    error: from_reqwest(&e),
                    retryable: e.is_timeout() || e.is_connect() || e.is_request(),
                    retry_after: None,
                },
            };

            if !failure.retryable || attempt >= retry_config.max_attempts {
                if failure.retryable {
                    warn!(attempts = attempt, error = %failure.error, "Giving up on upstream request");
                }
                return Err(failure.error);
            }

            let backoff = failure
                .retry_after
                .unwrap_or_else(|| retry_config.backoff_for_attempt(attempt - 1))
                .min(retry_config.max_backoff);
            warn!(
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure.error,
                "Upstream request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Execute a GET request and decode the JSON body.
    pub async fn get_json<T, Q>(&self, path: &str, query: &Q) -> ProviderResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.build_url(path)?;
        debug!(url = %url, "GET request");

        let body = self
            .execute_with_retry(self.client.get(url).query(query))
            .await?;

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", path, e)))
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

//! Shared HTTP transport for the backend adapters.
//!
//! [`HttpTransport`] wraps a `reqwest::Client` with the backend's auth
//! headers and base URL. `post_json` covers non-streaming calls and
//! `open_sse` establishes an SSE stream, both going through the same
//! [`RetryPolicy`] and error mapping.

use crate::llm::error::{BackendError, retry_after};
use crate::llm::retry::RetryPolicy;
use crate::llm::sse::{SseEvent, decode_events};
use futures::Stream;
use reqwest::{
    Client, Response,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    headers: HeaderMap,
    base_url: String,
    timeout: Duration,
    idle_timeout: Duration,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Transport authenticating with `Authorization: Bearer <key>`.
    pub fn bearer(key: &str, base_url: &str) -> Result<Self, BackendError> {
        Self::with_headers(&[("authorization", &format!("Bearer {key}"))], base_url)
    }

    /// Transport authenticating with custom headers (`x-api-key`,
    /// `x-goog-api-key`, version pins).
    pub fn with_headers(pairs: &[(&str, &str)], base_url: &str) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (name, value) in pairs {
            let name = name
                .parse::<HeaderName>()
                .map_err(|e| BackendError::Config(format!("Invalid header name: {e}")))?;
            let value = value
                .parse::<HeaderValue>()
                .map_err(|e| BackendError::Config(format!("Invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client: Client::new(),
            headers,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_timeouts(mut self, timeout: Duration, idle_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and decode a JSON response, retrying transient
    /// failures.
    pub async fn post_json<T>(&self, path: &str, body: &Value) -> Result<T, BackendError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = self.url(path);
        tracing::trace!("request to {}: {}", url, body);

        self.retry
            .run(|| {
                let request = self
                    .client
                    .post(&url)
                    .headers(self.headers.clone())
                    .timeout(self.timeout)
                    .json(body);
                Box::pin(async move {
                    let response = request.send().await?;
                    let response = check_status(response).await?;
                    let text = response.text().await?;
                    tracing::trace!("response: {}", text);
                    Ok::<T, BackendError>(serde_json::from_str::<T>(&text)?)
                })
            })
            .await
    }

    /// POST a JSON body and open an SSE stream on the response.
    ///
    /// Establishment is retried like `post_json`. Once the stream is open,
    /// failures surface as stream items and are never retried.
    pub async fn open_sse(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<impl Stream<Item = Result<SseEvent, BackendError>> + Send + use<>, BackendError>
    {
        let url = self.url(path);
        tracing::trace!("stream request to {}: {}", url, body);
        let timeout = self.timeout;

        let response = self
            .retry
            .run(|| {
                let request = self
                    .client
                    .post(&url)
                    .headers(self.headers.clone())
                    .header(header::ACCEPT, "text/event-stream")
                    .json(body);
                Box::pin(async move {
                    let response = tokio::time::timeout(timeout, request.send())
                        .await
                        .map_err(|_| {
                            BackendError::Timeout(format!(
                                "stream not established within {}s",
                                timeout.as_secs()
                            ))
                        })??;
                    check_status(response).await
                })
            })
            .await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("text/event-stream") {
            return Err(BackendError::Stream(format!(
                "expected an event stream, got content type '{}'",
                content_type
            )));
        }

        tracing::debug!("Stream established with status {}", response.status());
        Ok(decode_events(response.bytes_stream(), self.idle_timeout))
    }
}

/// Pass successful responses through; map error statuses and bodies.
async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let wait = retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    let (message, hint) = parse_error_body(&text);
    tracing::debug!("Backend returned HTTP {}: {}", status.as_u16(), message);
    Err(BackendError::from_status(
        status,
        message,
        hint.as_deref(),
        wait,
    ))
}

/// Extract the message and error type from a backend error body.
///
/// All three backends nest the details under `error`, naming the category
/// `type` (OpenAI, Anthropic), `status` (Gemini) or `code`.
pub fn parse_error_body(text: &str) -> (String, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        let message = if text.trim().is_empty() {
            "empty error body".to_string()
        } else {
            text.trim().to_string()
        };
        return (message, None);
    };

    let error = value.get("error").unwrap_or(&value);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| text.trim().to_string());
    let hint = ["type", "status", "code"]
        .iter()
        .filter_map(|key| error.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty() && *s != "error")
        .map(str::to_string);

    (message, hint)
}

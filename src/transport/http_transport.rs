use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::GatewayError;
use crate::protocol::upstream::UpstreamRequest;

const MAX_ERROR_MESSAGE_LEN: usize = 500;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    timeout: Duration,
) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

fn build_upstream_headers(upstream: &UpstreamConfig) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::with_capacity(upstream.headers.len() + 1);
    for (name, value) in &upstream.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| GatewayError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| GatewayError::Config(format!("invalid value for '{name}': {err}")))?;
        headers.insert(name, value);
    }
    headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// HTTP client for the tag-streaming chat upstream.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: url::Url,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Build the pooled client and the static request parts from config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an unparsable URL or header and
    /// [`GatewayError::Transport`] when the client cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, GatewayError> {
        let url = url::Url::parse(upstream.url.trim())
            .map_err(|err| GatewayError::Config(format!("invalid upstream url: {err}")))?;
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            Duration::from_secs(server.timeout),
        )?;
        Ok(Self {
            client,
            url,
            headers: build_upstream_headers(upstream)?,
        })
    }

    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// POST one chat request. The caller reads the body as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the request cannot be sent and
    /// [`GatewayError::Upstream`] for a non-success status, carrying the
    /// upstream's sanitized error message.
    pub async fn send_chat(
        &self,
        request: &UpstreamRequest,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| GatewayError::Internal(format!("failed to encode upstream request: {err}")))?;

        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let message = sanitize_upstream_error(&body);
        tracing::warn!(status = status.as_u16(), error = %message, "upstream returned error status");
        Err(GatewayError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

/// Reduce an upstream error body to a short message.
///
/// Prefers `error.message` from a JSON body, then `message`, then the raw
/// body as lossy UTF-8; the result is capped at 500 characters.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message"))
            .or_else(|| json.get("message"))
            .and_then(|m| m.as_str());
        if let Some(msg) = message {
            return truncate_message(msg);
        }
    }
    truncate_message(String::from_utf8_lossy(body).trim())
}

fn truncate_message(msg: &str) -> String {
    match msg.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((cut, _)) => format!("{}...", &msg[..cut]),
        None => msg.to_string(),
    }
}

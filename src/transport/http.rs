use crate::transport::TransportError;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// How the API key is attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key in a named header (e.g. `x-api-key`).
    Header(&'static str),
    /// Key in a named query parameter (e.g. `?key=`).
    Query(&'static str),
}

/// Provider-specific HTTP request produced by a driver.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Path appended to the provider base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
    pub stream: bool,
    pub auth: AuthStyle,
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    extra_headers: Vec<(String, String)>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpTransport {
    /// Build a transport for one provider.
    ///
    /// No overall request timeout is set here: streams are long-lived and the orchestrator
    /// applies its own per-attempt timeout.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Self> {
        Url::parse(base_url).map_err(TransportError::Url)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            extra_headers,
        })
    }

    fn header_first(headers: &HeaderMap, names: &[&str]) -> Option<String> {
        for name in names {
            if let Some(v) = headers.get(*name) {
                if let Ok(s) = v.to_str() {
                    let s = s.trim();
                    if !s.is_empty() {
                        return Some(s.to_string());
                    }
                }
            }
        }
        None
    }

    /// Best-effort parsing of `Retry-After` (seconds form) and `retry-after-ms`.
    fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
        if let Some(ms) = Self::header_first(headers, &["retry-after-ms"]) {
            if let Ok(ms) = ms.parse::<f64>() {
                return Some(ms.max(0.0) as u64);
            }
        }
        let raw = Self::header_first(headers, &["retry-after"])?;
        let secs: f64 = raw.parse().ok()?;
        Some((secs.max(0.0) * 1000.0) as u64)
    }

    /// Structured provider error code, if the body has one.
    ///
    /// Covers the OpenAI (`error.code`), Anthropic (`error.type`) and Gemini
    /// (`error.status`) shapes.
    pub(crate) fn error_code_from_body(body: &str) -> Option<String> {
        let json: serde_json::Value = serde_json::from_str(body).ok()?;
        let err = json.get("error")?;
        ["code", "type", "status"]
            .iter()
            .find_map(|k| err.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)
    }

    async fn send(&self, wire: &WireRequest) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, wire.path);
        let client_request_id = Uuid::new_v4().to_string();

        let mut req = self
            .client
            .post(&url)
            .json(&wire.body)
            .header("x-request-id", client_request_id.as_str());
        if !wire.query.is_empty() {
            req = req.query(&wire.query);
        }
        if let Some(key) = &self.api_key {
            req = match &wire.auth {
                AuthStyle::Bearer => req.bearer_auth(key),
                AuthStyle::Header(name) => req.header(*name, key),
                AuthStyle::Query(name) => req.query(&[(*name, key.as_str())]),
            };
        }
        for (k, v) in self.extra_headers.iter().chain(wire.headers.iter()) {
            req = req.header(k.as_str(), v.as_str());
        }
        if wire.stream {
            req = req.header("accept", "text/event-stream");
        }

        let start = std::time::Instant::now();
        let resp = req.send().await.map_err(map_reqwest)?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let headers = resp.headers().clone();
            let retry_after_ms = Self::retry_after_ms(&headers);
            let body = resp.text().await.unwrap_or_default();
            let provider_code = Self::error_code_from_body(&body);
            info!(
                http_status = status,
                provider_code = provider_code.as_deref().unwrap_or(""),
                request_id = client_request_id.as_str(),
                path = wire.path.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "provider request failed"
            );
            return Err(Error::Remote {
                status,
                message: body,
                provider_code,
                retry_after_ms,
            });
        }

        let upstream_id =
            Self::header_first(resp.headers(), &["x-request-id", "request-id", "cf-ray"])
                .unwrap_or_default();
        debug!(
            http_status = status,
            request_id = client_request_id.as_str(),
            upstream_id = upstream_id.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "provider request accepted"
        );
        Ok(resp)
    }

    /// Send and decode a complete JSON response.
    pub async fn post_json(&self, wire: &WireRequest) -> Result<serde_json::Value> {
        let resp = self.send(wire).await?;
        resp.json().await.map_err(map_reqwest)
    }

    /// Send and return the raw byte stream of a streaming response.
    pub async fn post_stream(&self, wire: &WireRequest) -> Result<BoxStream<'static, Bytes>> {
        let resp = self.send(wire).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(map_reqwest)))
    }
}

fn map_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout { after_ms: 0 }
    } else {
        Error::Transport(TransportError::Http(e))
    }
}

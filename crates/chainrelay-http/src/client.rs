//! HTTP JSON-RPC endpoint connection backed by `reqwest`.
//!
//! One `HttpRpcClient` per configured endpoint. Each `send` is a single
//! attempt: retrying and falling back are the fallback chain's job, so a
//! slow endpoint costs one timeout and no more.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use chainrelay_core::error::TransportError;
use chainrelay_core::meter::UsageMeter;
use chainrelay_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainrelay_core::transport::RpcTransport;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
    /// Response header name prefixes reported to the usage meter.
    pub header_prefixes: Vec<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            header_prefixes: vec!["x-ratelimit-".into(), "x-compute-units".into()],
        }
    }
}

/// A single HTTP JSON-RPC endpoint.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    header_prefixes: Vec<String>,
    meter: Option<Arc<UsageMeter>>,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            request_timeout: config.request_timeout,
            header_prefixes: config
                .header_prefixes
                .into_iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            meter: None,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    /// Report provider cost headers to `meter`.
    pub fn with_meter(mut self, meter: Arc<UsageMeter>) -> Self {
        self.meter = Some(meter);
        self
    }

    async fn post<B, R>(&self, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if let Some(meter) = &self.meter {
            meter.observe_provider_headers(
                &self.url,
                matching_headers(resp.headers(), &self.header_prefixes),
            );
        }

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited {
                provider: self.url.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!(
                "HTTP {}: {body}",
                status.as_u16()
            )));
        }

        resp.json::<R>().await.map_err(|e| self.map_reqwest(e))
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::trace!(url = %self.url, method = %req.method, "POST");
        self.post(&req).await
    }

    /// True HTTP batch: send all requests as a JSON array in one HTTP call.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        tracing::trace!(url = %self.url, size = reqs.len(), "POST batch");
        let mut resps: Vec<JsonRpcResponse> = self.post(&reqs).await?;
        // Servers may answer a batch in any order.
        resps.sort_by_key(|r| {
            reqs.iter()
                .position(|q| q.id == r.id)
                .unwrap_or(usize::MAX)
        });
        Ok(resps)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Headers whose (lowercase) name starts with any of `prefixes`.
pub fn matching_headers(headers: &HeaderMap, prefixes: &[String]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| prefixes.iter().any(|p| name.as_str().starts_with(p.as_str())))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

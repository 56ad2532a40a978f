//! Ordered multi-endpoint fallback.
//!
//! Endpoints are tried strictly in configured order, one attempt each, with
//! an independent timeout per attempt. A transient failure moves on to the
//! next endpoint immediately; a fatal one is returned as-is. The whole
//! sequence is repeated `extra_passes` more times before the call is
//! reported as [`TransportError::Exhausted`].
//!
//! Ordering never adapts to observed latency: operators decide priority.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::classify::ErrorKind;
use crate::cost::CostModel;
use crate::error::TransportError;
use crate::meter::UsageMeter;
use crate::nonce::NonceSource;
use crate::policy::RateLimiter;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{parse_quantity, RpcTransport};

/// A configured endpoint. Lower `priority` is tried first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub priority: usize,
}

/// Configuration for the fallback chain.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Deadline for a single attempt against a single endpoint.
    pub attempt_timeout: Duration,
    /// Additional passes over the full endpoint list after the first.
    pub extra_passes: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            extra_passes: 1,
        }
    }
}

struct EndpointSlot {
    endpoint: Endpoint,
    transport: Arc<dyn RpcTransport>,
}

/// Fallback chain over an ordered list of endpoint connections.
///
/// Every attempt is gated by the shared [`RateLimiter`] and accounted in the
/// shared [`UsageMeter`].
pub struct FallbackTransport {
    slots: Vec<EndpointSlot>,
    config: FallbackConfig,
    costs: Arc<CostModel>,
    meter: Arc<UsageMeter>,
    limiter: Arc<RateLimiter>,
    next_id: AtomicU64,
}

impl FallbackTransport {
    /// Build a chain; `transports` order is the priority order.
    pub fn new(
        transports: Vec<Arc<dyn RpcTransport>>,
        config: FallbackConfig,
        costs: Arc<CostModel>,
        meter: Arc<UsageMeter>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let slots = transports
            .into_iter()
            .enumerate()
            .map(|(priority, transport)| EndpointSlot {
                endpoint: Endpoint {
                    url: transport.url().to_string(),
                    priority,
                },
                transport,
            })
            .collect();
        Self {
            slots,
            config,
            costs,
            meter,
            limiter,
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of endpoints in the chain.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the chain has no endpoints.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Endpoints in the order they are tried.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.slots.iter().map(|s| s.endpoint.clone()).collect()
    }

    /// A fresh request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn meter(&self) -> &Arc<UsageMeter> {
        &self.meter
    }

    /// Any transport error that is not fatal advances to the next endpoint,
    /// as does a response `throttled` flags. Other JSON-RPC error bodies are
    /// answers and are returned as-is.
    async fn dispatch<R, F, Fut, T>(
        &self,
        weights: &[(String, u32)],
        send: F,
        throttled: T,
    ) -> Result<R, TransportError>
    where
        F: Fn(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
        T: Fn(&R) -> Option<TransportError>,
    {
        if self.slots.is_empty() {
            return Err(TransportError::NoEndpoints);
        }
        let cost = weights
            .iter()
            .fold(0u32, |acc, (_, w)| acc.saturating_add(*w));
        let timeout = self.config.attempt_timeout;

        let mut attempts = 0usize;
        let mut last = None;
        for pass in 0..=self.config.extra_passes {
            for slot in &self.slots {
                attempts += 1;
                let url = &slot.endpoint.url;
                self.limiter.admit(cost).await;

                let outcome = match tokio::time::timeout(timeout, send(slot.transport.clone())).await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout {
                        ms: timeout.as_millis() as u64,
                    }),
                };
                let err = match outcome {
                    Ok(resp) => match throttled(&resp) {
                        None => {
                            self.meter.record_usage(url, weights);
                            return Ok(resp);
                        }
                        Some(e) => e,
                    },
                    Err(e) => e,
                };

                let kind = err.kind();
                if kind.is_fatal() {
                    // The endpoint served the call; the request itself is bad.
                    self.meter.record_usage(url, weights);
                    return Err(err);
                }
                self.meter.record_failed_attempt(url, cost);
                tracing::warn!(
                    endpoint = %url,
                    priority = slot.endpoint.priority,
                    pass,
                    kind = %kind,
                    error = %err,
                    "endpoint failed, falling through"
                );
                last = Some(err);
            }
        }

        tracing::error!(attempts, "all endpoints failed");
        Err(TransportError::Exhausted {
            attempts,
            last: Box::new(last.unwrap_or(TransportError::NoEndpoints)),
        })
    }
}

fn throttled_response(resp: &JsonRpcResponse) -> Option<TransportError> {
    resp.error
        .as_ref()
        .filter(|e| e.kind() == ErrorKind::RateLimited)
        .map(|e| TransportError::Rpc(e.clone()))
}

#[async_trait]
impl RpcTransport for FallbackTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let weights = vec![(req.method.clone(), self.costs.estimate(&req))];
        self.dispatch(
            &weights,
            |transport| {
                let req = req.clone();
                async move { transport.send(req).await }
            },
            throttled_response,
        )
        .await
    }

    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        let weights = self.costs.weights(&reqs);
        self.dispatch(
            &weights,
            |transport| {
                let reqs = reqs.clone();
                async move { transport.send_batch(reqs).await }
            },
            |resps: &Vec<JsonRpcResponse>| resps.iter().find_map(throttled_response),
        )
        .await
    }

    fn url(&self) -> &str {
        "fallback"
    }
}

#[async_trait]
impl NonceSource for FallbackTransport {
    async fn pending_nonce(&self, address: &str) -> Result<u64, TransportError> {
        let count: Value = self
            .call(
                self.next_id(),
                "eth_getTransactionCount",
                vec![json!(address), json!("pending")],
            )
            .await?;
        parse_quantity(&count)
    }
}

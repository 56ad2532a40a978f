//! `ChainClient` — the service object that owns every piece of shared state.
//!
//! One instance per process (or per test): the nonce table, usage meter and
//! token bucket live here rather than in globals.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::classify::ErrorKind;
use crate::config::ClientConfig;
use crate::cost::CostModel;
use crate::error::TransportError;
use crate::fallback::{Endpoint, FallbackTransport};
use crate::meter::{UsageMeter, UsageSnapshot};
use crate::nonce::NonceManager;
use crate::policy::{RateLimiter, RetryPolicy};
use crate::request::{JsonRpcError, JsonRpcRequest};
use crate::transport::RpcTransport;

/// A transaction accepted by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub nonce: u64,
    pub hash: String,
}

/// Entry point for reads, submissions and nonce reservation.
pub struct ChainClient {
    transport: Arc<FallbackTransport>,
    meter: Arc<UsageMeter>,
    limiter: Arc<RateLimiter>,
    costs: Arc<CostModel>,
    nonces: NonceManager,
    read_retry: RetryPolicy,
    submit_retry: RetryPolicy,
}

impl ChainClient {
    /// Build a client over `transports` (priority order) with a fresh meter.
    pub fn new(
        transports: Vec<Arc<dyn RpcTransport>>,
        config: &ClientConfig,
    ) -> Result<Self, TransportError> {
        Self::with_meter(transports, config, Arc::new(UsageMeter::new()))
    }

    /// Build a client that records into an existing meter.
    pub fn with_meter(
        transports: Vec<Arc<dyn RpcTransport>>,
        config: &ClientConfig,
        meter: Arc<UsageMeter>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let costs = Arc::new(CostModel::new(config.method_costs.clone())?);
        let limiter = Arc::new(RateLimiter::from_budget(config.budget_per_second));
        let transport = Arc::new(FallbackTransport::new(
            transports,
            config.fallback(),
            costs.clone(),
            meter.clone(),
            limiter.clone(),
        ));
        let nonces = NonceManager::new(transport.clone(), config.nonce_staleness());

        tracing::info!(
            endpoints = transport.len(),
            limiter = limiter.is_enabled(),
            "chain client ready"
        );

        Ok(Self {
            transport,
            meter,
            limiter,
            costs,
            nonces,
            read_retry: RetryPolicy::new(config.read_retry.to_config()),
            submit_retry: RetryPolicy::new(config.submit_retry.to_config()),
        })
    }

    /// Call `method` through the fallback chain with the read retry policy.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        Self::call_with(&self.transport, &self.read_retry, method, &params).await
    }

    /// Like [`call`](Self::call), deserializing the result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(TransportError::Deserialization)
    }

    /// Send several calls as one batch. Per-call node errors are returned in
    /// place; only transport failures fail the whole batch.
    pub async fn call_batch(
        &self,
        calls: Vec<(String, Vec<Value>)>,
    ) -> Result<Vec<Result<Value, JsonRpcError>>, TransportError> {
        let transport = &self.transport;
        let calls = &calls;
        let responses = self
            .read_retry
            .run(move || async move {
                let reqs = calls
                    .iter()
                    .map(|(m, p)| JsonRpcRequest::new(transport.next_id(), m.as_str(), p.clone()))
                    .collect();
                transport.send_batch(reqs).await
            })
            .await?;
        Ok(responses.into_iter().map(|r| r.into_result()).collect())
    }

    /// Submit a signed raw transaction; returns its hash.
    pub async fn send_raw_transaction(&self, raw_tx: &str) -> Result<String, TransportError> {
        let hash = Self::call_with(
            &self.transport,
            &self.submit_retry,
            "eth_sendRawTransaction",
            &[json!(raw_tx)],
        )
        .await?;
        serde_json::from_value(hash).map_err(TransportError::Deserialization)
    }

    /// Reserve the next nonce for `address`, retrying the network fetch with
    /// the read policy.
    pub async fn reserve_nonce(&self, address: &str, force_resync: bool) -> Result<u64, TransportError> {
        let nonces = &self.nonces;
        self.read_retry
            .run(move || nonces.reserve(address, force_resync))
            .await
    }

    /// Refetch `address`'s nonce after the network rejected one.
    pub async fn force_resync_nonce(&self, address: &str) -> Result<u64, TransportError> {
        let nonces = &self.nonces;
        self.read_retry.run(move || nonces.force_resync(address)).await
    }

    /// Reserve a nonce, let `sign` build the raw transaction for it, submit.
    ///
    /// If signing fails, or the network rejects the transaction outright,
    /// the nonce is released for reuse before the error is returned. A nonce
    /// rejection resyncs the address from the network instead.
    pub async fn submit_with_nonce<F, Fut>(
        &self,
        address: &str,
        sign: F,
    ) -> Result<SubmittedTx, TransportError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<String, TransportError>>,
    {
        let nonce = self.reserve_nonce(address, false).await?;

        let raw = match sign(nonce).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(address, nonce, error = %e, "signing failed, releasing nonce");
                self.nonces.release(address, nonce).await;
                return Err(e);
            }
        };

        match self.send_raw_transaction(&raw).await {
            Ok(hash) => {
                tracing::info!(address, nonce, hash = %hash, "transaction submitted");
                Ok(SubmittedTx { nonce, hash })
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::NonceConflict => {
                        tracing::warn!(address, nonce, error = %e, "nonce rejected by network");
                        self.resync_after_failure(address).await;
                    }
                    // the node holds it, so the nonce is spent
                    ErrorKind::AlreadyKnown => {}
                    kind if kind.is_fatal() => {
                        tracing::warn!(address, nonce, %kind, "transaction rejected, releasing nonce");
                        self.nonces.release(address, nonce).await;
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    /// Wait for `cost` units of global budget.
    pub async fn admit(&self, cost: u32) {
        self.limiter.admit(cost).await
    }

    /// Cost units `method` with `params` would be charged.
    pub fn estimate(&self, method: &str, params: Vec<Value>) -> u32 {
        self.costs.estimate(&JsonRpcRequest::new(0, method, params))
    }

    /// Usage over the trailing `window`.
    pub fn usage(&self, window: Duration) -> UsageSnapshot {
        self.meter.snapshot(window)
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.transport.endpoints()
    }

    pub fn costs(&self) -> &CostModel {
        &self.costs
    }

    pub fn meter(&self) -> &Arc<UsageMeter> {
        &self.meter
    }

    async fn call_with(
        transport: &FallbackTransport,
        policy: &RetryPolicy,
        method: &str,
        params: &[Value],
    ) -> Result<Value, TransportError> {
        policy
            .run(move || async move {
                let req = JsonRpcRequest::new(transport.next_id(), method, params.to_vec());
                let resp = transport.send(req).await?;
                resp.into_result().map_err(TransportError::Rpc)
            })
            .await
    }

    async fn resync_after_failure(&self, address: &str) {
        if let Err(e) = self.nonces.force_resync(address).await {
            tracing::warn!(address, error = %e, "nonce resync failed");
        }
    }
}

impl std::fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClient")
            .field("endpoints", &self.transport.len())
            .field("limiter", &self.limiter)
            .field("nonces", &self.nonces)
            .finish()
    }
}

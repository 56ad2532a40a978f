//! The `RpcTransport` trait — one endpoint connection, or a chain of them.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// The async seam every endpoint connection (and the fallback chain over
/// them) implements.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Send a batch of JSON-RPC requests.
    ///
    /// Default implementation sends them sequentially; override for true batching.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let mut responses = Vec::with_capacity(reqs.len());
        for req in reqs {
            responses.push(self.send(req).await?);
        }
        Ok(responses)
    }

    /// Return the transport's identifier (URL or name).
    fn url(&self) -> &str;

    /// Convenience: call a method and deserialize the result.
    async fn call<T>(&self, id: u64, method: &str, params: Vec<Value>) -> Result<T, TransportError>
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self.send(req).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}

/// Parse a `0x`-prefixed hex quantity (as returned by `eth_getTransactionCount`).
pub fn parse_quantity(value: &Value) -> Result<u64, TransportError> {
    match value {
        Value::String(s) => {
            let digits = s.trim_start_matches("0x");
            u64::from_str_radix(digits, 16)
                .map_err(|e| TransportError::Other(format!("invalid hex quantity '{s}': {e}")))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| TransportError::Other(format!("invalid quantity {n}"))),
        other => Err(TransportError::Other(format!("expected quantity, got {other}"))),
    }
}

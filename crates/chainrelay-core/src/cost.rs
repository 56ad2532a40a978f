//! Method cost model — maps a JSON-RPC method (and selected params) to cost units.

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::request::JsonRpcRequest;

/// Weight for methods absent from both the override and built-in tables.
pub const DEFAULT_METHOD_COST: u32 = 20;

/// Block fetches with full transaction bodies cost this many times more.
pub const FULL_BLOCK_MULTIPLIER: u32 = 3;

/// Built-in compute-unit weights for common Ethereum JSON-RPC methods.
pub const ETH_METHOD_COSTS: &[(&str, u32)] = &[
    ("eth_blockNumber", 10),
    ("eth_chainId", 1),
    ("eth_gasPrice", 19),
    ("eth_maxPriorityFeePerGas", 10),
    ("eth_feeHistory", 10),
    ("eth_getBalance", 19),
    ("eth_getTransactionCount", 26),
    ("eth_call", 26),
    ("eth_estimateGas", 87),
    ("eth_sendRawTransaction", 250),
    ("eth_getTransactionByHash", 17),
    ("eth_getTransactionReceipt", 15),
    ("eth_getBlockByNumber", 16),
    ("eth_getBlockByHash", 21),
    ("eth_getLogs", 75),
    ("eth_subscribe", 10),
    ("eth_getCode", 19),
    ("eth_getStorageAt", 17),
    ("net_version", 1),
    ("debug_traceTransaction", 309),
    ("trace_block", 24),
    ("trace_transaction", 26),
];

/// Pure cost lookup: overrides, then built-ins, then [`DEFAULT_METHOD_COST`].
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    overrides: HashMap<String, u32>,
}

impl CostModel {
    /// Build a model with per-method overrides. Every override must be positive.
    pub fn new(overrides: HashMap<String, u32>) -> Result<Self, ConfigError> {
        if let Some((method, _)) = overrides.iter().find(|(_, cost)| **cost == 0) {
            return Err(ConfigError::ZeroCost {
                method: method.clone(),
            });
        }
        Ok(Self { overrides })
    }

    /// Base weight of `method`, ignoring params.
    pub fn method_cost(&self, method: &str) -> u32 {
        if let Some(cost) = self.overrides.get(method) {
            return *cost;
        }
        ETH_METHOD_COSTS
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, cost)| *cost)
            .unwrap_or(DEFAULT_METHOD_COST)
    }

    /// Weight of a concrete request.
    pub fn estimate(&self, req: &JsonRpcRequest) -> u32 {
        let base = self.method_cost(&req.method);
        if is_full_block_fetch(req) {
            base.saturating_mul(FULL_BLOCK_MULTIPLIER)
        } else {
            base
        }
    }

    /// `(method, weight)` pairs for a batch, in request order.
    pub fn weights(&self, reqs: &[JsonRpcRequest]) -> Vec<(String, u32)> {
        reqs.iter()
            .map(|r| (r.method.clone(), self.estimate(r)))
            .collect()
    }

    /// Effective table: every built-in method plus overrides, sorted by name.
    pub fn table(&self) -> Vec<(String, u32)> {
        let mut methods: Vec<String> = ETH_METHOD_COSTS
            .iter()
            .map(|(m, _)| m.to_string())
            .chain(self.overrides.keys().cloned())
            .collect();
        methods.sort();
        methods.dedup();
        methods
            .into_iter()
            .map(|m| {
                let cost = self.method_cost(&m);
                (m, cost)
            })
            .collect()
    }
}

fn is_full_block_fetch(req: &JsonRpcRequest) -> bool {
    matches!(req.method.as_str(), "eth_getBlockByNumber" | "eth_getBlockByHash")
        && req.param(1).and_then(|v| v.as_bool()).unwrap_or(false)
}

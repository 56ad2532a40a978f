//! chainrelay-core — resilient submission to rate-limited, multi-provider JSON-RPC networks.
//!
//! # Overview
//!
//! The core combines three tightly coupled pieces:
//!
//! - [`nonce`] — per-address, lock-serialized nonce allocation
//! - [`fallback`] + [`policy::retry`] — ordered multi-endpoint fallback with
//!   classification-aware exponential backoff
//! - [`cost`] + [`meter`] + [`policy::rate_limiter`] — per-call cost
//!   estimation, usage accounting and an optional global token bucket
//!
//! [`ChainClient`] owns one of each and is the usual entry point. Endpoint
//! connections plug in through the [`RpcTransport`] trait.

pub mod classify;
pub mod client;
pub mod config;
pub mod cost;
pub mod error;
pub mod fallback;
pub mod meter;
pub mod nonce;
pub mod policy;
pub mod request;
pub mod transport;

pub use classify::{classify, ErrorKind};
pub use client::{ChainClient, SubmittedTx};
pub use config::{ClientConfig, RetrySettings};
pub use cost::CostModel;
pub use error::{ConfigError, TransportError};
pub use fallback::{Endpoint, FallbackConfig, FallbackTransport};
pub use meter::{UsageMeter, UsageSnapshot};
pub use nonce::{NonceManager, NonceSource};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use transport::RpcTransport;

//! chainrelay-http — HTTP endpoint connections for ChainRelay.
//!
//! # Quick start
//! ```rust,no_run
//! use chainrelay_core::ClientConfig;
//!
//! # async fn run() -> Result<(), chainrelay_core::TransportError> {
//! let config = ClientConfig {
//!     endpoints: vec![
//!         "https://eth-mainnet.g.alchemy.com/v2/KEY".into(),
//!         "https://rpc.ankr.com/eth".into(),
//!     ],
//!     budget_per_second: Some(300.0),
//!     ..Default::default()
//! };
//! let client = chainrelay_http::connect(&config)?;
//! let nonce = client.reserve_nonce("0x742d35Cc6634C0532925a3b844Bc454e4438f44e", false).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;

use std::sync::Arc;

use chainrelay_core::{ChainClient, ClientConfig, RpcTransport, TransportError, UsageMeter};

pub use client::{HttpClientConfig, HttpRpcClient};

/// Build a [`ChainClient`] with one HTTP connection per configured endpoint,
/// in configured order.
pub fn connect(config: &ClientConfig) -> Result<ChainClient, TransportError> {
    let meter = Arc::new(UsageMeter::new());
    let http_config = HttpClientConfig {
        request_timeout: config.attempt_timeout(),
        header_prefixes: config.cost_headers.clone(),
    };
    let transports = config
        .endpoints
        .iter()
        .map(|url| {
            let client = HttpRpcClient::new(url.as_str(), http_config.clone())?.with_meter(meter.clone());
            Ok(Arc::new(client) as Arc<dyn RpcTransport>)
        })
        .collect::<Result<Vec<_>, TransportError>>()?;
    ChainClient::with_meter(transports, config, meter)
}

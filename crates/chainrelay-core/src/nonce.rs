//! Per-address nonce allocation.
//!
//! Each address gets its own state behind a FIFO async mutex, so two callers
//! reserving for the same address always receive distinct, sequential nonces
//! while different addresses proceed independently. The local counter is
//! resynchronised from the network's pending transaction count when it is
//! unset, stale, or explicitly forced.
//!
//! Resync policy: a staleness resync never lowers the counter (nonces issued
//! locally may not be visible as pending yet); a forced resync adopts the
//! network value even if lower, and logs a warning when it does.
//!
//! A reserved nonce that never reached the network can be handed back with
//! [`NonceManager::release`]; it is reissued before the counter advances.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::TransportError;

/// How long a synced counter is trusted before it is refreshed.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(10);

/// Where the manager learns the network's view of an address.
#[async_trait]
pub trait NonceSource: Send + Sync + 'static {
    /// Pending-inclusive transaction count for `address`.
    async fn pending_nonce(&self, address: &str) -> Result<u64, TransportError>;
}

#[derive(Debug, Default)]
struct NonceState {
    current: Option<u64>,
    last_sync: Option<Instant>,
    /// Released below `current`, reissued lowest first.
    released: BTreeSet<u64>,
}

impl NonceState {
    fn needs_resync(&self, staleness: Duration) -> bool {
        match (self.current, self.last_sync) {
            (Some(_), Some(at)) => at.elapsed() > staleness,
            _ => true,
        }
    }
}

type StateHandle = Arc<tokio::sync::Mutex<NonceState>>;

/// Hands out nonces per address.
pub struct NonceManager {
    source: Arc<dyn NonceSource>,
    staleness: Duration,
    states: Mutex<HashMap<String, StateHandle>>,
}

impl NonceManager {
    pub fn new(source: Arc<dyn NonceSource>, staleness: Duration) -> Self {
        Self {
            source,
            staleness,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next nonce for `address`.
    ///
    /// The returned nonce is never handed to another caller. If the network
    /// fetch fails the local state is left untouched and the error is
    /// returned unchanged.
    pub async fn reserve(&self, address: &str, force_resync: bool) -> Result<u64, TransportError> {
        let key = normalize(address);
        let handle = self.state(&key);
        let mut state = handle.lock().await;

        if force_resync {
            self.resync_forced(&key, &mut state).await?;
        } else if state.needs_resync(self.staleness) {
            let fetched = self.source.pending_nonce(&key).await?;
            let next = state.current.map_or(fetched, |local| local.max(fetched));
            if next != fetched {
                tracing::debug!(address = %key, local = next, network = fetched, "keeping local nonce ahead of network");
            }
            state.current = Some(next);
            state.last_sync = Some(Instant::now());
            // already consumed on the network
            state.released = state.released.split_off(&fetched);
        }

        if let Some(nonce) = state.released.pop_first() {
            tracing::debug!(address = %key, nonce, "released nonce reissued");
            return Ok(nonce);
        }

        let nonce = state
            .current
            .ok_or_else(|| TransportError::Other(format!("nonce for {key} not synced")))?;
        state.current = Some(nonce + 1);
        tracing::debug!(address = %key, nonce, "nonce reserved");
        Ok(nonce)
    }

    /// Unconditionally refetch `address`'s nonce; returns the value adopted.
    ///
    /// Call this after the network rejects a transaction for its nonce.
    pub async fn force_resync(&self, address: &str) -> Result<u64, TransportError> {
        let key = normalize(address);
        let handle = self.state(&key);
        let mut state = handle.lock().await;
        self.resync_forced(&key, &mut state).await
    }

    /// Hand back a reserved `nonce` that was never accepted by the network.
    ///
    /// If it is the most recent reservation the counter simply rolls back;
    /// otherwise later nonces are already out, so it is queued and reissued
    /// ahead of them. Returns `false` if `nonce` was never issued here.
    pub async fn release(&self, address: &str, nonce: u64) -> bool {
        let key = normalize(address);
        let handle = self.state(&key);
        let mut state = handle.lock().await;
        let Some(current) = state.current else {
            return false;
        };
        if nonce >= current {
            return false;
        }
        if nonce + 1 == current {
            // released nonces directly below fold into the rollback
            let mut next = nonce;
            while next > 0 && state.released.remove(&(next - 1)) {
                next -= 1;
            }
            state.current = Some(next);
        } else {
            state.released.insert(nonce);
        }
        tracing::debug!(address = %key, nonce, "nonce released");
        true
    }

    /// The next nonce that would be issued, without reserving it.
    pub async fn peek(&self, address: &str) -> Option<u64> {
        let key = normalize(address);
        let handle = self.states.lock().unwrap().get(&key).cloned()?;
        let state = handle.lock().await;
        state.current
    }

    /// Number of addresses with state.
    pub fn tracked(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    async fn resync_forced(&self, key: &str, state: &mut NonceState) -> Result<u64, TransportError> {
        let fetched = self.source.pending_nonce(key).await?;
        if let Some(local) = state.current {
            if fetched < local {
                tracing::warn!(
                    address = %key,
                    local,
                    network = fetched,
                    "forced resync lowered nonce; locally issued nonces may be reused"
                );
            }
        }
        state.current = Some(fetched);
        state.last_sync = Some(Instant::now());
        state.released.clear();
        Ok(fetched)
    }

    fn state(&self, key: &str) -> StateHandle {
        self.states
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for NonceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceManager")
            .field("staleness", &self.staleness)
            .field("tracked", &self.tracked())
            .finish()
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

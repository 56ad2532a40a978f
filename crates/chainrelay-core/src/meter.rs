//! Usage meter — process-wide accounting of cost units by method and endpoint.
//!
//! Every successful outbound call is recorded into four views at once:
//! per-method call counts, per-method cost, a time-ordered log used for
//! windowed rates, and per-endpoint totals. The log is bounded: once it
//! crosses [`MAX_LOG_ENTRIES`] it is pruned of entries older than
//! [`RETENTION`], without a background task.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Size at which the time-ordered log is pruned.
pub const MAX_LOG_ENTRIES: usize = 10_000;

/// How far back the log keeps entries once pruning kicks in.
pub const RETENTION: Duration = Duration::from_secs(5 * 60);

const SLICE: Duration = Duration::from_secs(1);

/// One outbound call in the time-ordered log.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub at: Instant,
    pub cost: u64,
    pub endpoint: String,
}

/// Totals for a single method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MethodUsage {
    pub calls: u64,
    pub cost: u64,
}

/// Totals for a single endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointUsage {
    pub calls: u64,
    pub cost: u64,
    /// Attempts that timed out or failed before a usable response.
    pub failures: u64,
    /// Cost of those failed attempts.
    pub wasted_cost: u64,
}

/// Read-only view of the meter, for external observability tooling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageSnapshot {
    pub window_ms: u64,
    /// Cost recorded within the window.
    pub window_cost: u64,
    /// `window_cost` averaged over the window length.
    pub cost_per_second: f64,
    /// Cost recorded in the most recent one-second slice.
    pub last_second_cost: u64,
    pub methods: BTreeMap<String, MethodUsage>,
    pub endpoints: BTreeMap<String, EndpointUsage>,
    /// Provider-reported cost/rate headers, latest value per endpoint.
    pub provider_headers: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Default)]
struct MeterState {
    methods: HashMap<String, MethodUsage>,
    endpoints: HashMap<String, EndpointUsage>,
    log: VecDeque<UsageRecord>,
    headers: HashMap<String, BTreeMap<String, String>>,
}

/// Thread-safe usage meter. Share it as `Arc<UsageMeter>`.
#[derive(Default)]
pub struct UsageMeter {
    state: Mutex<MeterState>,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful outbound call (a single request or a batch).
    pub fn record_usage(&self, endpoint: &str, weights: &[(String, u32)]) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        let mut total = 0u64;
        for (method, weight) in weights {
            let entry = state.methods.entry(method.clone()).or_default();
            entry.calls += 1;
            entry.cost += u64::from(*weight);
            total += u64::from(*weight);
        }

        let ep = state.endpoints.entry(endpoint.to_string()).or_default();
        ep.calls += weights.len() as u64;
        ep.cost += total;

        state.log.push_back(UsageRecord {
            at: now,
            cost: total,
            endpoint: endpoint.to_string(),
        });
        if state.log.len() > MAX_LOG_ENTRIES {
            prune(&mut state.log, now);
        }
    }

    /// Record an attempt that failed at the transport level.
    pub fn record_failed_attempt(&self, endpoint: &str, cost: u32) {
        let mut state = self.state.lock().unwrap();
        let ep = state.endpoints.entry(endpoint.to_string()).or_default();
        ep.failures += 1;
        ep.wasted_cost += u64::from(cost);
    }

    /// Store provider-reported headers verbatim; they are not interpreted.
    pub fn observe_provider_headers(&self, endpoint: &str, headers: Vec<(String, String)>) {
        if headers.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state
            .headers
            .entry(endpoint.to_string())
            .or_default()
            .extend(headers);
    }

    /// Number of entries currently held in the time-ordered log.
    pub fn log_len(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }

    /// Aggregate view over the trailing `window`.
    pub fn snapshot(&self, window: Duration) -> UsageSnapshot {
        let now = Instant::now();
        let state = self.state.lock().unwrap();

        let mut window_cost = 0u64;
        let mut last_second_cost = 0u64;
        for record in state.log.iter().rev() {
            let age = now.saturating_duration_since(record.at);
            if age > window && age >= SLICE {
                break;
            }
            if age <= window {
                window_cost += record.cost;
            }
            if age < SLICE {
                last_second_cost += record.cost;
            }
        }

        let secs = window.as_secs_f64();
        let cost_per_second = if secs > 0.0 {
            window_cost as f64 / secs
        } else {
            0.0
        };

        UsageSnapshot {
            window_ms: window.as_millis() as u64,
            window_cost,
            cost_per_second,
            last_second_cost,
            methods: state.methods.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            endpoints: state.endpoints.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            provider_headers: state
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for UsageMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageMeter")
            .field("log_len", &self.log_len())
            .finish()
    }
}

fn prune(log: &mut VecDeque<UsageRecord>, now: Instant) {
    while let Some(front) = log.front() {
        if now.saturating_duration_since(front.at) > RETENTION {
            log.pop_front();
        } else {
            break;
        }
    }
    // Still over the cap: everything is recent, drop oldest to stay bounded.
    if log.len() > MAX_LOG_ENTRIES {
        let excess = log.len() - MAX_LOG_ENTRIES;
        log.drain(..excess);
        tracing::debug!(dropped = excess, "usage log over cap, dropped oldest entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(method: &str, cost: u32) -> (String, u32) {
        (method.to_string(), cost)
    }

    #[tokio::test(start_paused = true)]
    async fn records_all_views() {
        let meter = UsageMeter::new();
        meter.record_usage("https://a", &[w("eth_call", 26)]);
        meter.record_usage("https://a", &[w("eth_call", 26), w("eth_blockNumber", 10)]);
        meter.record_usage("https://b", &[w("eth_getLogs", 75)]);

        let snap = meter.snapshot(Duration::from_secs(60));
        assert_eq!(snap.methods["eth_call"], MethodUsage { calls: 2, cost: 52 });
        assert_eq!(snap.methods["eth_blockNumber"], MethodUsage { calls: 1, cost: 10 });
        assert_eq!(snap.endpoints["https://a"].cost, 62);
        assert_eq!(snap.endpoints["https://a"].calls, 3);
        assert_eq!(snap.endpoints["https://b"].cost, 75);
        assert_eq!(snap.window_cost, 137);
        assert_eq!(meter.log_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn window_excludes_old_calls() {
        let meter = UsageMeter::new();
        assert_eq!(meter.snapshot(Duration::from_secs(10)).window_cost, 0);

        meter.record_usage("https://a", &[w("eth_call", 26)]);
        tokio::time::advance(Duration::from_secs(10)).await;
        meter.record_usage("https://a", &[w("eth_blockNumber", 10)]);

        let snap = meter.snapshot(Duration::from_secs(5));
        assert_eq!(snap.window_cost, 10);
        assert_eq!(snap.last_second_cost, 10);
        assert!((snap.cost_per_second - 2.0).abs() < f64::EPSILON);

        tokio::time::advance(Duration::from_secs(30)).await;
        let snap = meter.snapshot(Duration::from_secs(5));
        assert_eq!(snap.window_cost, 0);
        assert_eq!(snap.last_second_cost, 0);
        // cumulative views are not windowed
        assert_eq!(snap.methods["eth_call"].cost, 26);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_only_touch_endpoint_waste() {
        let meter = UsageMeter::new();
        meter.record_failed_attempt("https://slow", 26);
        let snap = meter.snapshot(Duration::from_secs(60));
        assert_eq!(snap.window_cost, 0);
        assert!(snap.methods.is_empty());
        assert_eq!(
            snap.endpoints["https://slow"],
            EndpointUsage { calls: 0, cost: 0, failures: 1, wasted_cost: 26 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn log_pruned_past_cap() {
        let meter = UsageMeter::new();
        for _ in 0..MAX_LOG_ENTRIES {
            meter.record_usage("https://a", &[w("eth_chainId", 1)]);
        }
        tokio::time::advance(RETENTION + Duration::from_secs(1)).await;
        meter.record_usage("https://a", &[w("eth_chainId", 1)]);
        assert_eq!(meter.log_len(), 1);
        // totals survive pruning
        let snap = meter.snapshot(Duration::from_secs(1));
        assert_eq!(snap.methods["eth_chainId"].calls, MAX_LOG_ENTRIES as u64 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn log_hard_capped_when_all_recent() {
        let meter = UsageMeter::new();
        for _ in 0..5 {
            meter.record_usage("https://a", &[w("eth_call", 100)]);
        }
        for _ in 0..MAX_LOG_ENTRIES {
            meter.record_usage("https://a", &[w("eth_chainId", 1)]);
        }
        assert_eq!(meter.log_len(), MAX_LOG_ENTRIES);
        // the five oldest (and most expensive) entries went first
        let snap = meter.snapshot(Duration::from_secs(60));
        assert_eq!(snap.window_cost, MAX_LOG_ENTRIES as u64);
        assert_eq!(snap.methods["eth_call"].cost, 500);
    }

    #[test]
    fn provider_headers_passthrough() {
        let meter = UsageMeter::new();
        meter.observe_provider_headers(
            "https://a",
            vec![("x-ratelimit-remaining".into(), "99".into())],
        );
        meter.observe_provider_headers(
            "https://a",
            vec![("x-ratelimit-remaining".into(), "98".into())],
        );
        let snap = meter.snapshot(Duration::from_secs(1));
        assert_eq!(snap.provider_headers["https://a"]["x-ratelimit-remaining"], "98");
    }
}

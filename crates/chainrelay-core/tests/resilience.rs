//! End-to-end behaviour of `ChainClient` over scripted endpoints.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use chainrelay_core::{
    ChainClient, ClientConfig, ErrorKind, JsonRpcRequest, JsonRpcResponse, RetrySettings,
    RpcTransport, TransportError,
};

enum Outcome {
    Reply(Value),
    NodeError(&'static str),
    Hang,
}

type Script = Box<dyn Fn(&JsonRpcRequest) -> Outcome + Send + Sync>;

struct ScriptedEndpoint {
    url: String,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedEndpoint {
    fn new(url: &str, script: impl Fn(&JsonRpcRequest) -> Outcome + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for ScriptedEndpoint {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.script)(&req) {
            Outcome::Reply(v) => Ok(JsonRpcResponse::success(req.id, v)),
            Outcome::NodeError(msg) => Ok(JsonRpcResponse::failure(req.id, -32000, msg)),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Other("unreachable".into()))
            }
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        read_retry: RetrySettings {
            max_retries: 3,
            base_delay_ms: 10,
        },
        submit_retry: RetrySettings {
            max_retries: 1,
            base_delay_ms: 10,
        },
        ..ClientConfig::default()
    }
}

fn client(endpoints: &[Arc<ScriptedEndpoint>], config: &ClientConfig) -> ChainClient {
    let transports = endpoints
        .iter()
        .map(|e| e.clone() as Arc<dyn RpcTransport>)
        .collect();
    ChainClient::new(transports, config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn second_endpoint_answers_when_first_times_out() {
    let a = ScriptedEndpoint::new("https://a", |_| Outcome::Hang);
    let b = ScriptedEndpoint::new("https://b", |_| Outcome::Reply(json!("0x10")));
    let c = ScriptedEndpoint::new("https://c", |_| Outcome::Reply(json!("0x99")));
    let client = client(&[a.clone(), b.clone(), c.clone()], &fast_config());

    let block = client.call("eth_blockNumber", vec![]).await.unwrap();
    assert_eq!(block, json!("0x10"));
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 0));

    let usage = client.usage(Duration::from_secs(60));
    assert_eq!(usage.window_cost, 10);
    assert_eq!(usage.methods["eth_blockNumber"].calls, 1);
    assert_eq!(usage.endpoints["https://b"].cost, 10);
    assert_eq!(usage.endpoints["https://a"].failures, 1);
}

#[tokio::test(start_paused = true)]
async fn insufficient_funds_is_never_retried() {
    let a = ScriptedEndpoint::new("https://a", |_| {
        Outcome::NodeError("insufficient funds for gas * price + value")
    });
    let b = ScriptedEndpoint::new("https://b", |_| Outcome::Reply(json!("0xhash")));
    let client = client(&[a.clone(), b.clone()], &fast_config());

    let err = client.send_raw_transaction("0xf86c").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert!(err.to_string().contains("insufficient funds"));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_reads_are_retried_with_backoff() {
    let a = ScriptedEndpoint::new("https://a", |_| Outcome::NodeError("rate limit exceeded"));
    let config = ClientConfig {
        extra_passes: 0,
        ..fast_config()
    };
    let client = client(&[a.clone()], &config);

    let start = Instant::now();
    let err = client.call("eth_call", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert_eq!(a.calls(), 4, "first try + 3 retries");
    // 10 + 20 + 40 ms of backoff, plus at most 3 * 250 ms of jitter
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(70), "{waited:?}");
    assert!(waited < Duration::from_millis(70 + 750), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn unknown_block_is_retried_until_propagated() {
    let seen = Arc::new(AtomicUsize::new(0));
    let s = seen.clone();
    let a = ScriptedEndpoint::new("https://a", move |_| {
        if s.fetch_add(1, Ordering::SeqCst) < 2 {
            Outcome::NodeError("unknown block")
        } else {
            Outcome::Reply(json!({"status": "0x1"}))
        }
    });
    let client = client(&[a.clone()], &fast_config());
    let receipt = client
        .call("eth_getTransactionReceipt", vec![json!("0xabc")])
        .await
        .unwrap();
    assert_eq!(receipt["status"], json!("0x1"));
    assert_eq!(a.calls(), 3);
}

fn nonce_endpoint(count: Arc<AtomicU64>, fetches: Arc<AtomicUsize>) -> Arc<ScriptedEndpoint> {
    ScriptedEndpoint::new("https://node", move |req| match req.method.as_str() {
        "eth_getTransactionCount" => {
            fetches.fetch_add(1, Ordering::SeqCst);
            Outcome::Reply(json!(format!("{:#x}", count.load(Ordering::SeqCst))))
        }
        "eth_sendRawTransaction" => {
            let raw = req.params[0].as_str().unwrap_or_default();
            if raw.ends_with("stale") {
                Outcome::NodeError("nonce too low")
            } else if raw.ends_with("broke") {
                Outcome::NodeError("insufficient funds for gas * price + value")
            } else {
                Outcome::Reply(json!(format!("0xhash-{raw}")))
            }
        }
        _ => Outcome::NodeError("method not found"),
    })
}

#[tokio::test(start_paused = true)]
async fn concurrent_nonce_reservations_through_client() {
    let count = Arc::new(AtomicU64::new(5));
    let fetches = Arc::new(AtomicUsize::new(0));
    let node = nonce_endpoint(count, fetches.clone());
    let client = Arc::new(client(&[node], &fast_config()));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.reserve_nonce("0xABC", false).await.unwrap() })
        })
        .collect();
    let mut nonces = Vec::new();
    for t in tasks {
        nonces.push(t.await.unwrap());
    }
    nonces.sort_unstable();
    assert_eq!(nonces, (5..15).collect::<Vec<_>>());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let usage = client.usage(Duration::from_secs(60));
    assert_eq!(usage.methods["eth_getTransactionCount"].cost, 26);
}

#[tokio::test(start_paused = true)]
async fn nonce_rejection_triggers_resync() {
    let count = Arc::new(AtomicU64::new(3));
    let fetches = Arc::new(AtomicUsize::new(0));
    let node = nonce_endpoint(count.clone(), fetches.clone());
    let client = client(&[node], &fast_config());

    let ok = client
        .submit_with_nonce("0xabc", |n| async move { Ok(format!("0x{n}")) })
        .await
        .unwrap();
    assert_eq!(ok.nonce, 3);
    assert_eq!(ok.hash, "0xhash-0x3");

    // someone else used nonces 4..=9 from another process
    count.store(10, Ordering::SeqCst);
    let err = client
        .submit_with_nonce("0xabc", |n| async move { Ok(format!("0x{n}-stale")) })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonceConflict);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);

    let next = client
        .submit_with_nonce("0xabc", |n| async move { Ok(format!("0x{n}")) })
        .await
        .unwrap();
    assert_eq!(next.nonce, 10);
}

#[tokio::test(start_paused = true)]
async fn signer_failure_releases_nonce() {
    let count = Arc::new(AtomicU64::new(7));
    let fetches = Arc::new(AtomicUsize::new(0));
    let node = nonce_endpoint(count, fetches);
    let client = client(&[node], &fast_config());

    let err = client
        .submit_with_nonce("0xabc", |_| async { Err(TransportError::Other("hsm offline".into())) })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("hsm offline"));
    assert_eq!(client.reserve_nonce("0xabc", false).await.unwrap(), 7);
}

#[tokio::test(start_paused = true)]
async fn rejected_transaction_gives_nonce_back() {
    let count = Arc::new(AtomicU64::new(3));
    let fetches = Arc::new(AtomicUsize::new(0));
    let node = nonce_endpoint(count, fetches);
    let client = client(&[node], &fast_config());

    let err = client
        .submit_with_nonce("0xabc", |n| async move { Ok(format!("0x{n}-broke")) })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    // past staleness the network still reports 3 pending
    tokio::time::advance(Duration::from_secs(30)).await;
    let next = client
        .submit_with_nonce("0xabc", |n| async move { Ok(format!("0x{n}")) })
        .await
        .unwrap();
    assert_eq!(next.nonce, 3);
}

#[tokio::test(start_paused = true)]
async fn rejection_behind_concurrent_reservation_is_not_duplicated() {
    let count = Arc::new(AtomicU64::new(3));
    let fetches = Arc::new(AtomicUsize::new(0));
    let node = nonce_endpoint(count, fetches);
    let client = client(&[node], &fast_config());

    let err = client
        .submit_with_nonce("0xabc", |n| {
            let client = &client;
            async move {
                // another sender takes the next nonce while this one signs
                let other = client.reserve_nonce("0xabc", false).await?;
                assert_eq!((n, other), (3, 4));
                Ok(format!("0x{n}-broke"))
            }
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    let a = client.reserve_nonce("0xabc", false).await.unwrap();
    let b = client.reserve_nonce("0xabc", false).await.unwrap();
    assert_eq!((a, b), (3, 5));
}

#[tokio::test(start_paused = true)]
async fn revert_with_digits_is_not_throttling() {
    let a = ScriptedEndpoint::new("https://a", |_| {
        Outcome::NodeError("execution reverted: amount 4290000 exceeds allowance")
    });
    let b = ScriptedEndpoint::new("https://b", |_| Outcome::Reply(json!("0x1")));
    let config = ClientConfig {
        read_retry: RetrySettings {
            max_retries: 0,
            base_delay_ms: 10,
        },
        ..fast_config()
    };
    let client = client(&[a.clone(), b.clone()], &config);

    let err = client.call("eth_call", vec![json!({})]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(err.to_string().contains("4290000"));
    assert_eq!((a.calls(), b.calls()), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn typed_calls_deserialize_results() {
    let a = ScriptedEndpoint::new("https://a", |req| match req.method.as_str() {
        "eth_chainId" => Outcome::Reply(json!("0x1")),
        _ => Outcome::Reply(json!({"number": "0x10"})),
    });
    let client = client(&[a], &fast_config());

    let chain_id: String = client.call_as("eth_chainId", vec![]).await.unwrap();
    assert_eq!(chain_id, "0x1");

    let err = client
        .call_as::<u64>("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Deserialization(_)));
}

#[tokio::test(start_paused = true)]
async fn budget_paces_outbound_calls() {
    let a = ScriptedEndpoint::new("https://a", |_| Outcome::Reply(json!("0x")));
    let config = ClientConfig {
        budget_per_second: Some(26.0),
        ..fast_config()
    };
    let client = client(&[a.clone()], &config);

    let start = Instant::now();
    for _ in 0..3 {
        client.call("eth_call", vec![]).await.unwrap();
    }
    // first call uses the initial burst, the other two need a second each
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(a.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn usage_window_totals_match_weights() {
    let a = ScriptedEndpoint::new("https://a", |_| Outcome::Reply(json!(null)));
    let client = client(&[a], &fast_config());

    let calls: &[(&str, Vec<Value>)] = &[
        ("eth_blockNumber", vec![]),
        ("eth_call", vec![json!({}), json!("latest")]),
        ("eth_getBlockByNumber", vec![json!("latest"), json!(true)]),
        ("custom_method", vec![]),
    ];
    let mut expected = 0u64;
    for (method, params) in calls {
        expected += u64::from(client.estimate(method, params.clone()));
        client.call(method, params.clone()).await.unwrap();
    }
    assert_eq!(expected, 10 + 26 + 16 * 3 + 20);

    let usage = client.usage(Duration::from_secs(10));
    assert_eq!(usage.window_cost, expected);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(client.usage(Duration::from_secs(10)).window_cost, 0);
}

#[tokio::test(start_paused = true)]
async fn batch_errors_are_returned_in_place() {
    let a = ScriptedEndpoint::new("https://a", |req| match req.method.as_str() {
        "eth_chainId" => Outcome::Reply(json!("0x1")),
        _ => Outcome::NodeError("execution reverted"),
    });
    let client = client(&[a], &fast_config());
    let results = client
        .call_batch(vec![
            ("eth_chainId".into(), vec![]),
            ("eth_call".into(), vec![json!({})]),
        ])
        .await
        .unwrap();
    assert_eq!(results[0].as_ref().unwrap(), &json!("0x1"));
    assert_eq!(results[1].as_ref().unwrap_err().message, "execution reverted");
}

#[tokio::test]
async fn empty_endpoint_list_fails_fast() {
    let client = client(&[], &fast_config());
    let err = client.call("eth_blockNumber", vec![]).await.unwrap_err();
    assert!(matches!(err, TransportError::NoEndpoints));
    assert!(client.endpoints().is_empty());
}

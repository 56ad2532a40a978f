//! chainrelay CLI — send calls and reserve nonces through the fallback chain.
//!
//! Usage:
//! ```bash
//! # Send a JSON-RPC call through every configured endpoint in order
//! chainrelay call --config relay.json --method eth_blockNumber
//!
//! # Reserve the next nonce for an address
//! chainrelay nonce --config relay.json --address 0x742d35Cc6634C0532925a3b844Bc454e4438f44e
//!
//! # Print the effective cost table
//! chainrelay costs
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`); set `CHAINRELAY_LOG_JSON=1`
//! for JSON lines.

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainrelay_core::{ChainClient, ClientConfig, CostModel};

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "nonce" => cmd_nonce(&args[2..]).await,
        "costs" => cmd_costs(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("chainrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("CHAINRELAY_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    let registry = tracing_subscriber::registry().with(filter);
    // stdout carries command output only
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    println!("chainrelay {}", env!("CARGO_PKG_VERSION"));
    println!("Resilient JSON-RPC calls across rate-limited providers\n");
    println!("USAGE:");
    println!("    chainrelay <COMMAND>\n");
    println!("COMMANDS:");
    println!("    call       Send a JSON-RPC call through the fallback chain");
    println!("    nonce      Reserve the next nonce for an address");
    println!("    costs      Print the effective per-method cost table");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CALL FLAGS:");
    println!("    --config <FILE>     JSON client config  [required]");
    println!("    --method <METHOD>   JSON-RPC method     [required]");
    println!("    --params <JSON>     JSON array of params (default [])\n");
    println!("NONCE FLAGS:");
    println!("    --config <FILE>     JSON client config  [required]");
    println!("    --address <ADDR>    Sender address      [required]");
    println!("    --resync            Refetch from the network first\n");
    println!("COSTS FLAGS:");
    println!("    --config <FILE>     Apply method_costs overrides from a config");
}

fn load_client(args: &[String]) -> Result<ChainClient> {
    let path = parse_flag(args, "--config").context("--config is required")?;
    let config = ClientConfig::from_file(&path)?;
    tracing::debug!(path = %path, endpoints = config.endpoints.len(), "loaded config");
    Ok(chainrelay_http::connect(&config)?)
}

fn log_usage(client: &ChainClient) {
    let snapshot = client.usage(Duration::from_secs(60));
    match serde_json::to_string(&snapshot) {
        Ok(json) => tracing::debug!(usage = %json, "usage over last 60s"),
        Err(e) => tracing::debug!(error = %e, "usage snapshot not serializable"),
    }
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").context("--method is required")?;
    let params = match parse_flag(args, "--params") {
        Some(raw) => match serde_json::from_str::<Value>(&raw).context("--params is not valid JSON")? {
            Value::Array(items) => items,
            _ => bail!("--params must be a JSON array"),
        },
        None => vec![],
    };
    let client = load_client(args)?;

    let result = client.call(&method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    log_usage(&client);
    Ok(())
}

async fn cmd_nonce(args: &[String]) -> Result<()> {
    let address = parse_flag(args, "--address").context("--address is required")?;
    let resync = args.iter().any(|a| a == "--resync");
    let client = load_client(args)?;

    let nonce = client.reserve_nonce(&address, resync).await?;
    println!("{nonce}");
    log_usage(&client);
    Ok(())
}

fn cmd_costs(args: &[String]) -> Result<()> {
    let costs = match parse_flag(args, "--config") {
        Some(path) => CostModel::new(ClientConfig::from_file(&path)?.method_costs)?,
        None => CostModel::default(),
    };
    let table = costs.table();
    let width = table.iter().map(|(m, _)| m.len()).max().unwrap_or(0);
    for (method, cost) in table {
        println!("  {method:<width$}  {cost:>4}");
    }
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

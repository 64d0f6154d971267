//! ChainPulse CLI: run the ingestion server or inspect its configuration.
//!
//! # Commands
//! ```text
//! chainpulse serve   --rpc-url <wss://...> --database <sqlite:path|memory> --port <n>
//!                    [--watchlist <contracts.yaml>] [--log <filter>] [--log-json]
//!                    [--log-component <crate=level>]...
//! chainpulse info
//! chainpulse version
//! ```

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use chainpulse_core::{LiveHub, PipelineMetrics};
use chainpulse_evm::{ContractRegistry, PipelineBuilder, PipelineConfig, WsConnector, WsConnectorConfig};

mod logging;
mod server;
mod watchlist;

use logging::{init_tracing, parse_component, LogConfig};
use server::AppState;
use watchlist::WatchList;

const DEFAULT_RPC_URL: &str = "wss://dream-rpc.somnia.network/ws";
const DEFAULT_DATABASE: &str = "sqlite:chainpulse.db";
const DEFAULT_PORT: u16 = 8000;

#[derive(Parser)]
#[command(
    name = "chainpulse",
    about = "Live EVM event ingestion, query API and block replay",
    long_about = "
ChainPulse: follow an EVM chain over WebSocket JSON-RPC, decode the events of
watched contracts, store them, stream them live and replay stored ranges.

ENVIRONMENT VARIABLES:
  CHAINPULSE_RPC_URL     Upstream WebSocket RPC endpoint
  CHAINPULSE_DATABASE    sqlite:<path>, sqlite::memory: or memory
  PORT                   HTTP listen port
  CHAINPULSE_WATCHLIST   YAML list of contracts to watch at startup
  CHAINPULSE_LOG         Log filter (e.g. info,chainpulse_evm=debug)
  CHAINPULSE_LOG_JSON    Emit JSON logs when set to true
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline, metrics ticker and HTTP server
    Serve(ServeArgs),
    /// Show defaults and supported backends
    Info,
    /// Print version
    Version,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Upstream WebSocket JSON-RPC endpoint
    #[arg(long, env = "CHAINPULSE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Storage backend
    #[arg(long, env = "CHAINPULSE_DATABASE", default_value = DEFAULT_DATABASE)]
    database: String,

    /// HTTP listen port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// YAML watch list registered before ingestion starts
    #[arg(long, env = "CHAINPULSE_WATCHLIST")]
    watchlist: Option<PathBuf>,

    /// Log filter directive
    #[arg(long, env = "CHAINPULSE_LOG", default_value = "info")]
    log: String,

    /// Per-crate log level, repeatable (e.g. chainpulse-evm=debug)
    #[arg(long = "log-component", value_name = "CRATE=LEVEL", value_parser = parse_component)]
    log_components: Vec<(String, String)>,

    /// Emit JSON logs
    #[arg(long, env = "CHAINPULSE_LOG_JSON")]
    log_json: bool,

    /// Skip receipt lookups (events keep unknown gas)
    #[arg(long)]
    no_receipts: bool,

    /// RPC request timeout in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => cmd_serve(args).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::Version => {
            println!("chainpulse {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    init_tracing(&LogConfig {
        level: args.log.clone(),
        components: args.log_components.iter().cloned().collect(),
        json: args.log_json,
    });

    let store = chainpulse_storage::open(&args.database)
        .await
        .with_context(|| format!("cannot open database {}", args.database))?;
    info!(database = %args.database, "storage ready");

    let registry = Arc::new(ContractRegistry::new());
    if let Some(path) = &args.watchlist {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        WatchList::load(path)?.register_all(base_dir, &registry)?;
    }

    let connector = WsConnector::connect(
        args.rpc_url.clone(),
        WsConnectorConfig {
            request_timeout: Duration::from_secs(args.request_timeout),
            ..Default::default()
        },
    )
    .await
    .context("cannot reach the upstream RPC endpoint")?;

    let config = PipelineConfig {
        receipt_lookups: !args.no_receipts,
        ..Default::default()
    };
    let hub = Arc::new(LiveHub::new(config.channel_capacity));
    let metrics = Arc::new(PipelineMetrics::new());
    let recent_events_on_subscribe = config.recent_events_on_subscribe;

    let pipeline = PipelineBuilder::new()
        .config(config)
        .connector(Arc::new(connector))
        .store(Arc::clone(&store))
        .registry(Arc::clone(&registry))
        .hub(Arc::clone(&hub))
        .metrics(Arc::clone(&metrics))
        .build()?;

    let state = Arc::new(AppState::new(
        store,
        registry,
        hub,
        metrics,
        recent_events_on_subscribe,
    ));
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, rpc = %args.rpc_url, "chainpulse listening");

    let ticker = pipeline.spawn_metrics_ticker();
    let http = axum::serve(listener, server::router(state)).into_future();

    let result = tokio::select! {
        res = pipeline.run() => {
            let err = res.err().map(anyhow::Error::from).unwrap_or_else(|| anyhow!("pipeline stopped"));
            error!(error = %err, "ingestion stopped");
            Err(err.context("upstream connection lost"))
        }
        res = http => res.context("HTTP server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    ticker.abort();
    result
}

fn cmd_info() {
    let defaults = PipelineConfig::default();
    println!("ChainPulse v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Defaults:");
    println!("  RPC endpoint:           {DEFAULT_RPC_URL}");
    println!("  Database:               {DEFAULT_DATABASE}");
    println!("  HTTP port:              {DEFAULT_PORT}");
    println!("  Receipt lookups:        {}", defaults.receipt_lookups);
    println!("  Metrics interval:       {} ms", defaults.metrics_interval_ms);
    println!("  Live channel capacity:  {}", defaults.channel_capacity);
    println!("  Recent events on subscribe: {}", defaults.recent_events_on_subscribe);
    println!();
    println!("Storage backends: memory, SQLite (sqlite:<path>, sqlite::memory:)");
    println!("Metrics windows:  1h (default), 24h, 7d");
}

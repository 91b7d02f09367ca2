use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bob_client::config::{load_config, BobConfig, ClientConfig};
use bob_client::health::{HealthProber, HttpStatusProbe, NodeHealthState};
use bob_client::lifecycle::shutdown_signal;
use bob_client::node::NodePool;
use bob_client::observability::{logging, metrics};
use bob_client::{BobClient, ConnectionEvent, EventSink, Subscription};

#[derive(Parser)]
#[command(name = "bob-cli")]
#[command(about = "Query and stream from Bob nodes with automatic failover", long_about = None)]
struct Cli {
    /// Node base URL; repeat for several nodes.
    #[arg(short, long = "node")]
    nodes: Vec<String>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every node and print its health
    Nodes,
    /// Chain id
    ChainId,
    /// Node software version
    Version,
    /// Sync status of the active node
    Sync,
    /// Current epoch, or details of epoch N
    Epoch { epoch: Option<u32> },
    /// Tick by number
    Tick { tick: u64 },
    /// Balance of an identity
    Balance { identity: String },
    /// Transaction by hash
    Tx { hash: String },
    /// Transaction receipt by hash
    Receipt { hash: String },
    /// Stream notifications as JSON lines until interrupted
    Watch {
        #[arg(value_enum)]
        stream: Stream,
        /// Subscription params as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Stream {
    Ticks,
    NewTicks,
    Transfers,
    Logs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BobConfig::default(),
    };
    if !cli.nodes.is_empty() {
        config.client.nodes = cli.nodes.clone();
    }
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    logging::init_logging(&log_level);

    if let Commands::Nodes = cli.command {
        return probe_nodes(&config.client).await;
    }

    let client = BobClient::builder(config.client.clone())
        .on_event(|event| {
            if let ConnectionEvent::Error { message } = event {
                tracing::warn!(%message, "Connection error");
            }
        })
        .connect()
        .await?;

    let result = run(&client, cli.command, &config).await;
    client.shutdown().await;
    result
}

async fn run(client: &BobClient, command: Commands, config: &BobConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Nodes => print_json(&node_rows(client.nodes()))?,
        Commands::ChainId => print_json(&client.chain_id().await?)?,
        Commands::Version => print_json(&client.client_version().await?)?,
        Commands::Sync => print_json(&client.syncing().await?)?,
        Commands::Epoch { epoch: None } => print_json(&client.current_epoch().await?)?,
        Commands::Epoch { epoch: Some(epoch) } => print_json(&client.epoch_info(epoch).await?)?,
        Commands::Tick { tick } => print_json(&client.tick_by_number(tick).await?)?,
        Commands::Balance { identity } => print_json(&client.balance(&identity).await?)?,
        Commands::Tx { hash } => print_json(&client.transaction_by_hash(&hash).await?)?,
        Commands::Receipt { hash } => print_json(&client.transaction_receipt(&hash).await?)?,
        Commands::Watch { stream, params } => {
            if config.observability.metrics_enabled {
                metrics::init_metrics(config.observability.metrics_address.parse()?);
            }
            let params: Value = serde_json::from_str(&params)?;
            match stream {
                Stream::Ticks => watch(client.subscribe_tick_stream(params).await?).await?,
                Stream::NewTicks => watch(client.subscribe_new_ticks(params).await?).await?,
                Stream::Transfers => watch(client.subscribe_transfers(params).await?).await?,
                Stream::Logs => watch(client.subscribe_logs(params).await?).await?,
            }
        }
    }
    Ok(())
}

async fn watch<T: Serialize>(mut subscription: Subscription<T>) -> Result<(), Box<dyn std::error::Error>> {
    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            _ = &mut signal => return Ok(()),
            item = subscription.recv() => match item {
                Some(item) => println!("{}", serde_json::to_string(&item)?),
                None => return Ok(()),
            },
        }
    }
}

async fn probe_nodes(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(NodePool::new(config)?);
    let probe = Arc::new(HttpStatusProbe::new(config.probe_timeout())?);
    let prober = HealthProber::new(pool.clone(), probe, EventSink::new(), config.failure_threshold);
    prober.probe_all().await;

    print_json(&node_rows(pool.snapshot()))
}

fn node_rows(nodes: Vec<NodeHealthState>) -> Vec<Value> {
    nodes
        .into_iter()
        .map(|state| {
            json!({
                "node": state.base_url,
                "available": state.is_available,
                "consecutiveFailures": state.consecutive_failures,
                "tick": state.last_observed_cursor,
                "latencyMs": state.latency.as_millis() as u64,
                "checkedAt": state
                    .last_checked_at
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
            })
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

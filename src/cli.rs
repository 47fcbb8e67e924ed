use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::app_state::AppState;
use crate::config::{load_config, GatewayConfig};
use crate::gateway::CollectionGateway;
use crate::ledger::LedgerConnector;
use crate::ledger_memory::MemoryNetwork;
use crate::ledger_node::NodeConnector;
use crate::signer::SuriResolver;
use crate::web::{build_router, build_router_with_cors};

/// Top-level CLI interface for the collection gateway
#[derive(Parser)]
#[command(
    name = "collection_gateway",
    version = "0.1.0",
    about = "HTTP gateway adding and reading collection items on a ledger"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API against ledger nodes
    Serve {
        /// Configuration file (defaults to gateway.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Host/IP to bind, overrides configuration
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides configuration
        #[arg(long)]
        port: Option<u16>,
        /// Route requests to the in-process ledger double instead of real nodes
        #[arg(long)]
        dev_ledger: bool,
    },

    /// Load and validate configuration, then print the effective values
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Install the fmt subscriber; RUST_LOG takes precedence over `level`
pub fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build the in-process network described by `config`
pub fn dev_network(config: &GatewayConfig) -> anyhow::Result<Arc<MemoryNetwork>> {
    let network = Arc::new(MemoryNetwork::new());
    let mut endpoints = config.dev_ledger.endpoints.iter();
    let first = endpoints
        .next()
        .context("dev_ledger.endpoints cannot be empty")?;
    let ledger = network.add_node(first)?;
    for alias in endpoints {
        network.add_alias(alias, ledger.clone())?;
    }
    for seed in &config.dev_ledger.locs {
        ledger.insert_loc(seed.to_record()?)?;
    }
    info!(
        endpoints = config.dev_ledger.endpoints.len(),
        locs = config.dev_ledger.locs.len(),
        "in-process ledger ready"
    );
    Ok(network)
}

/// Connector `serve` uses: real nodes unless the dev ledger is enabled
pub fn build_connector(config: &GatewayConfig) -> anyhow::Result<Arc<dyn LedgerConnector>> {
    if config.dev_ledger.enabled {
        let network: Arc<dyn LedgerConnector> = dev_network(config)?;
        return Ok(network);
    }
    info!(
        connect_timeout_ms = config.connect_timeout_ms,
        "connecting to ledger nodes over websocket"
    );
    Ok(Arc::new(
        NodeConnector::new().with_connect_timeout(config.connect_timeout()),
    ))
}

fn load(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    load_config(path).context("failed to load configuration")
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    init_tracing(&config.log_level);

    let connector = build_connector(&config)?;
    let gateway = CollectionGateway::new(connector, Arc::new(SuriResolver))
        .with_submission_timeout(config.submission_timeout());
    let state = Arc::new(AppState::new(gateway));
    let app = if config.cors {
        build_router_with_cors(state)
    } else {
        build_router(state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server started on {}", listener.local_addr()?);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            dev_ledger,
        } => {
            let mut cfg = load(config.as_deref())?;
            if dev_ledger {
                cfg.dev_ledger.enabled = true;
            }
            if let Some(host) = host {
                cfg.host = host;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            serve(cfg).await
        }
        Commands::CheckConfig { config } => {
            let cfg = load(config.as_deref())?;
            let rendered = toml::to_string_pretty(&cfg).context("toml serialization error")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

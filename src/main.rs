use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use grid_gateway::{
    AppState, Distributor, EventBus, GridConfig, GridServer, HealthChecker, HttpNodeClient,
    Janitor, LocalBus, NodeClient, NodeRegistry, SessionMap,
};

/// Grid gateway - routes browser-automation sessions onto a node fleet
#[derive(Parser)]
#[command(name = "grid-gateway", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "GRID_PORT")]
    port: Option<u16>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "GRID_CONFIG")]
    config: Option<PathBuf>,

    /// Secret nodes must present when registering
    #[arg(long, env = "GRID_REGISTRATION_SECRET")]
    registration_secret: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,grid_gateway=info",
        1 => "info,grid_gateway=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> grid_gateway::Result<()> {
    let mut config = GridConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(secret) = cli.registration_secret {
        config.registration_secret = secret;
    }

    let bus: Arc<dyn EventBus> = Arc::new(LocalBus::new());

    let registry = Arc::new(NodeRegistry::new(&config, bus.clone()));
    registry.wire();

    let sessions = Arc::new(SessionMap::new(bus.clone()));
    sessions.wire();

    let client: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(config.node_rpc_timeout)?);

    let distributor = Arc::new(Distributor::new(
        registry.clone(),
        sessions.clone(),
        client.clone(),
        bus.clone(),
        config.clone(),
    ));

    let health = HealthChecker::new(
        registry.clone(),
        client,
        config.heartbeat_interval,
        config.health_probe_timeout,
    );
    let health_task = health.spawn();

    let janitor = Janitor::new(
        registry.clone(),
        config.janitor_interval,
        config.node_rpc_timeout,
    );
    let janitor_task = janitor.spawn();

    let proxy = reqwest::Client::builder()
        .timeout(config.node_rpc_timeout)
        .build()?;

    let state = Arc::new(AppState {
        config,
        bus,
        registry,
        sessions,
        distributor,
        proxy,
    });

    let result = GridServer::new(state).run().await;
    health_task.abort();
    janitor_task.abort();
    result
}

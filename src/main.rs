//! Agent mesh adapter - main entry point
//!
//! Runs the mesh adapter as a long-lived process, or performs one-shot
//! discovery and health checks against the configured fleet.

use agent_mesh::config::MeshConfig;
use agent_mesh::observability::{init_logging_with_overrides, HealthServer};
use agent_mesh::ServiceAdapter;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Service-mesh adapter for backend agent services
#[derive(Parser)]
#[command(name = "agent-mesh")]
#[command(about = "Service-mesh adapter for backend agent services")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: json, pretty or compact (overrides LOG_FORMAT)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the adapter until SIGINT/SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Refresh discovery once and print the catalog
    Discover,
    /// Refresh discovery, probe every service once and print the report
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging_with_overrides(cli.log_level.as_deref(), cli.log_format.as_deref());

    info!("Starting agent mesh adapter v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_adapter(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Discover => discover_once(config).await,
        Commands::Health => health_once(config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&PathBuf>) -> Result<MeshConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(MeshConfig::load_from_file(path)?);
    }

    for candidate in ["mesh.toml", "config/mesh.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(MeshConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create mesh.toml".into())
}

async fn run_adapter(config: MeshConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Adapter starting with mesh ID: {}", config.mesh.id);

    let health_port = config.server.health_port;
    let adapter = ServiceAdapter::new(config)?;

    let health_server = health_port.map(|port| {
        let server = Arc::new(
            HealthServer::new(adapter.config().mesh.id.clone(), port, adapter.metrics().clone())
                .with_monitor(adapter.health_monitor().clone()),
        );
        tokio::spawn(server.clone().start());
        server
    });

    adapter.start().await?;
    if let Some(server) = &health_server {
        server.set_ready(true);
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(services = adapter.catalog().len(), "Adapter is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    if let Some(server) = &health_server {
        server.set_ready(false);
    }
    adapter.destroy().await;
    Ok(())
}

fn handle_config_command(config: &MeshConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn discover_once(config: MeshConfig) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = ServiceAdapter::new(config)?;
    adapter.discovery().refresh_once().await?;
    println!("{}", serde_json::to_string_pretty(&adapter.catalog().instances())?);
    Ok(())
}

async fn health_once(config: MeshConfig) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = ServiceAdapter::new(config)?;
    adapter.discovery().refresh_once().await?;
    let report = adapter.health_monitor().check_now().await;
    println!("{}", serde_json::to_string_pretty(report.as_ref())?);
    if !report.is_healthy() {
        return Err(format!("fleet is {}", report.overall).into());
    }
    Ok(())
}

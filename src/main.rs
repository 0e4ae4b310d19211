//! EdgeServe device agent - Main Entry Point
//!
//! Wires configuration, the MQTT transport, the device agent and the
//! analysis hook together, and runs until a signal or a fatal error.

use clap::{Parser, Subcommand};
use edgeserve_agent::agent::{CommandHook, DeviceAgent};
use edgeserve_agent::config::DeviceConfig;
use edgeserve_agent::observability::{
    health::HealthServer, init_default_logging, init_logging, logging, metrics::metrics,
};
use edgeserve_agent::source::{DataSource, DEFAULT_SOURCE_TOPIC};
use edgeserve_agent::transport::mqtt::MqttClient;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// EdgeServe device agent
#[derive(Parser)]
#[command(name = "edgeserve-agent")]
#[command(about = "Remotely driven device agent for edge analytics")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device agent
    Run {
        /// Override the configured group id
        #[arg(long, env = "GROUP_ID")]
        group_id: Option<String>,
    },
    /// Stream lines of a file (or stdin) to a topic
    Source {
        /// Topic the lines are sent to
        #[arg(long, default_value = DEFAULT_SOURCE_TOPIC)]
        topic: String,
        /// Input file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        verbose => {
            let level = if verbose == 1 { "DEBUG" } else { "TRACE" };
            let format = std::env::var("LOG_FORMAT").unwrap_or_default();
            init_logging(
                logging::parse_level(level),
                logging::LogFormat::parse(&format),
                false,
            );
        }
    }

    info!("Starting edgeserve-agent v{}", env!("CARGO_PKG_VERSION"));

    let (config, base_dir) = match load_configuration(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { group_id } => run_agent(config, &base_dir, group_id).await,
        Commands::Source { topic, file } => run_source(config, topic, file).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<(DeviceConfig, PathBuf), Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => ["device.toml", "config/device.toml"]
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or("No configuration file found. Provide one with -c/--config or create device.toml")?,
    };

    info!("Loading configuration from: {}", path.display());
    let config = DeviceConfig::load_from_file(&path)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, base_dir))
}

async fn run_agent(
    config: DeviceConfig,
    base_dir: &Path,
    group_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match group_id {
        Some(group_id) => config.with_group_id(group_id)?,
        None => config,
    };
    info!(group_id = %config.agent.group_id, "Application starting");

    let collector = metrics();
    collector.set_agent_state("initializing");

    let data = config.load_data_store(base_dir)?;
    info!(topics = data.len(), "Data store loaded");

    let transport = MqttClient::new(&config.agent.group_id, config.mqtt.clone())?;
    let mut agent = DeviceAgent::from_config(&config, data, transport);

    match config.analysis.as_ref() {
        Some(analysis) => {
            let hook = CommandHook::from_command(&analysis.command)
                .ok_or("[analysis] command must name a program")?;
            let hook = match &analysis.input_path {
                Some(path) => hook.with_input_path(path),
                None => hook,
            };
            agent.set_analysis_hook(hook);
        }
        None => warn!("No analysis configured; a data record will stop the agent"),
    }

    if let Some(port) = health_port() {
        let health_server = Arc::new(HealthServer::new(config.agent.group_id.clone(), port));
        tokio::spawn(health_server.start());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = shutdown_tx.send(true);
    });

    agent.start().await?;
    agent.run(shutdown_rx).await?;
    Ok(())
}

/// Port of the health server; unset or unparsable disables it
fn health_port() -> Option<u16> {
    let value = std::env::var("HEALTH_PORT").ok()?;
    match value.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            warn!(value = %value, "Ignoring invalid HEALTH_PORT");
            None
        }
    }
}

async fn run_source(
    config: DeviceConfig,
    topic: String,
    file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = match &file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut input = String::new();
            tokio::io::stdin().read_to_string(&mut input).await?;
            input
        }
    };
    let lines: Vec<String> = input.lines().map(str::to_string).collect();

    let transport = MqttClient::new(&config.agent.group_id, config.mqtt.clone())?;
    let mut source = DataSource::open(transport, topic, lines).await?;

    let drained = source.drain().await;
    let sent = source.close().await?;
    drained?;

    info!(records = sent, "Source finished");
    Ok(())
}

fn handle_config_command(config: DeviceConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!(
        group_id = %config.agent.group_id,
        data_topics = config.data.len(),
        analysis = config.analysis.is_some(),
        "Configuration validation complete"
    );
    Ok(())
}

mod config;
mod logging;
mod signals;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use regcenter::{InMemoryBackend, Registry, RegistryApi};

use crate::config::{AgentConfig, BackendKind, ConfigSource, DEFAULT_CONFIG_DIR};

/// Registry agent - registers this process and resolves peers
#[derive(Parser)]
#[command(name = "regcenter-agent")]
#[command(about = "Registry agent - registers this process and resolves peers")]
#[command(version)]
struct Cli {
    /// Path to configuration file (overrides the `Env` lookup)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory searched for `<Env>.yaml`
    #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register this instance and keep it alive until a shutdown signal
    Run,
    /// Validate configuration and backend connectivity, then exit
    Check,
    /// List healthy instances of a service
    Discover {
        /// Logical service name
        name: String,
        /// Print one randomly selected instance
        #[arg(long)]
        one: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // defaults -> YAML (if any) -> env (APP__*)
    let source = ConfigSource::resolve(cli.config.as_deref(), &cli.config_dir)?;
    let config = AgentConfig::load(&source)?;

    let _log_guard = logging::init_logging(&config.logging, cli.verbose)?;

    match &source {
        ConfigSource::File(path) => {
            tracing::info!(path = %path.display(), "Loaded configuration file");
        }
        ConfigSource::EnvironmentOnly => {
            tracing::info!("No configuration file, using defaults and environment");
        }
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_agent(&config).await,
        Commands::Check => check(&config, &source).await,
        Commands::Discover { name, one } => discover(&config, &name, one).await,
    }
}

async fn build_registry(config: &AgentConfig) -> Result<Registry> {
    let registry = match config.backend {
        BackendKind::Consul => Registry::connect(config.registry.clone()).await,
        BackendKind::Memory => {
            tracing::warn!("Using the in-process backend, instances are not visible to peers");
            Registry::with_backend(config.registry.clone(), Arc::new(InMemoryBackend::new())).await
        }
    };
    registry.with_context(|| format!("failed to connect to registry at {}", config.registry.address))
}

async fn run_agent(config: &AgentConfig) -> Result<()> {
    let registry = build_registry(config).await?;
    let instance = config.service_instance();

    tracing::info!(
        service_id = %instance.id,
        service_name = %instance.name,
        endpoint = %instance.endpoint(),
        "Registering instance"
    );
    let id = instance.id.clone();
    registry
        .register(instance)
        .await
        .with_context(|| format!("failed to register '{id}'"))?;

    let signal = signals::wait_for_shutdown().await;

    tracing::info!("Deregistering instances...");
    registry.close().await?;
    tracing::info!("Agent stopped");

    signal.map(|_| ())
}

async fn check(config: &AgentConfig, source: &ConfigSource) -> Result<()> {
    tracing::info!("Checking configuration...");
    let registry = build_registry(config).await?;
    registry.close().await?;

    println!("Configuration is valid");
    if let ConfigSource::File(path) = source {
        println!("Source: {}", display_path(path));
    }
    println!("Registry reachable at {}", config.registry.address);
    Ok(())
}

async fn discover(config: &AgentConfig, name: &str, one: bool) -> Result<()> {
    let registry = build_registry(config).await?;

    let output = if one {
        let instance = registry.random_one(name).await?;
        serde_json::to_string_pretty(&instance)?
    } else {
        let instances = registry.discovery(name).await?;
        tracing::debug!(service_name = name, count = instances.len(), "Discovered instances");
        serde_json::to_string_pretty(&instances)?
    };

    registry.close().await?;
    println!("{output}");
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

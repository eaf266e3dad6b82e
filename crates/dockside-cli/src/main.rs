//! dockside - run a test dependency container by hand

mod commands;

use clap::{Args, Parser, Subcommand};
use dockside_config::HarnessConfig;
use dockside_provider::{create_default_runtime, create_runtime, ContainerRuntime, ProviderType};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "dockside")]
#[command(author, version, about = "Test dependency container manager", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override default provider (docker or podman)
    #[arg(long, global = true, value_parser = ["docker", "podman"])]
    provider: Option<String>,

    /// Read configuration from this file instead of the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured container, print its metadata and remove it on Ctrl-C
    Up(UpArgs),

    /// Check that the container runtime is reachable
    Check,

    /// Show the resolved configuration
    Config,
}

#[derive(Args, Default)]
pub struct UpArgs {
    /// Image to run (overrides the configured image)
    #[arg(long)]
    pub image: Option<String>,

    /// Container name
    #[arg(long)]
    pub name: Option<String>,

    /// Container port to publish (repeatable)
    #[arg(long = "port", short = 'p')]
    pub ports: Vec<u16>,

    /// Readiness attempts
    #[arg(long)]
    pub tries: Option<u32>,

    /// Milliseconds between readiness attempts
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Wait for an HTTP HEAD on this container port to answer 200
    #[arg(long, conflicts_with = "tcp_port")]
    pub http_port: Option<u16>,

    /// Path for the HTTP readiness check
    #[arg(long, default_value = "/")]
    pub http_path: String,

    /// Wait for a TCP connect on this container port
    #[arg(long)]
    pub tcp_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load_from(path)?,
        None => HarnessConfig::load().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable config: {}", e);
            HarnessConfig::default()
        }),
    };
    config.apply_env_overrides()?;
    if let Some(provider) = &cli.provider {
        config.defaults.provider = provider.clone();
    }

    match cli.command {
        // Config doesn't need a runtime
        Commands::Config => commands::config(&config),
        Commands::Check => {
            let runtime = connect(cli.provider.as_deref(), &config).await?;
            commands::check(runtime.as_ref()).await
        }
        Commands::Up(args) => {
            // Resolve the container before touching any runtime
            let plan = commands::UpPlan::resolve(&mut config, &args)?;
            let runtime = connect(cli.provider.as_deref(), &config).await?;
            commands::up(runtime, plan).await
        }
    }
}

async fn connect(provider: Option<&str>, config: &HarnessConfig) -> anyhow::Result<Arc<dyn ContainerRuntime>> {
    let runtime = match provider {
        Some("docker") => create_runtime(ProviderType::Docker, config)?,
        Some("podman") => create_runtime(ProviderType::Podman, config)?,
        _ => create_default_runtime(config).await?,
    };
    Ok(runtime)
}

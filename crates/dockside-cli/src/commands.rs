//! CLI command implementations

use crate::UpArgs;
use anyhow::{Context, Result};
use dockside_config::HarnessConfig;
use dockside_core::{
    ContainerSpec, HttpProbe, LifecycleController, ReadinessProbe, RetryPolicy, TcpProbe,
};
use dockside_provider::ContainerRuntime;
use std::sync::Arc;

/// Everything `up` needs, resolved from config and flags
pub struct UpPlan {
    spec: ContainerSpec,
    policy: RetryPolicy,
    probe: Option<Arc<dyn ReadinessProbe>>,
}

impl UpPlan {
    /// Fails on a missing image or bad readiness settings
    pub fn resolve(config: &mut HarnessConfig, args: &UpArgs) -> Result<Self> {
        apply_up_args(config, args);
        Ok(Self {
            spec: ContainerSpec::from_config(config)?,
            policy: RetryPolicy::from_config(&config.readiness)?,
            probe: probe_from_args(args),
        })
    }
}

/// Start a container and keep it until Ctrl-C
pub async fn up(runtime: Arc<dyn ContainerRuntime>, plan: UpPlan) -> Result<()> {
    let controller = LifecycleController::new(runtime);
    eprintln!("Starting {}...", plan.spec.image);
    let metadata = controller.start(plan.spec, plan.probe, plan.policy).await?;

    println!("{}", serde_json::to_string_pretty(&metadata)?);
    eprintln!("Container ready. Press Ctrl-C to stop and remove it.");

    let waited = tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C");
    eprintln!("Removing container...");
    controller.stop().await?;
    waited
}

fn apply_up_args(config: &mut HarnessConfig, args: &UpArgs) {
    if let Some(image) = &args.image {
        config.container.image = Some(image.clone());
    }
    if let Some(name) = &args.name {
        config.container.name = Some(name.clone());
    }
    if !args.ports.is_empty() {
        config.container.ports = args.ports.clone();
    }
    if let Some(tries) = args.tries {
        config.readiness.tries = tries;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.readiness.interval_ms = interval_ms;
    }
}

fn probe_from_args(args: &UpArgs) -> Option<Arc<dyn ReadinessProbe>> {
    if let Some(port) = args.http_port {
        Some(Arc::new(HttpProbe::new(port, args.http_path.clone())))
    } else {
        args.tcp_port
            .map(|port| Arc::new(TcpProbe::new(port)) as Arc<dyn ReadinessProbe>)
    }
}

/// Ping the runtime and show what we are talking to
pub async fn check(runtime: &dyn ContainerRuntime) -> Result<()> {
    let info = runtime.info();
    runtime
        .ping()
        .await
        .with_context(|| format!("{} at {} is not responding", info.provider_type, info.endpoint))?;

    println!("Provider:    {}", info.provider_type);
    println!("Endpoint:    {}", info.endpoint);
    println!("API version: {}", info.api_version);

    let managed = runtime.list(true).await?;
    if managed.is_empty() {
        println!("No dockside containers found");
    } else {
        println!();
        println!("{:<14} {:<30} {:<10} {}", "ID", "IMAGE", "STATUS", "SESSION");
        for container in managed {
            println!(
                "{:<14} {:<30} {:<10} {}",
                container.id.short(),
                container.image,
                container.status,
                container.session().unwrap_or("-")
            );
        }
    }

    Ok(())
}

/// Print the resolved configuration
pub fn config(config: &HarnessConfig) -> Result<()> {
    match HarnessConfig::config_path() {
        Ok(path) => println!("# Config file: {}", path.display()),
        Err(_) => println!("# Config file: (no config directory)"),
    }
    print!("{}", config.to_toml_string()?);
    Ok(())
}

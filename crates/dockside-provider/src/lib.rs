//! Container runtime trait and implementations for dockside
//!
//! This crate provides an abstraction over container runtimes (Docker, Podman)
//! covering exactly the operations needed to provision a throwaway dependency
//! container for a test run.

mod docker;
mod error;
mod types;

pub use docker::DockerRuntime;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use dockside_config::HarnessConfig;
use std::sync::Arc;

/// Trait for container runtimes (Docker, Podman, etc.)
///
/// Implementations report a missing image or container as
/// [`ProviderError::NotFound`]; every other failure is some other variant.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is reachable
    async fn ping(&self) -> Result<()>;

    /// Look up a local image
    async fn inspect_image(&self, image: &str) -> Result<ImageId>;

    /// Pull an image from a registry
    async fn pull(&self, image: &str) -> Result<PullOutcome>;

    /// Create a container from an image
    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId>;

    /// Start a container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Get detailed information about a container
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Stop a container
    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()>;

    /// Remove a container
    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// List containers created by dockside
    async fn list(&self, all: bool) -> Result<Vec<ContainerInfo>>;

    /// Get runtime information
    fn info(&self) -> ProviderInfo;
}

/// Factory function to create a runtime based on type
pub fn create_runtime(
    provider_type: ProviderType,
    config: &HarnessConfig,
) -> Result<Arc<dyn ContainerRuntime>> {
    match provider_type {
        ProviderType::Docker => {
            let runtime = DockerRuntime::new(&config.docker_socket())?;
            Ok(Arc::new(runtime))
        }
        ProviderType::Podman => {
            // Podman serves the Docker-compatible API on its own socket
            let runtime = DockerRuntime::new_podman(&config.podman_socket())?;
            Ok(Arc::new(runtime))
        }
    }
}

/// Test if a specific runtime is available and responsive
pub async fn test_runtime_connectivity(provider_type: ProviderType, config: &HarnessConfig) -> bool {
    match create_runtime(provider_type, config) {
        Ok(runtime) => runtime.ping().await.is_ok(),
        Err(_) => false,
    }
}

/// Detect which runtimes are available on the system
/// Returns a list of (ProviderType, is_available) pairs, Docker first
pub async fn detect_available_runtimes(config: &HarnessConfig) -> Vec<(ProviderType, bool)> {
    let (docker, podman) = tokio::join!(
        test_runtime_connectivity(ProviderType::Docker, config),
        test_runtime_connectivity(ProviderType::Podman, config)
    );

    vec![(ProviderType::Docker, docker), (ProviderType::Podman, podman)]
}

/// Create the runtime named in the config, auto-detecting when none is set
///
/// Only construction can fail here; reachability is checked by the caller's
/// own `ping` so that it can be reported as a connectivity failure.
pub async fn create_default_runtime(config: &HarnessConfig) -> Result<Arc<dyn ContainerRuntime>> {
    let provider_type = match config.defaults.provider.as_str() {
        "podman" => ProviderType::Podman,
        "docker" => ProviderType::Docker,
        "" => {
            tracing::info!("No provider configured, auto-detecting...");
            let available = detect_available_runtimes(config).await;

            match available.iter().find(|(_, available)| *available) {
                Some((provider_type, _)) => {
                    tracing::info!("Auto-detected provider: {}", provider_type);
                    *provider_type
                }
                None => {
                    // Neither available, default to Docker for better error messages
                    tracing::warn!("No providers detected, defaulting to Docker");
                    ProviderType::Docker
                }
            }
        }
        other => {
            return Err(ProviderError::ConfigError(format!(
                "Unknown provider {:?} (expected docker or podman)",
                other
            )))
        }
    };

    let socket_path = match provider_type {
        ProviderType::Podman => config.podman_socket(),
        ProviderType::Docker => config.docker_socket(),
    };

    create_runtime(provider_type, config).map_err(|e| {
        let socket_exists = std::path::Path::new(socket_path.trim_start_matches("unix://")).exists();
        ProviderError::ConnectionError(format_connection_error(
            provider_type,
            &socket_path,
            socket_exists,
            &e,
        ))
    })
}

/// Format a helpful connection error message with actionable instructions
pub fn format_connection_error(
    provider: ProviderType,
    socket_path: &str,
    socket_exists: bool,
    underlying: &ProviderError,
) -> String {
    let provider_name = match provider {
        ProviderType::Podman => "Podman",
        ProviderType::Docker => "Docker",
    };

    let mut msg = format!("Cannot connect to {}\n\n", provider_name);

    if !socket_exists {
        msg.push_str(&format!(
            "The {} API socket was not found at:\n  {}\n\n",
            provider_name, socket_path
        ));

        match provider {
            ProviderType::Podman => {
                msg.push_str("To enable the Podman socket, run:\n");
                msg.push_str("  systemctl --user enable --now podman.socket\n");
            }
            ProviderType::Docker => {
                msg.push_str("To start Docker, run:\n");
                msg.push_str("  sudo systemctl enable --now docker\n");
            }
        }
    } else {
        msg.push_str(&format!(
            "The socket exists at {} but the daemon is not responding.\n\n",
            socket_path
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}

//! Harness configuration for dockside
//!
//! Located at `~/.config/dockside/config.toml`. Every field can also be
//! supplied by the test suite through environment variables, which win over
//! the file.

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Image reference override
pub const ENV_IMAGE: &str = "CONTAINER_IMAGE";
/// Container name override
pub const ENV_NAME: &str = "CONTAINER_NAME";
/// Readiness attempt count override
pub const ENV_READY_TRIES: &str = "CONTAINER_READY_TRIES";
/// Seconds to sleep between readiness attempts
pub const ENV_READY_SLEEP: &str = "CONTAINER_READY_SLEEP";
/// Provider override ("docker" or "podman")
pub const ENV_PROVIDER: &str = "DOCKSIDE_PROVIDER";
/// Docker socket override
pub const ENV_SOCKET: &str = "DOCKSIDE_SOCKET";

/// Default number of readiness attempts
pub const DEFAULT_READY_TRIES: u32 = 10;
/// Default pause between readiness attempts
pub const DEFAULT_READY_INTERVAL_MS: u64 = 3_000;

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub container: ContainerConfig,
    pub readiness: ReadinessConfig,
    pub defaults: DefaultsConfig,
    pub providers: ProvidersConfig,
}

/// The dependency container to provision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image reference, e.g. `postgres:16`
    pub image: Option<String>,
    /// Fixed container name
    pub name: Option<String>,
    /// Container ports to publish on auto-assigned host ports
    pub ports: Vec<u16>,
    /// Environment variables for the container
    pub env: BTreeMap<String, String>,
    /// Command override
    pub cmd: Option<Vec<String>>,
}

/// Readiness polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Maximum number of probe attempts
    pub tries: u32,
    /// Pause between attempts in milliseconds
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            tries: DEFAULT_READY_TRIES,
            interval_ms: DEFAULT_READY_INTERVAL_MS,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Default settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Container provider ("docker" or "podman"); empty means auto-detect
    pub provider: String,
}

/// Provider-specific configurations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub docker: DockerConfig,
    pub podman: PodmanConfig,
}

/// Docker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker socket path or URL
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Podman-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodmanConfig {
    /// Podman socket path
    pub socket: String,
}

impl Default for PodmanConfig {
    fn default() -> Self {
        Self {
            socket: default_podman_socket(),
        }
    }
}

#[cfg(target_os = "linux")]
fn default_podman_socket() -> String {
    std::env::var("XDG_RUNTIME_DIR")
        .map(|dir| format!("{}/podman/podman.sock", dir))
        .unwrap_or_else(|_| "/run/user/1000/podman/podman.sock".to_string())
}

#[cfg(target_os = "macos")]
fn default_podman_socket() -> String {
    dirs::home_dir()
        .map(|h| {
            format!(
                "{}/.local/share/containers/podman/machine/podman-machine-default/podman.sock",
                h.display()
            )
        })
        .unwrap_or_else(|| "/var/run/podman.sock".to_string())
}

#[cfg(windows)]
fn default_podman_socket() -> String {
    "//./pipe/podman-machine-default".to_string()
}

/// Expand `~` and `$VARS` in a socket path, keeping the raw value if a
/// variable is undefined.
fn expand_socket(raw: &str) -> String {
    match shellexpand::full(raw) {
        Ok(expanded) => expanded.into_owned(),
        Err(e) => {
            tracing::warn!("Could not expand socket path {}: {}", raw, e);
            raw.to_string()
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the default path, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific path (no environment overrides)
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(
            "Loaded config from {:?}: image={:?}, tries={}",
            path,
            config.container.image,
            config.readiness.tries
        );

        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(image) = get(ENV_IMAGE) {
            self.container.image = Some(image);
        }
        if let Some(name) = get(ENV_NAME) {
            self.container.name = Some(name);
        }
        if let Some(tries) = get(ENV_READY_TRIES) {
            self.readiness.tries = tries.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a positive integer, got {:?}", ENV_READY_TRIES, tries))
            })?;
        }
        if let Some(sleep) = get(ENV_READY_SLEEP) {
            let secs: f64 = sleep.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a number of seconds, got {:?}", ENV_READY_SLEEP, sleep))
            })?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must not be negative, got {}",
                    ENV_READY_SLEEP, secs
                )));
            }
            self.readiness.interval_ms = (secs * 1000.0).round() as u64;
        }
        if let Some(provider) = get(ENV_PROVIDER) {
            self.defaults.provider = provider.to_lowercase();
        }
        if let Some(socket) = get(ENV_SOCKET) {
            self.providers.docker.socket = socket;
        }

        self.validate()
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.readiness.tries == 0 {
            return Err(ConfigError::Invalid(
                "readiness.tries must be at least 1".to_string(),
            ));
        }
        match self.defaults.provider.as_str() {
            "" | "docker" | "podman" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown provider {:?} (expected docker or podman)",
                    other
                )))
            }
        }
        if matches!(&self.container.image, Some(image) if image.trim().is_empty()) {
            return Err(ConfigError::MissingImage);
        }
        Ok(())
    }

    /// The configured image, or `MissingImage`
    pub fn require_image(&self) -> Result<&str> {
        self.container
            .image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .ok_or(ConfigError::MissingImage)
    }

    /// Docker socket with `~` and environment variables expanded
    pub fn docker_socket(&self) -> String {
        expand_socket(&self.providers.docker.socket)
    }

    /// Podman socket with `~` and environment variables expanded
    pub fn podman_socket(&self) -> String {
        expand_socket(&self.providers.podman.socket)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "dockside").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

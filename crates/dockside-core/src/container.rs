//! What to run, and what the runtime reported once it ran

use crate::{HarnessError, Result};
use chrono::{DateTime, Utc};
use dockside_config::{ConfigError, HarnessConfig};
use dockside_provider::{
    ContainerDetails, CreateContainerConfig, PortConfig, PortInfo, MANAGED_LABEL, SESSION_LABEL,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Description of the dependency container to provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,
    /// Fixed container name (the runtime picks one otherwise)
    pub name: Option<String>,
    /// Container ports published on auto-assigned host ports
    pub ports: Vec<u16>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Command override
    pub cmd: Option<Vec<String>>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            ports: Vec::new(),
            env: BTreeMap::new(),
            cmd: None,
        }
    }

    /// Build from the `[container]` section; fails if no image is configured
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let image = config.require_image()?;
        Ok(Self {
            image: image.to_string(),
            name: config.container.name.clone(),
            ports: config.container.ports.clone(),
            env: config.container.env.clone(),
            cmd: config.container.cmd.clone(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(HarnessError::Config(ConfigError::MissingImage));
        }
        Ok(())
    }

    pub(crate) fn to_create_config(&self, session: &str) -> CreateContainerConfig {
        CreateContainerConfig {
            image: self.image.clone(),
            name: self.name.clone(),
            cmd: self.cmd.clone(),
            env: self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ports: self.ports.iter().copied().map(PortConfig::tcp).collect(),
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (SESSION_LABEL.to_string(), session.to_string()),
            ]),
        }
    }
}

/// Snapshot of a running container's network state.
///
/// The container IP and gateway are the fields tests rely on; port mappings
/// are filled in when ports were published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerMetadata {
    name: String,
    ip_address: String,
    gateway: String,
    ports: Vec<PortInfo>,
    started_at: Option<DateTime<Utc>>,
}

impl ContainerMetadata {
    /// Capture metadata from an inspect result.
    ///
    /// Containers on user-defined networks report an empty top-level address;
    /// the first attached network (by name) is used instead.
    pub fn from_details(details: &ContainerDetails) -> Self {
        let settings = &details.network_settings;
        let mut networks: Vec<_> = settings.networks.iter().collect();
        networks.sort_by(|a, b| a.0.cmp(b.0));

        let ip_address = settings
            .ip_address
            .clone()
            .or_else(|| networks.iter().find_map(|(_, n)| n.ip_address.clone()))
            .unwrap_or_default();
        let gateway = settings
            .gateway
            .clone()
            .or_else(|| networks.iter().find_map(|(_, n)| n.gateway.clone()))
            .unwrap_or_default();

        Self {
            name: details.name.clone(),
            ip_address,
            gateway,
            ports: details.ports.clone(),
            started_at: details
                .started_at
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container IP address on its network
    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    /// Gateway of the container's network, i.e. the host as seen from inside
    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Host port a published container port was bound to
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port && p.host_port.is_some())
            .and_then(|p| p.host_port)
    }
}

//! Docker runtime implementation using bollard

use crate::{
    ContainerDetails, ContainerId, ContainerInfo, ContainerRuntime, ContainerStatus,
    CreateContainerConfig, ImageId, NetworkInfo, NetworkSettings, PortInfo, ProviderError,
    ProviderInfo, ProviderType, PullOutcome, Result, MANAGED_LABEL,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;

/// Client timeout in seconds; image pulls can take a while
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Docker runtime using bollard crate
pub struct DockerRuntime {
    client: Docker,
    provider_type: ProviderType,
    endpoint: String,
}

impl DockerRuntime {
    /// Create a new Docker runtime client.
    ///
    /// No request is made here; the daemon is first contacted by `ping`.
    pub fn new(socket_path: &str) -> Result<Self> {
        let client = if socket_path.starts_with("http://") || socket_path.starts_with("https://") {
            Docker::connect_with_http(socket_path, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else {
            let path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(path, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        };

        Ok(Self {
            client,
            provider_type: ProviderType::Docker,
            endpoint: socket_path.to_string(),
        })
    }

    /// Create a new runtime for Podman (uses Docker-compatible API)
    pub fn new_podman(socket_path: &str) -> Result<Self> {
        let mut runtime = Self::new(socket_path)?;
        runtime.provider_type = ProviderType::Podman;
        Ok(runtime)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageId> {
        let inspect = self.client.inspect_image(image).await?;
        Ok(ImageId::new(inspect.id.unwrap_or_else(|| image.to_string())))
    }

    async fn pull(&self, image: &str) -> Result<PullOutcome> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!("{}", status);
                    }
                }
                // An `{"error": ...}` line in the pull stream: the registry refused the image
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    return Ok(PullOutcome::Rejected(error));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let id = self.inspect_image(image).await?;
        Ok(PullOutcome::Pulled(id))
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        let options = config.name.as_ref().map(|name| CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        });

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &config.ports {
            let container_port = format!("{}/{}", port.container_port, port.protocol);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: port.host_port.map(|p| p.to_string()),
            };
            port_bindings.insert(container_port, Some(vec![binding]));
        }

        let host_config = HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(options, container_config)
            .await?;

        for warning in &response.warnings {
            tracing::warn!("create {}: {}", config.image, warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let info = self.client.inspect_container(&id.0, None).await?;

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerStatus::Unknown);

        let config = info.config.as_ref();

        let mut ports = Vec::new();
        if let Some(port_map) = info.network_settings.as_ref().and_then(|n| n.ports.as_ref()) {
            for (container_port, bindings) in port_map {
                let (port, protocol) = container_port
                    .split_once('/')
                    .unwrap_or((container_port.as_str(), "tcp"));
                let port_num: u16 = port.parse().unwrap_or(0);

                match bindings {
                    Some(bindings) => {
                        for binding in bindings {
                            ports.push(PortInfo {
                                container_port: port_num,
                                host_port: binding.host_port.as_ref().and_then(|p| p.parse().ok()),
                                protocol: protocol.to_string(),
                                host_ip: binding.host_ip.clone(),
                            });
                        }
                    }
                    None => ports.push(PortInfo {
                        container_port: port_num,
                        host_port: None,
                        protocol: protocol.to_string(),
                        host_ip: None,
                    }),
                }
            }
        }
        ports.sort_by_key(|p| (p.container_port, p.host_port));

        let network_settings = info
            .network_settings
            .as_ref()
            .map(|ns| NetworkSettings {
                ip_address: ns.ip_address.clone().filter(|ip| !ip.is_empty()),
                gateway: ns.gateway.clone().filter(|gw| !gw.is_empty()),
                networks: ns
                    .networks
                    .as_ref()
                    .map(|nets| {
                        nets.iter()
                            .map(|(name, net)| {
                                (
                                    name.clone(),
                                    NetworkInfo {
                                        network_id: net.network_id.clone().unwrap_or_default(),
                                        ip_address: net.ip_address.clone().filter(|ip| !ip.is_empty()),
                                        gateway: net.gateway.clone().filter(|gw| !gw.is_empty()),
                                    },
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let started_at = state
            .and_then(|s| s.started_at.as_ref())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        Ok(ContainerDetails {
            id: id.clone(),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            status,
            started_at,
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            ports,
            network_settings,
        })
    }

    async fn stop(&self, id: &ContainerId, timeout: Option<u32>) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.unwrap_or(10) as i64,
        };
        self.client.stop_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client.remove_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn list(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions {
            all,
            filters: HashMap::from([("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)])]),
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: ContainerId::new(c.id.unwrap_or_default()),
                name: c
                    .names
                    .and_then(|n| n.first().cloned())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                status: c
                    .state
                    .as_deref()
                    .map(ContainerStatus::from)
                    .unwrap_or(ContainerStatus::Unknown),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: self.provider_type,
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
            endpoint: self.endpoint.clone(),
        }
    }
}

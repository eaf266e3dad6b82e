//! Readiness probes
//!
//! A probe performs a single bounded check against the container and says
//! whether it is ready. Retrying and sleeping are the controller's job.

use crate::ContainerMetadata;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of one readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The container is ready for tests
    Ready,
    /// Not ready yet; the controller may try again
    NotReady,
    /// The check itself failed; startup is aborted
    Erred(String),
}

/// Readiness check supplied by the test author
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Run one check. Must not loop or sleep internally.
    async fn check(&self, metadata: &ContainerMetadata) -> ProbeResult;

    /// Whether the controller should re-inspect the container before each
    /// new attempt
    fn refresh_metadata(&self) -> bool {
        true
    }
}

/// Probe backed by a synchronous closure, see [`probe_fn`]
pub struct FnProbe<F> {
    f: F,
}

/// Wrap a closure as a [`ReadinessProbe`]
pub fn probe_fn<F>(f: F) -> FnProbe<F>
where
    F: Fn(&ContainerMetadata) -> ProbeResult + Send + Sync,
{
    FnProbe { f }
}

#[async_trait]
impl<F> ReadinessProbe for FnProbe<F>
where
    F: Fn(&ContainerMetadata) -> ProbeResult + Send + Sync,
{
    async fn check(&self, metadata: &ContainerMetadata) -> ProbeResult {
        (self.f)(metadata)
    }
}

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends `HEAD http://{container ip}:{port}{path}` and waits for the expected
/// status.
///
/// Refused connections and timeouts mean the server is still starting
/// ([`ProbeResult::NotReady`]); an unexpected status is reported as an error.
pub struct HttpProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
    expected_status: u16,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(port: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self {
            client: reqwest::Client::new(),
            port,
            path,
            expected_status: 200,
            headers: Vec::new(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_token(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, metadata: &ContainerMetadata) -> String {
        format!("http://{}:{}{}", metadata.ip_address(), self.port, self.path)
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self, metadata: &ContainerMetadata) -> ProbeResult {
        if metadata.ip_address().is_empty() {
            return ProbeResult::Erred("container has no IP address to probe".to_string());
        }

        let url = self.url(metadata);
        let mut request = self.client.head(&url).timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(response) if response.status().as_u16() == self.expected_status => ProbeResult::Ready,
            Ok(response) => ProbeResult::Erred(format!(
                "HEAD {} returned {} (expected {})",
                url,
                response.status(),
                self.expected_status
            )),
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                tracing::debug!("HEAD {} not answering yet: {}", url, e);
                ProbeResult::NotReady
            }
            Err(e) => ProbeResult::Erred(e.to_string()),
        }
    }

    fn refresh_metadata(&self) -> bool {
        false
    }
}

/// Ready once a TCP connection can be opened
pub struct TcpProbe {
    port: u16,
    via_published_port: bool,
    timeout: Duration,
}

impl TcpProbe {
    /// Connect to `{container ip}:{port}`
    pub fn new(port: u16) -> Self {
        Self {
            port,
            via_published_port: false,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Connect to `127.0.0.1:{host port bound to port}` instead, for hosts
    /// where container addresses are not routable
    pub fn via_published_port(mut self) -> Self {
        self.via_published_port = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn target(&self, metadata: &ContainerMetadata) -> Result<String, String> {
        if self.via_published_port {
            metadata
                .host_port(self.port)
                .map(|host_port| format!("127.0.0.1:{}", host_port))
                .ok_or_else(|| format!("container port {} is not published", self.port))
        } else if metadata.ip_address().is_empty() {
            Err("container has no IP address to probe".to_string())
        } else {
            Ok(format!("{}:{}", metadata.ip_address(), self.port))
        }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn check(&self, metadata: &ContainerMetadata) -> ProbeResult {
        let target = match self.target(metadata) {
            Ok(target) => target,
            Err(reason) => return ProbeResult::Erred(reason),
        };

        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&target)).await {
            Ok(Ok(_)) => ProbeResult::Ready,
            Ok(Err(e)) => {
                tracing::debug!("connect {} failed: {}", target, e);
                ProbeResult::NotReady
            }
            Err(_) => ProbeResult::NotReady,
        }
    }

    fn refresh_metadata(&self) -> bool {
        // Published ports are only known once the runtime has bound them
        self.via_published_port
    }
}

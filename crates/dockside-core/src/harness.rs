//! Test harness adapters
//!
//! Bind a [`LifecycleController`] to the shape of a test: one container per
//! test case ([`ContainerHarness::run_each`]) or one shared by a whole suite
//! ([`ContainerHarness::run_suite`]). The container is stopped after the body
//! returns, and also when it panics.

use crate::{
    ContainerMetadata, ContainerSpec, HarnessError, LifecycleController, ReadinessProbe, Result,
    RetryPolicy,
};
use dockside_config::HarnessConfig;
use dockside_provider::{create_default_runtime, ContainerRuntime};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a test case gets to see of its container
#[derive(Debug, Clone)]
pub struct TestContext {
    pub container_ip: String,
    pub docker_gateway_ip: String,
    pub metadata: ContainerMetadata,
}

impl From<ContainerMetadata> for TestContext {
    fn from(metadata: ContainerMetadata) -> Self {
        Self {
            container_ip: metadata.ip_address().to_string(),
            docker_gateway_ip: metadata.gateway().to_string(),
            metadata,
        }
    }
}

/// Provisions the configured container around test bodies
pub struct ContainerHarness {
    runtime: Arc<dyn ContainerRuntime>,
    spec: ContainerSpec,
    policy: RetryPolicy,
    probe: Option<Arc<dyn ReadinessProbe>>,
}

impl ContainerHarness {
    /// Build from a loaded configuration. Fails if no image is configured.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &HarnessConfig) -> Result<Self> {
        Ok(Self::from_spec(
            runtime,
            ContainerSpec::from_config(config)?,
            RetryPolicy::from_config(&config.readiness)?,
        ))
    }

    pub fn from_spec(runtime: Arc<dyn ContainerRuntime>, spec: ContainerSpec, policy: RetryPolicy) -> Self {
        Self {
            runtime,
            spec,
            policy,
            probe: None,
        }
    }

    /// Load the user config, apply `CONTAINER_*` / `DOCKSIDE_*` environment
    /// overrides and connect to the configured runtime
    pub async fn from_env() -> Result<Self> {
        Self::connect(&HarnessConfig::load()?).await
    }

    /// Validate `config`, then connect to the runtime it names.
    ///
    /// A missing image is reported without touching any runtime, including
    /// provider auto-detection.
    pub async fn connect(config: &HarnessConfig) -> Result<Self> {
        let spec = ContainerSpec::from_config(config)?;
        let policy = RetryPolicy::from_config(&config.readiness)?;
        let runtime = create_default_runtime(config)
            .await
            .map_err(HarnessError::Connectivity)?;
        Ok(Self::from_spec(runtime, spec, policy))
    }

    pub fn with_probe(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn start_controller(&self) -> Result<(LifecycleController, ContainerMetadata)> {
        let controller = LifecycleController::new(self.runtime.clone());
        let metadata = controller
            .start(self.spec.clone(), self.probe.clone(), self.policy)
            .await?;
        Ok((controller, metadata))
    }

    /// Run `body` against a fresh container, removing it afterwards.
    ///
    /// A panic in `body` is resumed once the container is gone.
    pub async fn run_each<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let (controller, metadata) = self.start_controller().await?;
        let outcome = AssertUnwindSafe(body(TestContext::from(metadata)))
            .catch_unwind()
            .await;
        finish(outcome, controller.stop().await)
    }

    /// Start the shared container for a suite. The caller owns teardown.
    pub async fn start_suite(&self) -> Result<SuiteContext> {
        let (controller, metadata) = self.start_controller().await?;
        tracing::debug!("Suite container ready at {}", metadata.ip_address());
        Ok(SuiteContext {
            controller,
            metadata,
            torn_down: AtomicBool::new(false),
        })
    }

    /// Run `body` with one container shared by every test case in it
    pub async fn run_suite<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Arc<SuiteContext>) -> Fut,
        Fut: Future<Output = T>,
    {
        let suite = Arc::new(self.start_suite().await?);
        let outcome = AssertUnwindSafe(body(suite.clone())).catch_unwind().await;
        finish(outcome, suite.teardown().await)
    }
}

fn finish<T>(outcome: std::thread::Result<T>, stopped: Result<()>) -> Result<T> {
    match outcome {
        Ok(value) => {
            stopped?;
            Ok(value)
        }
        Err(panic) => {
            if let Err(e) = stopped {
                tracing::warn!("Failed to remove container after test panic: {}", e);
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Container state shared across the test cases of a suite
pub struct SuiteContext {
    controller: LifecycleController,
    metadata: ContainerMetadata,
    torn_down: AtomicBool,
}

impl SuiteContext {
    pub fn metadata(&self) -> &ContainerMetadata {
        &self.metadata
    }

    pub fn test_context(&self) -> TestContext {
        TestContext::from(self.metadata.clone())
    }

    pub fn session_id(&self) -> &str {
        self.controller.session_id()
    }

    /// Stop and remove the suite container. Safe to call more than once.
    pub async fn teardown(&self) -> Result<()> {
        self.controller.stop().await?;
        self.torn_down.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for SuiteContext {
    fn drop(&mut self) {
        if !self.torn_down.load(Ordering::Acquire) {
            // The controller spawns the actual removal when it is dropped
            tracing::warn!("Suite context dropped without teardown()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockRuntime, ScriptedProbe};
    use crate::ErrorKind;
    use dockside_provider::ProviderType;
    use std::time::Duration;

    fn harness(runtime: Arc<MockRuntime>) -> ContainerHarness {
        ContainerHarness::from_spec(
            runtime,
            ContainerSpec::new("canvas:latest"),
            RetryPolicy::new(3, Duration::ZERO).unwrap(),
        )
    }

    #[test]
    fn test_context_from_metadata() {
        let details = crate::test_support::mock_container_details("abc", dockside_provider::ContainerStatus::Running);
        let ctx = TestContext::from(ContainerMetadata::from_details(&details));
        assert_eq!(ctx.container_ip, "172.17.0.2");
        assert_eq!(ctx.docker_gateway_ip, "172.17.0.1");
    }

    #[test]
    fn test_new_requires_image() {
        let runtime = Arc::new(MockRuntime::new(ProviderType::Docker));
        let err = ContainerHarness::new(runtime, &HarnessConfig::default()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_connect_without_image_never_contacts_runtime() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = HarnessConfig::default();
        config.providers.docker.socket = format!("http://{}", listener.local_addr().unwrap());
        config.providers.podman.socket = format!("http://{}", listener.local_addr().unwrap());
        assert!(config.defaults.provider.is_empty());

        let err = ContainerHarness::connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        listener.set_nonblocking(true).unwrap();
        assert_eq!(
            listener.accept().map(|_| ()).unwrap_err().kind(),
            std::io::ErrorKind::WouldBlock,
            "runtime was contacted before the image was checked"
        );
    }

    #[test]
    fn test_new_uses_readiness_config() {
        let runtime = Arc::new(MockRuntime::new(ProviderType::Docker));
        let mut config = HarnessConfig::default();
        config.container.image = Some("canvas:latest".to_string());
        config.readiness.tries = 7;
        config.readiness.interval_ms = 100;

        let harness = ContainerHarness::new(runtime, &config).unwrap();
        assert_eq!(harness.policy().max_attempts(), 7);
        assert_eq!(harness.policy().interval(), Duration::from_millis(100));
        assert_eq!(harness.spec().image, "canvas:latest");
    }

    #[tokio::test]
    async fn test_run_each_stops_after_body() {
        let runtime = Arc::new(MockRuntime::new(ProviderType::Docker));
        let harness = harness(runtime.clone());

        let ip = harness
            .run_each(|ctx| async move { ctx.container_ip })
            .await
            .unwrap();

        assert_eq!(ip, "172.17.0.2");
        assert!(runtime.live_container_ids().is_empty());
    }

    #[tokio::test]
    async fn test_run_each_probe_is_used() {
        let runtime = Arc::new(MockRuntime::new(ProviderType::Docker));
        let probe = ScriptedProbe::ready_on(2);
        let harness = harness(runtime.clone()).with_probe(probe);

        harness.run_each(|_| async {}).await.unwrap();
        // initial inspect plus one refresh before the second attempt
        assert_eq!(runtime.count_calls(|c| matches!(c, MockCall::Inspect { .. })), 2);
    }

    #[tokio::test]
    async fn test_suite_teardown_twice() {
        let runtime = Arc::new(MockRuntime::new(ProviderType::Docker));
        let suite = harness(runtime.clone()).start_suite().await.unwrap();

        assert_eq!(suite.metadata().gateway(), "172.17.0.1");
        suite.teardown().await.unwrap();
        suite.teardown().await.unwrap();
        assert_eq!(runtime.count_calls(|c| matches!(c, MockCall::Remove { .. })), 1);
    }
}

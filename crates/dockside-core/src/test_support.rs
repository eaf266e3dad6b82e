//! Test support utilities for dockside-core
//!
//! Provides MockRuntime and ScriptedProbe for unit testing the
//! LifecycleController and harness adapters without a real Docker/Podman
//! runtime.

use crate::{ContainerMetadata, ProbeResult, ReadinessProbe};
use async_trait::async_trait;
use dockside_provider::*;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Ping,
    InspectImage { image: String },
    Pull { image: String },
    Create { image: String, name: Option<String> },
    Start { id: String },
    Inspect { id: String },
    Stop { id: String },
    Remove { id: String, force: bool },
    List { all: bool },
}

/// Configurable mock container runtime for testing
pub struct MockRuntime {
    pub provider_type: ProviderType,
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    /// Result for ping calls
    pub ping_result: Arc<Mutex<Result<()>>>,
    /// Result for inspect_image calls
    pub inspect_image_result: Arc<Mutex<Result<ImageId>>>,
    /// Result for pull calls
    pub pull_result: Arc<Mutex<Result<PullOutcome>>>,
    /// Results for successive create calls; once drained, create succeeds
    /// with a fresh id
    pub create_results: Arc<Mutex<VecDeque<Result<ContainerId>>>>,
    /// Result for start calls
    pub start_result: Arc<Mutex<Result<()>>>,
    /// Result for inspect calls (the id is replaced by the inspected one)
    pub inspect_result: Arc<Mutex<Result<ContainerDetails>>>,
    /// Result for stop calls
    pub stop_result: Arc<Mutex<Result<()>>>,
    /// Result for remove calls
    pub remove_result: Arc<Mutex<Result<()>>>,
    /// Containers the runtime currently knows about
    pub containers: Arc<Mutex<Vec<ContainerInfo>>>,
    next_id: AtomicUsize,
}

impl MockRuntime {
    /// Create a new mock runtime with default success results
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            calls: Arc::new(Mutex::new(Vec::new())),
            ping_result: Arc::new(Mutex::new(Ok(()))),
            inspect_image_result: Arc::new(Mutex::new(Ok(ImageId::new("sha256:mock_image_id")))),
            pull_result: Arc::new(Mutex::new(Ok(PullOutcome::Pulled(ImageId::new(
                "sha256:mock_pulled_id",
            ))))),
            create_results: Arc::new(Mutex::new(VecDeque::new())),
            start_result: Arc::new(Mutex::new(Ok(()))),
            inspect_result: Arc::new(Mutex::new(Ok(mock_container_details(
                "mock_container_id",
                ContainerStatus::Running,
            )))),
            stop_result: Arc::new(Mutex::new(Ok(()))),
            remove_result: Arc::new(Mutex::new(Ok(()))),
            containers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Make `inspect_image` report the image as missing
    pub fn with_missing_image(self) -> Self {
        *self.inspect_image_result.lock().unwrap() =
            Err(ProviderError::NotFound("No such image".to_string()));
        self
    }

    /// Record a call
    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    /// Number of recorded calls matching a predicate
    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Ids of containers the mock still holds
    pub fn live_container_ids(&self) -> Vec<String> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.id.0.clone())
            .collect()
    }
}

/// Helper to clone a Result<T> from an Arc<Mutex<Result<T>>>
fn clone_result<T: Clone>(r: &Arc<Mutex<Result<T>>>) -> Result<T> {
    let guard = r.lock().unwrap();
    match &*guard {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(clone_provider_error(e)),
    }
}

/// Clone a ProviderError (thiserror types don't implement Clone)
pub fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::NotFound(s) => ProviderError::NotFound(s.clone()),
        ProviderError::RuntimeError(s) => ProviderError::RuntimeError(s.clone()),
        ProviderError::ConfigError(s) => ProviderError::ConfigError(s.clone()),
        ProviderError::Timeout => ProviderError::Timeout,
        ProviderError::IoError(_) => ProviderError::RuntimeError("IO error (cloned)".into()),
    }
}

/// Create a mock ContainerDetails on the default bridge network
pub fn mock_container_details(id: &str, status: ContainerStatus) -> ContainerDetails {
    ContainerDetails {
        id: ContainerId::new(id),
        name: "mock_container".to_string(),
        image: "mock_image:latest".to_string(),
        status,
        started_at: Some(1_700_000_000),
        labels: HashMap::new(),
        ports: Vec::new(),
        network_settings: NetworkSettings {
            ip_address: Some("172.17.0.2".to_string()),
            gateway: Some("172.17.0.1".to_string()),
            networks: HashMap::new(),
        },
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        clone_result(&self.ping_result)
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageId> {
        self.record(MockCall::InspectImage {
            image: image.to_string(),
        });
        clone_result(&self.inspect_image_result)
    }

    async fn pull(&self, image: &str) -> Result<PullOutcome> {
        self.record(MockCall::Pull {
            image: image.to_string(),
        });
        clone_result(&self.pull_result)
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        self.record(MockCall::Create {
            image: config.image.clone(),
            name: config.name.clone(),
        });

        let scripted = self.create_results.lock().unwrap().pop_front();
        let id = match scripted {
            Some(Ok(id)) => id,
            Some(Err(e)) => return Err(e),
            None => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                ContainerId::new(format!("mock_container_{}", n))
            }
        };

        self.containers.lock().unwrap().push(ContainerInfo {
            id: id.clone(),
            name: config.name.clone().unwrap_or_else(|| id.0.clone()),
            image: config.image.clone(),
            status: ContainerStatus::Created,
            labels: config.labels.clone(),
        });
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Start { id: id.0.clone() });
        clone_result(&self.start_result)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.record(MockCall::Inspect { id: id.0.clone() });
        clone_result(&self.inspect_result).map(|mut details| {
            details.id = id.clone();
            details
        })
    }

    async fn stop(&self, id: &ContainerId, _timeout: Option<u32>) -> Result<()> {
        self.record(MockCall::Stop { id: id.0.clone() });
        clone_result(&self.stop_result)
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(MockCall::Remove {
            id: id.0.clone(),
            force,
        });
        clone_result(&self.remove_result)?;
        self.containers.lock().unwrap().retain(|c| c.id != *id);
        Ok(())
    }

    async fn list(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        self.record(MockCall::List { all });
        Ok(self.containers.lock().unwrap().clone())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: self.provider_type,
            api_version: "mock".to_string(),
            endpoint: "mock://".to_string(),
        }
    }
}

/// Probe that replays a fixed sequence of results, then repeats a fallback
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeResult>>,
    fallback: ProbeResult,
    refresh: bool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(script: Vec<ProbeResult>, fallback: ProbeResult) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            refresh: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Same result on every call
    pub fn always(result: ProbeResult) -> Self {
        Self::new(Vec::new(), result)
    }

    /// `NotReady` until the given (1-based) attempt, `Ready` from then on
    pub fn ready_on(attempt: usize) -> Self {
        Self::new(
            vec![ProbeResult::NotReady; attempt.saturating_sub(1)],
            ProbeResult::Ready,
        )
    }

    /// Don't ask the controller to re-inspect between attempts
    pub fn without_refresh(mut self) -> Self {
        self.refresh = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn check(&self, _metadata: &ContainerMetadata) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn refresh_metadata(&self) -> bool {
        self.refresh
    }
}

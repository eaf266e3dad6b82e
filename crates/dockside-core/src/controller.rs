//! Lifecycle controller - drives one dependency container from nothing to
//! ready, and back to nothing
//!
//! Startup runs on a spawned worker task:
//! 1. Connecting: ping the runtime
//! 2. Resolving: make sure the image is present, pulling it once if not
//! 3. Creating / Started: create and start the container
//! 4. Probing: poll the readiness probe within the retry budget
//!
//! The caller only awaits the worker's single outcome. Once a container has
//! been created it is always removed again before a failure is reported, and
//! a worker whose caller went away cleans up after itself.

use crate::{
    ContainerMetadata, ContainerSpec, HarnessError, ProbeResult, ReadinessProbe, Result,
    RetryPolicy,
};
use dockside_provider::{ContainerId, ContainerRuntime, PullOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};

/// Where a controller is in the container lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Resolving,
    Creating,
    Started,
    Probing,
    Ready,
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Resolving => write!(f, "resolving"),
            Self::Creating => write!(f, "creating"),
            Self::Started => write!(f, "started"),
            Self::Probing => write!(f, "probing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal result of one start attempt
#[derive(Debug)]
pub enum LifecycleOutcome {
    Ready(ContainerMetadata),
    Failed(HarnessError),
}

impl LifecycleOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn into_result(self) -> Result<ContainerMetadata> {
        match self {
            Self::Ready(metadata) => Ok(metadata),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Owns a single container lifecycle
pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntime>,
    session_id: String,
    /// The created container, shared with the startup worker so it can
    /// register the handle as soon as creation succeeds
    handle: Arc<Mutex<Option<ContainerId>>>,
    in_flight: Arc<AtomicBool>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl LifecycleController {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            runtime,
            session_id: uuid::Uuid::new_v4().to_string(),
            handle: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicBool::new(false)),
            state: Arc::new(state),
        }
    }

    /// Label value identifying containers created by this controller
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Whether a container is currently held
    pub async fn has_container(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Provision the container and wait until it is ready.
    ///
    /// The runtime work happens on a spawned task. If the future returned
    /// here is dropped (say, by a test timeout), that task still runs to
    /// completion and removes the container it created.
    pub async fn start(
        &self,
        spec: ContainerSpec,
        probe: Option<Arc<dyn ReadinessProbe>>,
        policy: RetryPolicy,
    ) -> Result<ContainerMetadata> {
        spec.validate()?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(HarnessError::InvalidState(
                "start() is already in progress on this controller".to_string(),
            ));
        }
        let in_flight = InFlightGuard(self.in_flight.clone());

        if self.handle.lock().await.is_some() {
            return Err(HarnessError::InvalidState(
                "a container is already running; call stop() first".to_string(),
            ));
        }

        let worker = StartupWorker {
            runtime: self.runtime.clone(),
            session_id: self.session_id.clone(),
            handle: self.handle.clone(),
            state: self.state.clone(),
            spec,
            probe,
            policy,
        };

        let (reply, outcome) = oneshot::channel();
        tokio::spawn(worker.run(reply, in_flight));

        match outcome.await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => {
                // The worker went away without reporting, i.e. it panicked
                self.state.send_replace(LifecycleState::Failed);
                if let Err(e) = release(self.runtime.as_ref(), &self.handle).await {
                    tracing::warn!("Cleanup after failed startup worker failed: {}", e);
                }
                Err(HarnessError::Worker(
                    "startup worker exited without reporting an outcome".to_string(),
                ))
            }
        }
    }

    /// Stop and remove the container, if one is held. Calling this again is
    /// a no-op.
    pub async fn stop(&self) -> Result<()> {
        release(self.runtime.as_ref(), &self.handle).await?;
        if !self.in_flight.load(Ordering::Acquire) {
            self.state.send_if_modified(|state| {
                let changed = *state != LifecycleState::Idle;
                *state = LifecycleState::Idle;
                changed
            });
        }
        Ok(())
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        // A running worker owns cleanup of whatever it creates
        if self.in_flight.load(Ordering::Acquire) {
            return;
        }
        let Some(id) = self.handle.try_lock().ok().and_then(|mut h| h.take()) else {
            return;
        };

        tracing::warn!(
            "Lifecycle controller dropped while container {} is still running; call stop()",
            id.short()
        );
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let runtime = self.runtime.clone();
            rt.spawn(async move {
                if let Err(e) = runtime.stop(&id, None).await {
                    tracing::warn!("Failed to stop container {}: {}", id.short(), e);
                }
                if let Err(e) = runtime.remove(&id, true).await {
                    tracing::warn!("Failed to remove container {}: {}", id.short(), e);
                }
            });
        }
    }
}

/// Clears the in-flight flag when dropped, so a panicking worker clears it too
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Stop and remove the container held in `slot`.
///
/// Returns whether there was a container to release. The slot stays locked
/// for the whole operation so concurrent callers see it only once it is gone.
async fn release(runtime: &dyn ContainerRuntime, slot: &Mutex<Option<ContainerId>>) -> Result<bool> {
    let mut guard = slot.lock().await;
    let Some(id) = guard.take() else {
        return Ok(false);
    };

    tracing::debug!("Stopping container {}", id.short());
    if let Err(e) = runtime.stop(&id, None).await {
        // Removal below is forced, so a failed stop is not fatal
        tracing::warn!("Failed to stop container {}: {}", id.short(), e);
    }

    match runtime.remove(&id, true).await {
        Ok(()) => {
            tracing::debug!("Removed container {}", id.short());
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => {
            *guard = Some(id);
            Err(HarnessError::runtime("remove")(e))
        }
    }
}

/// Everything the spawned startup task needs
struct StartupWorker {
    runtime: Arc<dyn ContainerRuntime>,
    session_id: String,
    handle: Arc<Mutex<Option<ContainerId>>>,
    state: Arc<watch::Sender<LifecycleState>>,
    spec: ContainerSpec,
    probe: Option<Arc<dyn ReadinessProbe>>,
    policy: RetryPolicy,
}

impl StartupWorker {
    fn transition(&self, next: LifecycleState) {
        let prev = self.state.send_replace(next);
        tracing::debug!("Lifecycle {} -> {}", prev, next);
    }

    /// Drive startup and report the outcome.
    ///
    /// The in-flight flag is cleared before the caller can observe the
    /// outcome, so it may immediately stop and start again.
    async fn run(self, reply: oneshot::Sender<LifecycleOutcome>, in_flight: InFlightGuard) {
        let outcome = match self.drive().await {
            Ok(metadata) => {
                self.transition(LifecycleState::Ready);
                LifecycleOutcome::Ready(metadata)
            }
            Err(err) => {
                self.transition(LifecycleState::Failed);
                tracing::debug!("Startup of {} failed: {}", self.spec.image, err);
                if let Err(cleanup) = release(self.runtime.as_ref(), &self.handle).await {
                    tracing::warn!("Cleanup after failed start did not complete: {}", cleanup);
                }
                LifecycleOutcome::Failed(err)
            }
        };

        if outcome.is_ready() && reply.is_closed() {
            self.abandon().await;
            return;
        }

        drop(in_flight);
        if let Err(LifecycleOutcome::Ready(_)) = reply.send(outcome) {
            // The caller went away between the check above and the send
            self.abandon().await;
        }
    }

    /// Remove a ready container nobody is waiting for
    async fn abandon(&self) {
        tracing::warn!("Container became ready after start() was abandoned; removing it");
        match release(self.runtime.as_ref(), &self.handle).await {
            Ok(_) => self.transition(LifecycleState::Idle),
            Err(e) => tracing::warn!("Cleanup of abandoned container failed: {}", e),
        }
    }

    async fn drive(&self) -> Result<ContainerMetadata> {
        self.transition(LifecycleState::Connecting);
        self.runtime.ping().await.map_err(HarnessError::Connectivity)?;

        self.transition(LifecycleState::Resolving);
        let mut pulled = false;
        match self.runtime.inspect_image(&self.spec.image).await {
            Ok(id) => tracing::debug!("Image {} present ({})", self.spec.image, id),
            Err(e) if e.is_not_found() => {
                self.pull().await?;
                pulled = true;
            }
            Err(e) => return Err(HarnessError::runtime("inspect_image")(e)),
        }

        self.transition(LifecycleState::Creating);
        let config = self.spec.to_create_config(&self.session_id);
        let id = match self.runtime.create(&config).await {
            Ok(id) => id,
            Err(e) if e.is_not_found() && !pulled => {
                self.pull().await?;
                self.runtime
                    .create(&config)
                    .await
                    .map_err(HarnessError::runtime("create"))?
            }
            Err(e) => return Err(HarnessError::runtime("create")(e)),
        };
        *self.handle.lock().await = Some(id.clone());
        tracing::debug!("Created container {} from {}", id.short(), self.spec.image);

        self.runtime
            .start(&id)
            .await
            .map_err(HarnessError::runtime("start"))?;
        self.transition(LifecycleState::Started);

        let metadata = self.inspect(&id).await?;

        match &self.probe {
            Some(probe) => {
                self.transition(LifecycleState::Probing);
                self.wait_until_ready(probe.as_ref(), &id, metadata).await
            }
            None => Ok(metadata),
        }
    }

    async fn pull(&self) -> Result<()> {
        let image = &self.spec.image;
        tracing::info!("{} image not found; pulling...", image);

        match self.runtime.pull(image).await {
            Ok(PullOutcome::Pulled(id)) => {
                tracing::info!("Pulled {} ({})", image, id);
                Ok(())
            }
            Ok(PullOutcome::Rejected(reason)) => Err(HarnessError::PullRejected {
                image: image.clone(),
                reason,
            }),
            Err(e) if e.is_not_found() => Err(HarnessError::PullRejected {
                image: image.clone(),
                reason: e.to_string(),
            }),
            Err(e) => Err(HarnessError::runtime("pull")(e)),
        }
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerMetadata> {
        let details = self
            .runtime
            .inspect(id)
            .await
            .map_err(HarnessError::runtime("inspect"))?;
        Ok(ContainerMetadata::from_details(&details))
    }

    async fn wait_until_ready(
        &self,
        probe: &dyn ReadinessProbe,
        id: &ContainerId,
        mut metadata: ContainerMetadata,
    ) -> Result<ContainerMetadata> {
        let max_attempts = self.policy.max_attempts();
        let interval = self.policy.interval();
        let mut waited = Duration::ZERO;

        tracing::info!("Waiting for container to start...");
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(interval).await;
                waited += interval;
                if probe.refresh_metadata() {
                    metadata = self.inspect(id).await?;
                }
            }

            tracing::info!("Number of tries left: {}", max_attempts - attempt + 1);
            match probe.check(&metadata).await {
                ProbeResult::Ready => {
                    tracing::debug!("Container {} ready after {} attempt(s)", id.short(), attempt);
                    return Ok(metadata);
                }
                ProbeResult::NotReady => {}
                ProbeResult::Erred(detail) => return Err(HarnessError::Probe(detail)),
            }
        }

        Err(HarnessError::NotReadyTimeout {
            attempts: max_attempts,
            waited,
        })
    }
}

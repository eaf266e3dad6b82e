//! End-to-end tests against a real container runtime.
//!
//! Requires Docker (or Podman via `DOCKSIDE_PROVIDER=podman`). Tests are
//! `#[ignore]` and run explicitly:
//!
//!     cargo test -p dockside-core --test e2e_docker -- --ignored

use dockside_config::HarnessConfig;
use dockside_core::{
    ContainerHarness, ContainerSpec, ErrorKind, LifecycleController, ProbeResult, RetryPolicy,
    TcpProbe,
};
use dockside_provider::{create_default_runtime, ContainerRuntime, ContainerStatus};
use std::sync::Arc;
use std::time::Duration;

const IMAGE: &str = "alpine:3.19";

async fn get_test_runtime() -> Option<Arc<dyn ContainerRuntime>> {
    let mut config = HarnessConfig::default();
    if let Err(e) = config.apply_env_overrides() {
        eprintln!("Skipping test: bad environment: {}", e);
        return None;
    }
    match create_default_runtime(&config).await {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            eprintln!("Skipping test: runtime unavailable: {}", e);
            None
        }
    }
}

fn sleeper() -> ContainerSpec {
    ContainerSpec::new(IMAGE).with_cmd(["sleep", "300"])
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(10, Duration::from_millis(500)).unwrap()
}

#[tokio::test]
#[ignore]
async fn test_start_publishes_addresses_and_stop_removes() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let controller = LifecycleController::new(runtime.clone());

    let metadata = controller.start(sleeper(), None, policy()).await.unwrap();
    assert!(!metadata.ip_address().is_empty());
    assert!(!metadata.gateway().is_empty());
    assert!(metadata.started_at().is_some());

    let ours: Vec<_> = runtime
        .list(true)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.session() == Some(controller.session_id()))
        .collect();
    assert_eq!(ours.len(), 1);
    assert_eq!(ours[0].status, ContainerStatus::Running);

    controller.stop().await.unwrap();
    controller.stop().await.unwrap();

    let leftover = runtime
        .list(true)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.session() == Some(controller.session_id()))
        .count();
    assert_eq!(leftover, 0);
}

#[tokio::test]
#[ignore]
async fn test_unknown_image_is_configuration_error() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let controller = LifecycleController::new(runtime);

    let spec = ContainerSpec::new("dockside-test/does-not-exist:never");
    let err = controller.start(spec, None, policy()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!controller.has_container().await);
}

#[tokio::test]
#[ignore]
async fn test_never_ready_container_is_removed() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let harness = ContainerHarness::from_spec(
        runtime.clone(),
        sleeper(),
        RetryPolicy::new(3, Duration::from_millis(200)).unwrap(),
    )
    // nothing listens inside the sleeper
    .with_probe(TcpProbe::new(8080).timeout(Duration::from_millis(200)));

    let err = harness.run_each(|_| async {}).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReadyTimeout);
}

#[tokio::test]
#[ignore]
async fn test_suite_probe_with_closure() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let harness = ContainerHarness::from_spec(runtime, sleeper(), policy()).with_probe(
        dockside_core::probe_fn(|m| {
            if m.ip_address().is_empty() {
                ProbeResult::NotReady
            } else {
                ProbeResult::Ready
            }
        }),
    );

    let gateway = harness
        .run_suite(|suite| async move { suite.test_context().docker_gateway_ip })
        .await
        .unwrap();
    assert!(!gateway.is_empty());
}

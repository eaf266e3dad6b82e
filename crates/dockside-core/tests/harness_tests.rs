//! Harness adapter tests against the mock runtime.
//!
//! These check the cleanup guarantees from the outside: whatever the test body
//! or the startup does, no managed container is left behind.

use dockside_core::test_support::{MockCall, MockRuntime, ScriptedProbe};
use dockside_core::{
    probe_fn, ContainerHarness, ContainerSpec, ErrorKind, HarnessError, ProbeResult, RetryPolicy,
};
use dockside_provider::{ContainerRuntime, ProviderError, ProviderType};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> Arc<MockRuntime> {
    Arc::new(MockRuntime::new(ProviderType::Docker))
}

fn harness(runtime: &Arc<MockRuntime>, attempts: u32) -> ContainerHarness {
    ContainerHarness::from_spec(
        runtime.clone(),
        ContainerSpec::new("instructure/canvas-lms:stable").with_port(3000),
        RetryPolicy::new(attempts, Duration::from_secs(1)).unwrap(),
    )
}

async fn managed_containers(runtime: &MockRuntime) -> usize {
    runtime.list(true).await.unwrap().len()
}

#[tokio::test]
async fn test_per_test_containers_are_independent() {
    let runtime = runtime();
    let harness = harness(&runtime, 1);

    let first = harness.run_each(|ctx| async move { ctx.metadata }).await.unwrap();
    let second = harness.run_each(|ctx| async move { ctx.metadata }).await.unwrap();

    assert_eq!(first.ip_address(), second.ip_address());
    assert_eq!(runtime.count_calls(|c| matches!(c, MockCall::Create { .. })), 2);
    assert_eq!(managed_containers(&runtime).await, 0);
}

#[tokio::test]
async fn test_per_test_panic_still_cleans_up() {
    let runtime = runtime();
    let harness = harness(&runtime, 1);

    let result = tokio::spawn({
        let harness = harness;
        async move {
            harness
                .run_each(|_| async {
                    panic!("assertion inside the test body");
                })
                .await
        }
    })
    .await;

    assert!(result.unwrap_err().is_panic());
    assert!(runtime.live_container_ids().is_empty());
    assert!(runtime.was_called(&MockCall::Remove {
        id: "mock_container_1".to_string(),
        force: true
    }));
}

#[tokio::test]
async fn test_suite_shares_one_container() {
    let runtime = runtime();
    let harness = harness(&runtime, 1);

    let ips = harness
        .run_suite(|suite| async move {
            let mut ips = Vec::new();
            for _ in 0..3 {
                let ctx = suite.test_context();
                assert!(!ctx.docker_gateway_ip.is_empty());
                ips.push(ctx.container_ip);
            }
            ips
        })
        .await
        .unwrap();

    assert_eq!(ips.len(), 3);
    assert_eq!(runtime.count_calls(|c| matches!(c, MockCall::Create { .. })), 1);
    assert_eq!(managed_containers(&runtime).await, 0);
}

#[tokio::test]
async fn test_suite_dropped_without_teardown_is_removed() {
    let runtime = runtime();
    let harness = harness(&runtime, 1);

    let suite = harness.start_suite().await.unwrap();
    assert_eq!(runtime.live_container_ids().len(), 1);
    drop(suite);

    // removal runs on a spawned task
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(runtime.live_container_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_error_kind_reaches_the_test() {
    let runtime = runtime();
    let harness = harness(&runtime, 5).with_probe(ScriptedProbe::always(ProbeResult::NotReady));

    let err = harness.run_each(|_| async {}).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReadyTimeout);
    assert!(matches!(err, HarnessError::NotReadyTimeout { attempts: 5, .. }));
    assert_eq!(managed_containers(&runtime).await, 0);
}

#[tokio::test]
async fn test_connectivity_error_kind_reaches_the_suite() {
    let mock = MockRuntime::new(ProviderType::Docker);
    *mock.ping_result.lock().unwrap() =
        Err(ProviderError::ConnectionError("socket not found".to_string()));
    let runtime = Arc::new(mock);

    let err = harness(&runtime, 1)
        .run_suite(|_| async { unreachable!("body must not run") })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
}

#[tokio::test]
async fn test_probe_sees_container_address() {
    let runtime = runtime();
    let harness = harness(&runtime, 3).with_probe(probe_fn(|metadata| {
        if metadata.ip_address() == "172.17.0.2" {
            ProbeResult::Ready
        } else {
            ProbeResult::Erred(format!("unexpected address {}", metadata.ip_address()))
        }
    }));

    harness.run_each(|_| async {}).await.unwrap();
}

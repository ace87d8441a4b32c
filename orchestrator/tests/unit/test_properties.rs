//! Flow guarantees: degraded ledger, short-circuiting, history bounds,
//! canary weights and dry runs

use std::sync::Arc;

use fleetdeploy::deploy::rollback::RollbackRequest;
use fleetdeploy::errors::DeployError;
use fleetdeploy::models::deployment::{DeployRequest, PortValidation, StepStatus, StrategyKind};
use fleetdeploy::models::history::HistoryStatus;
use fleetdeploy::models::project::Environment;

use crate::support::{failed, ok, FailingLedgerStore, Harness};

fn rolling(version: &str) -> DeployRequest {
    DeployRequest::new("foo", Environment::Staging, version, StrategyKind::Rolling)
}

async fn degraded() -> Harness {
    Harness::with_store(Arc::new(FailingLedgerStore), 20)
        .with_projects()
        .await
}

#[tokio::test]
async fn test_degraded_ledger_with_failing_port_check_fails_closed() {
    let harness = degraded().await;
    harness
        .executor
        .script("docker ps --filter publish=3000", failed(1, "Cannot connect to the Docker daemon"));

    let result = harness.engine.deploy(rolling("v1")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.port_validation, PortValidation::Rejected);
    assert_eq!(result.step_names(), vec!["port_validation"]);
    assert!(result.steps[0].error.as_deref().unwrap().contains("fallback probe failed"));
    assert!(!harness.executor.ran("docker run"));
}

#[tokio::test]
async fn test_degraded_ledger_with_bound_port_fails_closed() {
    let harness = degraded().await;
    harness
        .executor
        .script("docker ps --filter publish=3000", ok("billing-api\n"));

    let result = harness.engine.deploy(rolling("v1")).await.unwrap();

    assert!(!result.success);
    assert!(result.steps[0].error.as_deref().unwrap().contains("billing-api"));
    assert!(!harness.executor.ran("docker run"));
}

#[tokio::test]
async fn test_degraded_ledger_with_host_listener_fails_closed() {
    let harness = degraded().await;
    harness.executor.script(
        "ss -tlnH",
        ok("LISTEN 0      511          0.0.0.0:3000      0.0.0.0:*\n"),
    );

    let result = harness.engine.deploy(rolling("v1")).await.unwrap();

    assert!(!result.success);
    assert!(result.steps[0].error.as_deref().unwrap().contains("host process"));
}

#[tokio::test]
async fn test_degraded_ledger_with_free_port_deploys_via_fallback() {
    let harness = degraded().await;
    harness
        .executor
        .script("docker ps --filter publish=3000", ok("foo-staging\n"));

    let result = harness.engine.deploy(rolling("v1")).await.unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.port_validation, PortValidation::Fallback);
    let validation = result.step("port_validation").unwrap();
    assert!(validation.output.as_deref().unwrap().contains("validated via fallback"));
}

#[tokio::test]
async fn test_degraded_ledger_rejects_container_sharing_a_name_prefix() {
    let harness = degraded().await;
    // Staging container of a project named `foo-staging`
    harness
        .executor
        .script("docker ps --filter publish=3000", ok("foo-staging-staging\n"));

    let result = harness.engine.deploy(rolling("v1")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.port_validation, PortValidation::Rejected);
    assert_eq!(result.step_names(), vec!["port_validation"]);
    assert!(result.steps[0].error.as_deref().unwrap().contains("foo-staging-staging"));
    assert!(!harness.executor.ran("docker stop"));
    assert!(!harness.executor.ran("docker run"));
}

#[tokio::test]
async fn test_degraded_ledger_rejects_canary() {
    let harness = degraded().await;
    let mut request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::Canary);
    request.canary_weight = Some(10);

    let err = harness.engine.deploy(request).await.unwrap_err();

    assert!(matches!(err, DeployError::PortLedgerUnavailable(_)));
    assert!(harness.executor.commands().is_empty());
}

#[tokio::test]
async fn test_degraded_ledger_without_configured_port_fails_closed() {
    let harness = degraded().await;
    let mut request = DeployRequest::new("foo", Environment::Preview, "abc", StrategyKind::Preview);
    request.pr_number = Some("3".to_string());

    let result = harness.engine.deploy(request).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.port_validation, PortValidation::Rejected);
    assert!(!harness.executor.ran("docker run"));
}

#[tokio::test]
async fn test_blocking_failure_stops_the_pipeline() {
    let harness = Harness::new().with_projects().await;
    harness.executor.script("docker run -d", failed(125, "invalid reference format"));

    let result = harness.engine.deploy(rolling("v1")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.steps.last().unwrap().name, "start_new_container");
    assert!(result.step("healthcheck").is_none());
    assert!(result.step("update_history").is_none());
    assert!(!harness.executor.ran("{{json .State}}"));
    assert!(harness.engine.history().load("foo", Environment::Staging).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_soft_failure_does_not_stop_the_pipeline() {
    let harness = Harness::new().with_projects().await;
    harness
        .executor
        .script("docker stop", failed(1, "permission denied"));

    let result = harness.engine.deploy(rolling("v1")).await.unwrap();

    assert!(result.success, "{:?}", result.error);
    let stop = result.step("stop_old_container").unwrap();
    assert_eq!(stop.status, StepStatus::Failed);
    assert!(stop.error.as_deref().unwrap().contains("permission denied"));
    assert_eq!(result.step("start_new_container").unwrap().status, StepStatus::Success);
    assert_eq!(result.step("update_history").unwrap().status, StepStatus::Success);
}

#[tokio::test]
async fn test_history_stays_bounded_with_one_active_entry() {
    let harness = Harness::with_store(
        Arc::new(fleetdeploy::ports::store::MemoryLedgerStore::new()),
        3,
    )
    .with_projects()
    .await;

    for i in 1..=6 {
        let result = harness.engine.deploy(rolling(&format!("v{}", i))).await.unwrap();
        assert!(result.success);

        let log = harness.engine.history().load("foo", Environment::Staging).await.unwrap();
        assert!(log.len() <= 3);
        assert_eq!(
            log.entries
                .iter()
                .filter(|e| e.status == HistoryStatus::Active)
                .count(),
            1
        );
        assert_eq!(log.entries[0].version, format!("v{}", i));
        if log.len() > 1 {
            assert_eq!(log.entries[1].status, HistoryStatus::Previous);
        }
    }
}

#[tokio::test]
async fn test_canary_weights_outside_percent_are_rejected() {
    let harness = Harness::new().with_projects().await;

    for weight in [101, 1000, u32::MAX] {
        let mut request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::Canary);
        request.canary_weight = Some(weight);
        assert!(matches!(
            harness.engine.deploy(request).await,
            Err(DeployError::InvalidRequest(_))
        ));
    }
    assert!(harness.executor.commands().is_empty());
}

#[tokio::test]
async fn test_canary_weight_bounds_are_accepted() {
    let harness = Harness::new().with_projects().await;
    assert!(harness.engine.deploy(rolling("v1")).await.unwrap().success);

    for weight in [0, 100] {
        let mut request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::Canary);
        request.canary_weight = Some(weight);
        let result = harness.engine.deploy(request).await.unwrap();
        assert!(result.success, "{:?}", result.error);
    }
    let calls = harness.router.calls();
    assert!(calls.contains(&"split foo.staging.example.com 3000:100,3001:0".to_string()));
    assert!(calls.contains(&"split foo.staging.example.com 3000:0,3001:100".to_string()));
}

#[tokio::test]
async fn test_rollback_dry_run_touches_nothing() {
    let harness = Harness::new().with_projects().await;
    for version in ["v1", "v2"] {
        assert!(harness.engine.deploy(rolling(version)).await.unwrap().success);
    }
    let before = harness.engine.history().load("foo", Environment::Staging).await.unwrap();
    let ledger_before = harness.engine.port_status(Some("foo")).await.unwrap();
    harness.executor.clear();

    let result = harness
        .engine
        .rollbacks()
        .rollback(RollbackRequest {
            project: "foo".to_string(),
            environment: Environment::Staging,
            version: None,
            dry_run: true,
            skip_healthcheck: false,
        })
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.version, "v1");
    assert_eq!(result.port_validation, PortValidation::Simulated);
    assert!(result.steps.iter().all(|s| s.simulated && s.status == StepStatus::Skipped));
    assert_eq!(result.steps.len(), 8);

    assert!(harness.executor.commands().is_empty());
    assert_eq!(harness.executor.connects(), 0);
    let after = harness.engine.history().load("foo", Environment::Staging).await.unwrap();
    assert_eq!(after, before);
    let ledger_after = harness.engine.port_status(Some("foo")).await.unwrap();
    assert_eq!(ledger_after.commitments, ledger_before.commitments);
    assert!(ledger_after.reservations.is_empty());
}

//! Deployment engine scenarios

use fleetdeploy::errors::DeployError;
use fleetdeploy::models::deployment::{DeployRequest, PortValidation, StepStatus, StrategyKind};
use fleetdeploy::models::history::HistoryStatus;
use fleetdeploy::models::project::Environment;
use fleetdeploy::models::rollout::{CanaryMetadata, Slot, SlotMarker};
use fleetdeploy::deploy::engine::PromoteOptions;
use fleetdeploy::ports::store::PortKey;
use fleetdeploy::storage::state::{keys, load, save};

use crate::support::{failed, ok, Harness, STARTING_STATE};

fn rolling(project: &str, version: &str) -> DeployRequest {
    DeployRequest::new(project, Environment::Staging, version, StrategyKind::Rolling)
}

#[tokio::test]
async fn test_rolling_deploy_runs_every_step() {
    let harness = Harness::new().with_projects().await;

    let result = harness.engine.deploy(rolling("foo", "v1.2.3")).await.unwrap();

    assert_eq!(
        result.step_names(),
        vec![
            "port_validation",
            "pull_image",
            "backup_current",
            "verify_config",
            "stop_old_container",
            "start_new_container",
            "healthcheck",
            "update_history",
        ]
    );
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Success));
    assert!(result.success);
    assert_eq!(result.port, Some(3000));
    assert_eq!(result.port_validation, PortValidation::Reserved);

    assert!(harness.executor.ran("docker run -d --name foo-staging "));
    assert!(harness.executor.ran("-p 3000:8080"));
    assert_eq!(harness.executor.connects(), 1);

    let commitment = harness
        .engine
        .ledger()
        .commitment_for(&PortKey::new("foo", Environment::Staging, "app"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(commitment.port, 3000);
    assert!(harness.engine.ledger().reservations().await.unwrap().is_empty());

    let history = harness.engine.history().load("foo", Environment::Staging).await.unwrap();
    assert_eq!(history.active().unwrap().version, "v1.2.3");
    assert_eq!(harness.notifier.titles().len(), 1);
}

#[tokio::test]
async fn test_unregistered_project_is_rejected() {
    let harness = Harness::new();

    let err = harness.engine.deploy(rolling("ghost", "v1")).await.unwrap_err();

    assert!(matches!(err, DeployError::ConfigMissing(_)));
    assert!(harness.executor.commands().is_empty());
}

#[tokio::test]
async fn test_invalid_versions_are_rejected() {
    let harness = Harness::new().with_projects().await;

    for version in ["", "-rc1", "v1;rm -rf /", "v 1"] {
        let err = harness.engine.deploy(rolling("foo", version)).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidRequest(_)), "{}", version);
    }
    assert_eq!(harness.executor.connects(), 0);
}

#[tokio::test]
async fn test_canary_weight_out_of_range_is_rejected_before_any_command() {
    let harness = Harness::new().with_projects().await;
    let mut request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::Canary);
    request.canary_weight = Some(150);

    let err = harness.engine.deploy(request).await.unwrap_err();

    assert!(matches!(err, DeployError::InvalidRequest(_)));
    assert!(harness.executor.commands().is_empty());
    assert_eq!(harness.executor.connects(), 0);
    assert!(harness.engine.ledger().reservations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blue_green_health_timeout_keeps_active_slot() {
    let harness = Harness::new().with_projects().await;
    let marker = SlotMarker {
        active: Slot::Blue,
        version: Some("v1".to_string()),
        updated_at: chrono::Utc::now(),
    };
    save(harness.state.as_ref(), &keys::slot("foo", Environment::Staging), &marker)
        .await
        .unwrap();
    harness.executor.script("{{json .State}}", ok(STARTING_STATE));

    let request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::BlueGreen);
    let result = harness.engine.deploy(request).await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.step_names(),
        vec!["port_validation", "deploy_inactive_slot", "healthcheck"]
    );
    let health = result.step("healthcheck").unwrap();
    assert_eq!(health.status, StepStatus::Failed);
    assert!(health.error.as_deref().unwrap().contains("3 attempts"));

    // Only the new slot is removed
    assert!(harness.executor.ran("docker stop -t 10 foo-staging-green"));
    assert!(!harness.executor.ran("foo-staging-blue"));
    assert!(harness.router.calls().is_empty());

    let after: Option<SlotMarker> = load(harness.state.as_ref(), &keys::slot("foo", Environment::Staging))
        .await
        .unwrap();
    assert_eq!(after, Some(marker));

    let green = PortKey::new("foo", Environment::Staging, "app-green");
    assert!(harness.engine.ledger().commitment_for(&green).await.unwrap().is_none());
    assert!(harness.engine.ledger().reservations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blue_green_alternates_slots() {
    let harness = Harness::new().with_projects().await;

    for (version, slot, port) in [("v1", Slot::Green, 3500), ("v2", Slot::Blue, 3000)] {
        harness.executor.clear();
        let request = DeployRequest::new("foo", Environment::Staging, version, StrategyKind::BlueGreen);
        let result = harness.engine.deploy(request).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.port, Some(port));

        let marker: SlotMarker = load(harness.state.as_ref(), &keys::slot("foo", Environment::Staging))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(marker.active, slot);
        assert_eq!(marker.version.as_deref(), Some(version));
    }

    assert_eq!(
        harness.router.calls(),
        vec![
            "route foo.staging.example.com 3500",
            "reload",
            "route foo.staging.example.com 3000",
            "reload",
        ]
    );
    // The green slot stays up for a fast switch back
    assert!(harness.executor.ran("docker stop -t 10 foo-staging-blue"));
    assert!(!harness.executor.ran("foo-staging-green"));
}

#[tokio::test]
async fn test_canary_then_promote() {
    let harness = Harness::new().with_projects().await;
    assert!(harness.engine.deploy(rolling("foo", "v1")).await.unwrap().success);

    let mut request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::Canary);
    request.canary_weight = Some(20);
    let canary = harness.engine.deploy(request).await.unwrap();
    assert!(canary.success, "{:?}", canary.error);
    assert_eq!(canary.port, Some(3001));
    assert!(harness
        .router
        .calls()
        .contains(&"split foo.staging.example.com 3000:80,3001:20".to_string()));

    let metadata: CanaryMetadata = load(harness.state.as_ref(), &keys::canary("foo", Environment::Staging))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metadata.container, "foo-staging-canary");
    assert_eq!(metadata.stable_port, 3000);

    // A canary is never recorded as the active version
    let history = harness.engine.history().load("foo", Environment::Staging).await.unwrap();
    assert_eq!(history.active().unwrap().version, "v1");

    harness.executor.clear();
    let promoted = harness
        .engine
        .promote("foo", Environment::Staging, PromoteOptions::default())
        .await
        .unwrap();
    assert!(promoted.success, "{:?}", promoted.error);
    assert_eq!(promoted.strategy, StrategyKind::Promote);
    assert_eq!(promoted.port, Some(3000));
    let names = promoted.step_names();
    assert_eq!(
        &names[names.len() - 3..],
        &["reset_route", "remove_canary", "clear_canary_metadata"]
    );
    assert!(harness.executor.ran("docker stop -t 10 foo-staging-canary"));

    let cleared: Option<CanaryMetadata> =
        load(harness.state.as_ref(), &keys::canary("foo", Environment::Staging))
            .await
            .unwrap();
    assert!(cleared.is_none());
    let canary_key = PortKey::new("foo", Environment::Staging, "app-canary");
    assert!(harness.engine.ledger().commitment_for(&canary_key).await.unwrap().is_none());

    let history = harness.engine.history().load("foo", Environment::Staging).await.unwrap();
    assert_eq!(history.active().unwrap().version, "v2");
    assert_eq!(history.entries[1].status, HistoryStatus::Previous);
}

#[tokio::test]
async fn test_promote_without_canary_is_rejected() {
    let harness = Harness::new().with_projects().await;

    let err = harness
        .engine
        .promote("foo", Environment::Production, PromoteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::InvalidRequest(_)));
    assert!(harness.executor.commands().is_empty());
}

#[tokio::test]
async fn test_port_held_by_other_project_rejects_deploy() {
    let harness = Harness::new().with_projects().await;
    let ledger = harness.engine.ledger();
    let reservation = ledger
        .reserve(&PortKey::new("bar", Environment::Staging, "app"), 3000)
        .await
        .unwrap();
    ledger.commit(&reservation.token).await.unwrap();

    let result = harness.engine.deploy(rolling("foo", "v1")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.port_validation, PortValidation::Rejected);
    assert_eq!(result.step_names(), vec!["port_validation"]);
    assert!(result.steps[0].error.as_deref().unwrap().contains("bar/staging/app"));
    assert!(!harness.executor.ran("docker run"));
}

#[tokio::test]
async fn test_concurrent_deploys_of_one_environment_are_serialised() {
    let harness = Harness::new().with_projects().await;

    let (first, second) = tokio::join!(
        harness.engine.deploy(rolling("foo", "v1")),
        harness.engine.deploy(rolling("foo", "v2")),
    );

    assert!(first.unwrap().success);
    assert!(second.unwrap().success);
    let history = harness.engine.history().load("foo", Environment::Staging).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history
            .entries
            .iter()
            .filter(|e| e.status == HistoryStatus::Active)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_failed_start_releases_reservation() {
    let harness = Harness::new().with_projects().await;
    harness
        .executor
        .script("docker run -d", failed(125, "port is already allocated"));

    let result = harness.engine.deploy(rolling("foo", "v1")).await.unwrap();

    assert!(!result.success);
    let start = result.step("start_new_container").unwrap();
    assert_eq!(start.status, StepStatus::Failed);
    assert!(start.error.as_deref().unwrap().contains("port is already allocated"));
    assert!(result.error.as_deref().unwrap().starts_with("start_new_container:"));

    let ledger = harness.engine.ledger();
    assert!(ledger.reservations().await.unwrap().is_empty());
    assert!(ledger
        .commitment_for(&PortKey::new("foo", Environment::Staging, "app"))
        .await
        .unwrap()
        .is_none());
}

fn canary(weight: u32) -> DeployRequest {
    let mut request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::Canary);
    request.canary_weight = Some(weight);
    request
}

/// Index of the command starting the named container
fn started_at(commands: &[String], container: &str) -> usize {
    let prefix = format!("docker run -d --name {} ", container);
    commands.iter().position(|c| c.starts_with(&prefix)).unwrap()
}

#[tokio::test]
async fn test_canary_without_stable_instance_is_rejected() {
    let harness = Harness::new().with_projects().await;

    let err = harness.engine.deploy(canary(10)).await.unwrap_err();

    assert!(matches!(err, DeployError::ConfigMissing(_)));
    assert!(harness.executor.commands().is_empty());
    assert_eq!(harness.executor.connects(), 0);
    assert!(harness.router.calls().is_empty());
    assert!(harness.engine.ledger().reservations().await.unwrap().is_empty());
    assert!(harness.engine.ledger().commitments().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_canary_health_failure_tears_down_canary_only() {
    let harness = Harness::new().with_projects().await;
    assert!(harness.engine.deploy(rolling("foo", "v1")).await.unwrap().success);
    harness.executor.clear();
    let routes_before = harness.router.calls();
    harness.executor.script("{{json .State}}", ok(STARTING_STATE));

    let result = harness.engine.deploy(canary(10)).await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.step_names(),
        vec!["port_validation", "deploy_canary", "healthcheck"]
    );
    let commands = harness.executor.commands();
    let run_at = started_at(&commands, "foo-staging-canary");
    assert!(commands[run_at..]
        .iter()
        .any(|c| c == "docker stop -t 10 foo-staging-canary"));
    assert!(!commands.iter().any(|c| c == "docker stop -t 10 foo-staging"));
    assert!(!commands.iter().any(|c| c == "docker rm foo-staging"));
    assert_eq!(harness.router.calls(), routes_before);

    let metadata: Option<CanaryMetadata> =
        load(harness.state.as_ref(), &keys::canary("foo", Environment::Staging))
            .await
            .unwrap();
    assert!(metadata.is_none());

    let ledger = harness.engine.ledger();
    let canary_key = PortKey::new("foo", Environment::Staging, "app-canary");
    assert!(ledger.commitment_for(&canary_key).await.unwrap().is_none());
    assert!(ledger.reservations().await.unwrap().is_empty());
    let stable = ledger
        .commitment_for(&PortKey::new("foo", Environment::Staging, "app"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stable.port, 3000);
}

#[tokio::test]
async fn test_canary_split_failure_removes_canary_and_restores_route() {
    let harness = Harness::new().with_projects().await;
    assert!(harness.engine.deploy(rolling("foo", "v1")).await.unwrap().success);
    harness.executor.clear();
    let routes_before = harness.router.calls().len();
    harness.router.fail_once("split");

    let result = harness.engine.deploy(canary(20)).await.unwrap();

    assert!(!result.success);
    let split = result.steps.last().unwrap();
    assert_eq!(split.name, "configure_traffic_split");
    assert_eq!(split.status, StepStatus::Failed);
    assert!(split.output.as_deref().unwrap().contains("removed foo-staging-canary"));
    assert_eq!(
        harness.router.calls()[routes_before..],
        [
            "split foo.staging.example.com 3000:80,3001:20",
            "route foo.staging.example.com 3000",
            "reload",
        ]
    );

    let commands = harness.executor.commands();
    let run_at = started_at(&commands, "foo-staging-canary");
    assert!(commands[run_at..].iter().any(|c| c == "docker rm foo-staging-canary"));
    assert!(!commands.iter().any(|c| c == "docker stop -t 10 foo-staging"));

    let ledger = harness.engine.ledger();
    let canary_key = PortKey::new("foo", Environment::Staging, "app-canary");
    assert!(ledger.commitment_for(&canary_key).await.unwrap().is_none());
    assert!(ledger.reservations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blue_green_switch_failure_removes_new_slot_and_restores_route() {
    let harness = Harness::new().with_projects().await;
    let marker = SlotMarker {
        active: Slot::Blue,
        version: Some("v1".to_string()),
        updated_at: chrono::Utc::now(),
    };
    save(harness.state.as_ref(), &keys::slot("foo", Environment::Staging), &marker)
        .await
        .unwrap();
    harness.router.fail_once("route");

    let request = DeployRequest::new("foo", Environment::Staging, "v2", StrategyKind::BlueGreen);
    let result = harness.engine.deploy(request).await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.step_names(),
        vec!["port_validation", "deploy_inactive_slot", "healthcheck", "switch_traffic"]
    );
    let switch = result.step("switch_traffic").unwrap();
    assert_eq!(switch.status, StepStatus::Failed);
    assert!(switch.output.as_deref().unwrap().contains("removed foo-staging-green"));
    assert_eq!(
        harness.router.calls(),
        vec![
            "route foo.staging.example.com 3500",
            "route foo.staging.example.com 3000",
            "reload",
        ]
    );

    let commands = harness.executor.commands();
    let run_at = started_at(&commands, "foo-staging-green");
    assert!(commands[run_at..].iter().any(|c| c == "docker rm foo-staging-green"));
    assert!(!harness.executor.ran("foo-staging-blue"));

    let after: Option<SlotMarker> = load(harness.state.as_ref(), &keys::slot("foo", Environment::Staging))
        .await
        .unwrap();
    assert_eq!(after, Some(marker));
    let green = PortKey::new("foo", Environment::Staging, "app-green");
    assert!(harness.engine.ledger().commitment_for(&green).await.unwrap().is_none());
    assert!(harness.engine.ledger().reservations().await.unwrap().is_empty());
}

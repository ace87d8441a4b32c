//! Rollback manager tests

use fleetdeploy::deploy::rollback::RollbackRequest;
use fleetdeploy::errors::DeployError;
use fleetdeploy::models::deployment::{DeployRequest, StrategyKind};
use fleetdeploy::models::history::HistoryStatus;
use fleetdeploy::models::project::Environment;
use tokio_test::{assert_err, assert_ok};

use crate::support::Harness;

fn request(project: &str, version: Option<&str>) -> RollbackRequest {
    RollbackRequest {
        project: project.to_string(),
        environment: Environment::Production,
        version: version.map(str::to_string),
        dry_run: false,
        skip_healthcheck: false,
    }
}

async fn deploy_versions(harness: &Harness, versions: &[&str]) {
    for version in versions {
        let request = DeployRequest::new("foo", Environment::Production, *version, StrategyKind::Rolling);
        let result = assert_ok!(harness.engine.deploy(request).await);
        assert!(result.success, "{:?}", result.error);
    }
}

#[tokio::test]
async fn test_rollback_without_history_fails() {
    let harness = Harness::new().with_projects().await;

    let err = assert_err!(harness.engine.rollbacks().rollback(request("bar", None)).await);

    assert!(matches!(
        err,
        DeployError::NoHistory { ref project, environment: Environment::Production } if project == "bar"
    ));
    assert!(harness.executor.commands().is_empty());
    assert_eq!(harness.executor.connects(), 0);
}

#[tokio::test]
async fn test_rollback_to_previous_version() {
    let harness = Harness::new().with_projects().await;
    deploy_versions(&harness, &["v1", "v2"]).await;
    harness.executor.clear();

    let result = harness
        .engine
        .rollbacks()
        .rollback(request("foo", None))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.strategy, StrategyKind::Rollback);
    assert_eq!(result.version, "v1");
    assert_eq!(result.port, Some(4000));
    // Rollbacks always pull the image
    assert!(harness.executor.ran("docker pull ghcr.io/acme/foo:v1"));

    let history = harness.engine.history().load("foo", Environment::Production).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.active().unwrap().version, "v1");
    assert_eq!(history.entries[1].version, "v2");
    assert_eq!(history.entries[1].status, HistoryStatus::Previous);
}

#[tokio::test]
async fn test_rollback_of_a_rollback_returns_forward() {
    let harness = Harness::new().with_projects().await;
    deploy_versions(&harness, &["v1", "v2"]).await;
    let rollbacks = harness.engine.rollbacks();

    assert_eq!(rollbacks.rollback(request("foo", None)).await.unwrap().version, "v1");
    assert_eq!(rollbacks.rollback(request("foo", None)).await.unwrap().version, "v2");
}

#[tokio::test]
async fn test_explicit_version_outside_history() {
    let harness = Harness::new().with_projects().await;
    deploy_versions(&harness, &["v2"]).await;

    let target = harness
        .engine
        .rollbacks()
        .resolve_target("foo", Environment::Production, Some("v1.9"))
        .await
        .unwrap();
    assert_eq!(target.version, "v1.9");
    assert!(target.image.is_none());

    let result = harness
        .engine
        .rollbacks()
        .rollback(request("foo", Some("v1.9")))
        .await
        .unwrap();
    assert!(result.success);
    assert!(harness.executor.ran("docker pull ghcr.io/acme/foo:v1.9"));
}

#[tokio::test]
async fn test_rollback_rejects_previews_and_bad_versions() {
    let harness = Harness::new().with_projects().await;
    let rollbacks = harness.engine.rollbacks();

    let mut preview = request("foo", None);
    preview.environment = Environment::Preview;
    assert!(matches!(
        rollbacks.rollback(preview).await,
        Err(DeployError::InvalidRequest(_))
    ));
    assert!(matches!(
        rollbacks.rollback(request("foo", Some("../v1"))).await,
        Err(DeployError::InvalidRequest(_))
    ));
    assert!(harness.executor.commands().is_empty());
}

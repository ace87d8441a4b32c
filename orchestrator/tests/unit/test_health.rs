//! Health gate tests

use std::sync::Arc;
use std::time::Duration;

use fleetdeploy::deploy::health::{HealthGate, HealthStatus, HealthTarget};
use fleetdeploy::exec::docker::ContainerRuntime;

use crate::support::{failed, ok, ScriptedExecutor, StaticProbe, HEALTHY_STATE, STARTING_STATE};

fn gate(state: fleetdeploy::exec::ExecOutput, http_status: u16) -> (HealthGate, Arc<ScriptedExecutor>) {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.script("{{json .State}}", state);
    let runtime = ContainerRuntime::new(
        executor.clone(),
        Duration::from_secs(5),
        Duration::from_secs(5),
    );
    let gate = HealthGate::new(
        runtime,
        Arc::new(StaticProbe {
            status: http_status,
        }),
        "127.0.0.1",
    );
    (gate, executor)
}

fn target() -> HealthTarget {
    HealthTarget {
        container: "foo-staging".to_string(),
        port: 3000,
        path: "/health".to_string(),
    }
}

#[tokio::test]
async fn test_declared_healthy() {
    let (gate, _) = gate(ok(HEALTHY_STATE), 500);
    assert_eq!(
        gate.poll(&target(), 3, Duration::ZERO).await,
        HealthStatus::Healthy { attempts: 1 }
    );
}

#[tokio::test]
async fn test_declared_status_wins_over_http() {
    let (gate, executor) = gate(ok(STARTING_STATE), 200);

    assert_eq!(
        gate.poll(&target(), 2, Duration::ZERO).await,
        HealthStatus::Timeout { attempts: 2 }
    );
    assert_eq!(executor.commands().len(), 2);
}

#[tokio::test]
async fn test_http_fallback_without_declared_health() {
    let (gate, _) = gate(ok(r#"{"Status":"running","Running":true,"ExitCode":0}"#), 204);
    assert_eq!(
        gate.poll(&target(), 3, Duration::ZERO).await,
        HealthStatus::Healthy { attempts: 1 }
    );
}

#[tokio::test]
async fn test_http_errors_time_out() {
    let (gate, executor) = gate(ok(r#"{"Status":"running","Running":true,"ExitCode":0}"#), 503);

    assert_eq!(
        gate.poll(&target(), 4, Duration::from_millis(1)).await,
        HealthStatus::Timeout { attempts: 4 }
    );
    assert_eq!(executor.commands().len(), 4);
}

#[tokio::test]
async fn test_exited_container_fails_immediately() {
    let (gate, executor) = gate(ok(r#"{"Status":"exited","Running":false,"ExitCode":1}"#), 200);

    let status = gate.poll(&target(), 5, Duration::ZERO).await;

    assert!(matches!(status, HealthStatus::Unhealthy(ref reason) if reason.contains("exit code 1")));
    assert_eq!(executor.commands().len(), 1);
}

#[tokio::test]
async fn test_missing_container_is_unhealthy() {
    let (gate, _) = gate(failed(1, "Error: No such object: foo-staging"), 200);

    assert!(matches!(
        gate.poll(&target(), 5, Duration::ZERO).await,
        HealthStatus::Unhealthy(_)
    ));
}

#[tokio::test]
async fn test_zero_attempts_still_polls_once() {
    let (gate, _) = gate(ok(HEALTHY_STATE), 200);
    assert_eq!(
        gate.poll(&target(), 0, Duration::ZERO).await,
        HealthStatus::Healthy { attempts: 1 }
    );
}

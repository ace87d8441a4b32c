//! Scripted collaborators shared by the tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetdeploy::deploy::context::StepServices;
use fleetdeploy::deploy::engine::{DeploymentEngine, EngineOptions};
use fleetdeploy::deploy::health::{HealthGate, HttpProbe};
use fleetdeploy::deploy::history::HistoryStore;
use fleetdeploy::errors::{DeployError, LedgerError};
use fleetdeploy::exec::docker::ContainerRuntime;
use fleetdeploy::exec::{ExecOptions, ExecOutput, RemoteExecutor};
use fleetdeploy::models::project::{
    EnvironmentConfig, Environment, HealthCheckConfig, ImageRef, PreviewConfig, ProjectConfig,
};
use fleetdeploy::notify::{Notification, Notifier, NotifyOutcome};
use fleetdeploy::ports::ledger::PortLedger;
use fleetdeploy::ports::ranges::PortRanges;
use fleetdeploy::ports::store::{LedgerSnapshot, LedgerStore, MemoryLedgerStore};
use fleetdeploy::routing::{TrafficRouter, WeightedBackend};
use fleetdeploy::storage::state::{MemoryStateStore, StateStore};

pub const HEALTHY_STATE: &str =
    r#"{"Status":"running","Running":true,"ExitCode":0,"Health":{"Status":"healthy"}}"#;
pub const STARTING_STATE: &str =
    r#"{"Status":"running","Running":true,"ExitCode":0,"Health":{"Status":"starting"}}"#;

pub fn ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(exit_code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Executor answering commands from substring rules.
///
/// Rules added later take precedence; unmatched commands exit 0 with no
/// output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, ExecOutput)>>,
    commands: Mutex<Vec<String>>,
    connects: Mutex<u32>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, pattern: &str, output: ExecOutput) {
        self.rules
            .lock()
            .unwrap()
            .insert(0, (pattern.to_string(), output));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
        *self.connects.lock().unwrap() = 0;
    }

    pub fn connects(&self) -> u32 {
        *self.connects.lock().unwrap()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    fn target(&self) -> String {
        "scripted".to_string()
    }

    async fn connect(&self) -> Result<(), DeployError> {
        *self.connects.lock().unwrap() += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn exec(&self, command: &str, _opts: ExecOptions) -> Result<ExecOutput, DeployError> {
        self.commands.lock().unwrap().push(command.to_string());
        let rules = self.rules.lock().unwrap();
        Ok(rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ok("")))
    }

    async fn write_file(&self, path: &str, _content: &str) -> Result<(), DeployError> {
        self.commands.lock().unwrap().push(format!("write {}", path));
        Ok(())
    }
}

/// Router remembering every call
#[derive(Default)]
pub struct RecordingRouter {
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

impl RecordingRouter {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Fail the next call starting with `prefix`
    pub fn fail_once(&self, prefix: &str) {
        self.failures.lock().unwrap().push(prefix.to_string());
    }

    fn record(&self, call: String) -> Result<(), DeployError> {
        self.calls.lock().unwrap().push(call.clone());
        let mut failures = self.failures.lock().unwrap();
        if let Some(index) = failures.iter().position(|p| call.starts_with(p.as_str())) {
            failures.remove(index);
            return Err(DeployError::TrafficSwitchFailed(format!("{} rejected", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl TrafficRouter for RecordingRouter {
    async fn set_route(&self, domain: &str, port: u16, _health_path: &str) -> Result<(), DeployError> {
        self.record(format!("route {} {}", domain, port))
    }

    async fn set_weighted_route(
        &self,
        domain: &str,
        backends: &[WeightedBackend],
        _health_path: &str,
    ) -> Result<(), DeployError> {
        let split: Vec<String> = backends
            .iter()
            .map(|b| format!("{}:{}", b.port, b.weight))
            .collect();
        self.record(format!("split {} {}", domain, split.join(",")))
    }

    async fn remove_route(&self, domain: &str) -> Result<(), DeployError> {
        self.record(format!("remove {}", domain))
    }

    async fn reload(&self) -> Result<(), DeployError> {
        self.record("reload".to_string())
    }
}

/// Probe answering every GET with one status
pub struct StaticProbe {
    pub status: u16,
}

#[async_trait]
impl HttpProbe for StaticProbe {
    async fn get(&self, _url: &str) -> Result<u16, DeployError> {
        Ok(self.status)
    }
}

/// Ledger store that cannot be reached
pub struct FailingLedgerStore;

#[async_trait]
impl LedgerStore for FailingLedgerStore {
    async fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".to_string()))
    }

    async fn compare_and_swap(&self, _expected: u64, _next: LedgerSnapshot) -> Result<bool, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".to_string()))
    }
}

/// Notifier keeping every notification
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> NotifyOutcome {
        self.sent.lock().unwrap().push(notification.clone());
        NotifyOutcome {
            success: true,
            error: None,
        }
    }
}

fn environment(port: Option<u16>, domain: &str) -> EnvironmentConfig {
    EnvironmentConfig {
        port,
        domain: Some(domain.to_string()),
        env_file: None,
        health: HealthCheckConfig {
            path: "/health".to_string(),
            interval_secs: 0,
            retries: 3,
        },
    }
}

/// Project with fixed staging and production ports and preview support
pub fn project(name: &str) -> ProjectConfig {
    ProjectConfig {
        name: name.to_string(),
        image: ImageRef {
            registry: "ghcr.io".to_string(),
            owner: "acme".to_string(),
            name: name.to_string(),
        },
        container_port: 8080,
        environments: [
            (
                Environment::Staging,
                environment(Some(3000), &format!("{}.staging.example.com", name)),
            ),
            (
                Environment::Production,
                environment(Some(4000), &format!("{}.example.com", name)),
            ),
            (
                Environment::Preview,
                environment(None, "unused.example.com"),
            ),
        ]
        .into_iter()
        .collect(),
        preview: Some(PreviewConfig {
            domain_suffix: Some("preview.example.com".to_string()),
            ttl_hours: Some(24),
        }),
    }
}

/// An engine over in-memory stores and scripted collaborators
pub struct Harness {
    pub engine: DeploymentEngine,
    pub executor: Arc<ScriptedExecutor>,
    pub router: Arc<RecordingRouter>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: Arc<MemoryStateStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryLedgerStore::new()), 20)
    }

    pub fn with_store(ledger_store: Arc<dyn LedgerStore>, retention: usize) -> Self {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("{{.Config.Image}}", ok("ghcr.io/acme/foo:v1.2.2\n"));
        executor.script("{{json .State}}", ok(HEALTHY_STATE));
        executor.script("docker run -d", ok("0123456789abcdef0123\n"));

        let router = Arc::new(RecordingRouter::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let state = Arc::new(MemoryStateStore::new());
        let shared_state: Arc<dyn StateStore> = state.clone();

        let runtime = ContainerRuntime::new(
            executor.clone(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let health = Arc::new(HealthGate::new(
            runtime.clone(),
            Arc::new(StaticProbe { status: 200 }),
            "127.0.0.1",
        ));
        let ledger = Arc::new(PortLedger::new(
            ledger_store,
            PortRanges::default(),
            Duration::from_secs(300),
        ));
        let services = StepServices {
            runtime,
            health,
            router: router.clone(),
            state: shared_state.clone(),
            history: HistoryStore::new(shared_state, retention),
            ledger,
        };

        let engine = DeploymentEngine::new(services, notifier.clone(), EngineOptions::default());
        Self {
            engine,
            executor,
            router,
            notifier,
            state,
        }
    }

    /// Register `foo` and `bar`
    pub async fn with_projects(self) -> Self {
        for name in ["foo", "bar"] {
            self.engine.register_project(&project(name)).await.unwrap();
        }
        self
    }
}

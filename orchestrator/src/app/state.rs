//! Application state management

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;

use crate::app::options::{AppOptions, ExecutorOptions};
use crate::deploy::context::StepServices;
use crate::deploy::engine::DeploymentEngine;
use crate::deploy::health::{HealthGate, ReqwestProbe};
use crate::deploy::history::HistoryStore;
use crate::exec::docker::ContainerRuntime;
use crate::exec::local::LocalExecutor;
use crate::exec::ssh::SshExecutor;
use crate::exec::RemoteExecutor;
use crate::notify::webhook::WebhookNotifier;
use crate::notify::{LogNotifier, Notifier};
use crate::ports::ledger::PortLedger;
use crate::ports::store::FileLedgerStore;
use crate::routing::caddy::CaddyRouter;
use crate::storage::state::{FileStateStore, StateStore};

/// Main application state
pub struct AppState {
    /// Deployment engine wired to the configured collaborators
    pub engine: Arc<DeploymentEngine>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> anyhow::Result<Self> {
        info!("Initializing application state...");

        options
            .layout
            .setup()
            .await
            .with_context(|| format!("preparing {}", options.layout.base_dir.display()))?;
        options
            .ledger
            .ranges
            .validate()
            .map_err(anyhow::Error::msg)
            .context("port ranges")?;

        let executor: Arc<dyn RemoteExecutor> = match &options.executor {
            ExecutorOptions::Local => Arc::new(LocalExecutor::new()),
            ExecutorOptions::Ssh(target) => {
                if target.host.is_empty() {
                    bail!("executor kind is ssh but no host is configured");
                }
                Arc::new(SshExecutor::new(target.clone()))
            }
        };
        info!("Remote executor target: {}", executor.target());

        let ledger_store = FileLedgerStore::new(
            options.layout.ledger_file(),
            options.layout.ledger_lock_file(),
        );
        let ledger = Arc::new(PortLedger::new(
            Arc::new(ledger_store),
            options.ledger.ranges.clone(),
            options.ledger.reservation_ttl,
        ));

        let state: Arc<dyn StateStore> = Arc::new(FileStateStore::new(options.layout.state_dir()));
        let runtime = ContainerRuntime::new(
            executor.clone(),
            options.command_timeout,
            options.pull_timeout,
        );
        let probe = ReqwestProbe::new(options.health.probe_timeout).context("health probe client")?;
        let health = Arc::new(HealthGate::new(
            runtime.clone(),
            Arc::new(probe),
            options.health.host.clone(),
        ));
        let router = Arc::new(CaddyRouter::new(
            executor,
            options.router.config_dir.clone(),
            options.router.reload_command.clone(),
        ));

        let notifier: Arc<dyn Notifier> = match &options.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url).context("webhook notifier")?),
            None => Arc::new(LogNotifier),
        };

        let services = StepServices {
            runtime,
            health,
            router,
            history: HistoryStore::new(state.clone(), options.history_retention),
            state,
            ledger,
        };

        Ok(Self {
            engine: Arc::new(DeploymentEngine::new(
                services,
                notifier,
                options.engine.clone(),
            )),
        })
    }
}

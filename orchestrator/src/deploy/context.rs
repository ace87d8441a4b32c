//! State shared by the steps of one flow

use std::sync::Arc;

use crate::deploy::health::{HealthGate, HealthTarget};
use crate::deploy::history::HistoryStore;
use crate::exec::docker::{ContainerRuntime, ContainerSpec, HealthCommand, PROJECT_LABEL, VERSION_LABEL};
use crate::models::project::{Environment, EnvironmentConfig, ProjectConfig};
use crate::ports::ledger::PortLedger;
use crate::routing::TrafficRouter;
use crate::storage::state::StateStore;

/// Collaborators a step may call
#[derive(Clone)]
pub struct StepServices {
    pub runtime: ContainerRuntime,
    pub health: Arc<HealthGate>,
    pub router: Arc<dyn TrafficRouter>,
    pub state: Arc<dyn StateStore>,
    pub history: HistoryStore,
    pub ledger: Arc<PortLedger>,
}

/// Deployment target and scratch data of one flow
pub struct StepContext {
    pub project: ProjectConfig,
    pub environment: Environment,
    pub env_config: EnvironmentConfig,
    pub version: String,
    pub image: String,

    /// Container created by this flow
    pub container: String,

    /// Host port claimed for the container, 0 until claimed
    pub port: u16,

    /// Public domain routed to the container
    pub domain: Option<String>,

    /// Pull even when the image is present
    pub always_pull: bool,
    pub skip_healthcheck: bool,

    /// Image of the container replaced by this flow
    pub backup_image: Option<String>,

    pub services: StepServices,
}

impl StepContext {
    /// Container definition for the flow's target
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container.clone(),
            image: self.image.clone(),
            host_port: self.port,
            container_port: self.project.container_port,
            env_file: self.env_config.env_file.clone(),
            health: Some(HealthCommand {
                path: self.env_config.health.path.clone(),
                interval_secs: self.env_config.health.interval_secs,
                retries: self.env_config.health.retries,
            }),
            labels: vec![
                (PROJECT_LABEL.to_string(), self.project.name.clone()),
                (VERSION_LABEL.to_string(), self.version.clone()),
            ],
        }
    }

    pub fn health_target(&self) -> HealthTarget {
        HealthTarget {
            container: self.container.clone(),
            port: self.port,
            path: self.env_config.health.path.clone(),
        }
    }

    /// Port for display, also before it is claimed
    pub fn port_label(&self) -> String {
        if self.port == 0 {
            "<next free port>".to_string()
        } else {
            self.port.to_string()
        }
    }
}

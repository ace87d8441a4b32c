//! Rollout strategies
//!
//! Every strategy resolves where its container goes and which steps run;
//! the engine owns the shared reserve, execute, commit protocol.

use async_trait::async_trait;

use crate::deploy::blue_green::BlueGreenStrategy;
use crate::deploy::canary::CanaryStrategy;
use crate::deploy::engine::EngineOptions;
use crate::deploy::preview::PreviewStrategy;
use crate::deploy::rolling::RollingStrategy;
use crate::deploy::step::Step;
use crate::errors::DeployError;
use crate::models::deployment::{DeployRequest, StrategyKind};
use crate::models::project::{EnvironmentConfig, ProjectConfig};
use crate::ports::ledger::PortLedger;
use crate::ports::ranges::DEFAULT_SERVICE;
use crate::ports::store::PortKey;
use crate::storage::state::StateStore;

/// Ledger service of a running canary
pub const CANARY_SERVICE: &str = "app-canary";

/// Ledger service of a pull-request preview
pub fn preview_service(pr_number: &str) -> String {
    format!("pr-{}", pr_number)
}

/// Container name of the primary instance of a project environment
pub fn primary_container(project: &str, environment: &str) -> String {
    format!("{}-{}", project, environment)
}

/// Everything a strategy may consult while planning
pub struct PlanInput<'a> {
    pub request: &'a DeployRequest,
    pub project: &'a ProjectConfig,
    pub env_config: &'a EnvironmentConfig,
    pub options: &'a EngineOptions,
    pub state: &'a dyn StateStore,
    pub ledger: &'a PortLedger,
}

/// Where a flow deploys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Ledger key the port is claimed for
    pub key: PortKey,
    pub container: String,
    /// Port fixed by configuration; otherwise the key's commitment or the
    /// lowest free port of its range is used
    pub preferred_port: Option<u16>,
    /// Ports this flow must never claim
    pub excluded_ports: Vec<u16>,
    pub domain: Option<String>,
}

/// A rollout strategy
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Reject malformed requests before anything is touched
    fn validate(&self, _request: &DeployRequest) -> Result<(), DeployError> {
        Ok(())
    }

    /// Resolve the flow's target from persisted state
    async fn prepare(&mut self, input: &PlanInput<'_>) -> Result<Target, DeployError>;

    /// Ordered steps for the prepared target
    fn plan(&self, input: &PlanInput<'_>, target: &Target) -> Vec<Box<dyn Step>>;
}

/// Strategy for a deploy request
pub fn for_request(request: &DeployRequest) -> Result<Box<dyn Strategy>, DeployError> {
    let strategy: Box<dyn Strategy> = match request.strategy {
        StrategyKind::Rolling => Box::new(RollingStrategy::new()),
        StrategyKind::BlueGreen => Box::new(BlueGreenStrategy::new()),
        StrategyKind::Canary => Box::new(CanaryStrategy::new()),
        StrategyKind::Preview => Box::new(PreviewStrategy::new()),
        StrategyKind::Promote | StrategyKind::Rollback => {
            return Err(DeployError::InvalidRequest(format!(
                "{} is not a deploy strategy",
                request.strategy
            )));
        }
    };
    Ok(strategy)
}

/// Primary `app` target shared by rolling deployments, promotions and rollbacks
pub fn primary_target(input: &PlanInput<'_>) -> Target {
    let request = input.request;
    Target {
        key: PortKey::new(&request.project, request.environment, DEFAULT_SERVICE),
        container: primary_container(&request.project, request.environment.as_str()),
        preferred_port: input.env_config.port,
        excluded_ports: Vec::new(),
        domain: input.env_config.domain.clone(),
    }
}

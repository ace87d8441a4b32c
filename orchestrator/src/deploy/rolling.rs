//! Rolling strategy: replace the container in place

use async_trait::async_trait;

use crate::deploy::step::Step;
use crate::deploy::steps::{
    BackupCurrent, HealthCheck, PullImage, StartContainer, StopOldContainer, UpdateHistory,
    VerifyConfig,
};
use crate::deploy::strategy::{primary_target, PlanInput, Strategy, Target};
use crate::errors::DeployError;
use crate::models::deployment::StrategyKind;
use crate::storage::state::keys;

/// Stop the running container and start the new version on the same port
pub struct RollingStrategy {
    kind: StrategyKind,
}

impl RollingStrategy {
    pub fn new() -> Self {
        Self {
            kind: StrategyKind::Rolling,
        }
    }

    /// Rolling redeploy of a historical version
    pub fn rollback() -> Self {
        Self {
            kind: StrategyKind::Rollback,
        }
    }
}

impl Default for RollingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// The rolling step list
pub fn rolling_steps(input: &PlanInput<'_>) -> Vec<Box<dyn Step>> {
    let request = input.request;
    vec![
        Box::new(PullImage),
        Box::new(BackupCurrent),
        Box::new(VerifyConfig),
        Box::new(StopOldContainer),
        Box::new(StartContainer::new("start_new_container")),
        Box::new(HealthCheck {
            teardown_on_failure: false,
        }),
        Box::new(UpdateHistory {
            key: keys::history(&request.project, request.environment),
        }),
    ]
}

#[async_trait]
impl Strategy for RollingStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn prepare(&mut self, input: &PlanInput<'_>) -> Result<Target, DeployError> {
        Ok(primary_target(input))
    }

    fn plan(&self, input: &PlanInput<'_>, _target: &Target) -> Vec<Box<dyn Step>> {
        rolling_steps(input)
    }
}

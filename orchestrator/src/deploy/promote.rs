//! Canary promotion: a rolling deployment of the canary version

use async_trait::async_trait;

use crate::deploy::rolling::rolling_steps;
use crate::deploy::step::Step;
use crate::deploy::steps::{ClearCanary, RemoveCanary, ResetRoute};
use crate::deploy::strategy::{primary_target, PlanInput, Strategy, Target};
use crate::errors::DeployError;
use crate::models::deployment::StrategyKind;
use crate::models::rollout::CanaryMetadata;

/// Replace the stable instance with the canary's version, then retire the canary
pub struct PromoteStrategy {
    canary: CanaryMetadata,
}

impl PromoteStrategy {
    pub fn new(canary: CanaryMetadata) -> Self {
        Self { canary }
    }
}

#[async_trait]
impl Strategy for PromoteStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Promote
    }

    async fn prepare(&mut self, input: &PlanInput<'_>) -> Result<Target, DeployError> {
        let mut target = primary_target(input);
        if target.preferred_port.is_none() {
            target.preferred_port = Some(self.canary.stable_port);
        }
        Ok(target)
    }

    fn plan(&self, input: &PlanInput<'_>, _target: &Target) -> Vec<Box<dyn Step>> {
        let mut steps = rolling_steps(input);
        steps.push(Box::new(ResetRoute));
        steps.push(Box::new(RemoveCanary {
            container: self.canary.container.clone(),
        }));
        steps.push(Box::new(ClearCanary));
        steps
    }
}

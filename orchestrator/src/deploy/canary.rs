//! Canary strategy: a second instance alongside the stable one

use async_trait::async_trait;

use crate::deploy::step::Step;
use crate::deploy::steps::{ConfigureTrafficSplit, HealthCheck, PersistCanary, StartContainer};
use crate::deploy::strategy::{primary_container, PlanInput, Strategy, Target, CANARY_SERVICE};
use crate::errors::DeployError;
use crate::models::deployment::{DeployRequest, StrategyKind};
use crate::ports::ranges::DEFAULT_SERVICE;
use crate::ports::store::PortKey;

/// Traffic share of a canary when the request does not set one
pub const DEFAULT_CANARY_WEIGHT: u32 = 10;

/// Container name of a canary
pub fn canary_container(project: &str, environment: &str) -> String {
    format!("{}-canary", primary_container(project, environment))
}

/// Check a canary weight is a percentage
pub fn validate_weight(weight: u32) -> Result<u32, DeployError> {
    if weight > 100 {
        return Err(DeployError::InvalidRequest(format!(
            "canary weight {} is outside 0..=100",
            weight
        )));
    }
    Ok(weight)
}

/// Parallel canary receiving a share of traffic. Never promotes itself.
#[derive(Default)]
pub struct CanaryStrategy {
    stable_port: u16,
}

impl CanaryStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn weight(request: &DeployRequest) -> u32 {
        request.canary_weight.unwrap_or(DEFAULT_CANARY_WEIGHT)
    }
}

#[async_trait]
impl Strategy for CanaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Canary
    }

    fn validate(&self, request: &DeployRequest) -> Result<(), DeployError> {
        validate_weight(Self::weight(request)).map(|_| ())
    }

    async fn prepare(&mut self, input: &PlanInput<'_>) -> Result<Target, DeployError> {
        let request = input.request;
        // The canary runs beside a committed stable instance, never in its place
        let stable = PortKey::new(&request.project, request.environment, DEFAULT_SERVICE);
        self.stable_port = input
            .ledger
            .commitment_for(&stable)
            .await?
            .map(|commitment| commitment.port)
            .ok_or_else(|| {
                DeployError::ConfigMissing(format!(
                    "no stable instance of {} in {} to run a canary beside",
                    request.project, request.environment
                ))
            })?;

        Ok(Target {
            key: PortKey::new(&request.project, request.environment, CANARY_SERVICE),
            container: canary_container(&request.project, request.environment.as_str()),
            preferred_port: None,
            excluded_ports: vec![self.stable_port],
            domain: input.env_config.domain.clone(),
        })
    }

    fn plan(&self, input: &PlanInput<'_>, _target: &Target) -> Vec<Box<dyn Step>> {
        let weight = Self::weight(input.request);
        vec![
            Box::new(StartContainer::new("deploy_canary").replacing().pulling()),
            Box::new(HealthCheck {
                teardown_on_failure: true,
            }),
            Box::new(ConfigureTrafficSplit {
                stable_port: self.stable_port,
                weight,
            }),
            Box::new(PersistCanary {
                stable_port: self.stable_port,
                weight,
            }),
        ]
    }
}

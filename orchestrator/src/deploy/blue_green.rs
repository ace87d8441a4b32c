//! Blue-green strategy: deploy to the idle slot, then switch traffic

use async_trait::async_trait;
use tracing::info;

use crate::deploy::step::Step;
use crate::deploy::steps::{
    HealthCheck, PersistSlot, RetainPreviousSlot, StartContainer, SwitchTraffic, UpdateHistory,
};
use crate::deploy::strategy::{primary_container, PlanInput, Strategy, Target};
use crate::errors::DeployError;
use crate::models::deployment::StrategyKind;
use crate::models::rollout::{Slot, SlotMarker};
use crate::ports::store::PortKey;
use crate::storage::state::{keys, load};

/// Ledger service of a blue-green slot
pub fn slot_service(slot: Slot) -> String {
    format!("app-{}", slot)
}

/// Container name of a blue-green slot
pub fn slot_container(project: &str, environment: &str, slot: Slot) -> String {
    format!("{}-{}", primary_container(project, environment), slot)
}

/// Two interchangeable slots, one receiving traffic
#[derive(Default)]
pub struct BlueGreenStrategy {
    active: Slot,
    /// Port of the active slot, when one has been recorded
    active_port: Option<u16>,
}

impl BlueGreenStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot receiving traffic before the flow
    pub fn active(&self) -> Slot {
        self.active
    }
}

#[async_trait]
impl Strategy for BlueGreenStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BlueGreen
    }

    async fn prepare(&mut self, input: &PlanInput<'_>) -> Result<Target, DeployError> {
        let request = input.request;
        let marker: Option<SlotMarker> =
            load(input.state, &keys::slot(&request.project, request.environment)).await?;
        self.active = marker.as_ref().map(|m| m.active).unwrap_or_default();
        let inactive = self.active.other();
        info!(
            "Active slot of {}/{} is {}, deploying to {}",
            request.project, request.environment, self.active, inactive
        );

        let preferred_port = match input.env_config.port {
            Some(base) => Some(
                base.checked_add(inactive.port_offset(input.options.slot_offset))
                    .ok_or_else(|| {
                        DeployError::ConfigInvalid(format!(
                            "port {} plus slot offset {} overflows",
                            base, input.options.slot_offset
                        ))
                    })?,
            ),
            None => None,
        };
        self.active_port = match (&marker, input.env_config.port) {
            (Some(_), Some(base)) => base.checked_add(self.active.port_offset(input.options.slot_offset)),
            _ => None,
        };

        Ok(Target {
            key: PortKey::new(&request.project, request.environment, slot_service(inactive)),
            container: slot_container(&request.project, request.environment.as_str(), inactive),
            preferred_port,
            excluded_ports: Vec::new(),
            domain: input.env_config.domain.clone(),
        })
    }

    fn plan(&self, input: &PlanInput<'_>, _target: &Target) -> Vec<Box<dyn Step>> {
        let request = input.request;
        let inactive = self.active.other();
        vec![
            Box::new(
                StartContainer::new("deploy_inactive_slot")
                    .replacing()
                    .pulling(),
            ),
            Box::new(HealthCheck {
                teardown_on_failure: true,
            }),
            Box::new(SwitchTraffic {
                previous_port: self.active_port,
            }),
            Box::new(PersistSlot { slot: inactive }),
            Box::new(RetainPreviousSlot {
                slot: self.active,
                container: slot_container(&request.project, request.environment.as_str(), self.active),
            }),
            Box::new(UpdateHistory {
                key: keys::history(&request.project, request.environment),
            }),
        ]
    }
}

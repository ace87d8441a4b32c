//! Preview strategy: one container per pull request

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deploy::step::Step;
use crate::deploy::steps::{
    ConfigureRoute, HealthCheck, PersistPreview, PullImage, StartContainer, UpdateHistory,
};
use crate::deploy::strategy::{preview_service, PlanInput, Strategy, Target};
use crate::errors::DeployError;
use crate::models::deployment::{DeployRequest, StrategyKind};
use crate::models::project::{is_valid_name, Environment};
use crate::ports::store::PortKey;
use crate::storage::state::keys;

/// Container name of a preview
pub fn preview_container(project: &str, pr_number: &str) -> String {
    format!("{}-pr-{}", project, pr_number)
}

/// Pull-request scoped deployment with a time to live
#[derive(Default)]
pub struct PreviewStrategy {
    expires_at: Option<DateTime<Utc>>,
}

impl PreviewStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Pull request identifier of a preview request
pub fn pr_number(request: &DeployRequest) -> Result<&str, DeployError> {
    let pr = request
        .pr_number
        .as_deref()
        .ok_or_else(|| DeployError::InvalidRequest("preview requires a pull request number".to_string()))?;
    if !is_valid_name(pr) {
        return Err(DeployError::InvalidRequest(format!(
            "invalid pull request number `{}`",
            pr
        )));
    }
    Ok(pr)
}

#[async_trait]
impl Strategy for PreviewStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Preview
    }

    fn validate(&self, request: &DeployRequest) -> Result<(), DeployError> {
        if request.environment != Environment::Preview {
            return Err(DeployError::InvalidRequest(format!(
                "preview deployments target the preview environment, not {}",
                request.environment
            )));
        }
        pr_number(request).map(|_| ())
    }

    async fn prepare(&mut self, input: &PlanInput<'_>) -> Result<Target, DeployError> {
        let request = input.request;
        let pr = pr_number(request)?;
        let preview = input.project.preview.as_ref();

        let ttl_hours = preview
            .and_then(|p| p.ttl_hours)
            .unwrap_or(input.options.preview_ttl_hours);
        let expires_at = i64::try_from(ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| DeployError::ConfigInvalid(format!("preview ttl of {} hours", ttl_hours)))?;
        self.expires_at = Some(expires_at);

        let domain = preview
            .and_then(|p| p.domain_suffix.clone())
            .or_else(|| input.options.preview_domain_suffix.clone())
            .map(|suffix| format!("pr-{}.{}", pr, suffix.trim_start_matches('.')));

        Ok(Target {
            key: PortKey::new(&request.project, Environment::Preview, preview_service(pr)),
            container: preview_container(&request.project, pr),
            preferred_port: None,
            excluded_ports: Vec::new(),
            domain,
        })
    }

    fn plan(&self, input: &PlanInput<'_>, _target: &Target) -> Vec<Box<dyn Step>> {
        let request = input.request;
        let pr = request.pr_number.clone().unwrap_or_default();
        vec![
            Box::new(PullImage),
            Box::new(StartContainer::new("deploy_preview").replacing()),
            Box::new(HealthCheck {
                teardown_on_failure: true,
            }),
            Box::new(ConfigureRoute),
            Box::new(PersistPreview {
                pr_number: pr.clone(),
                expires_at: self.expires_at.unwrap_or_else(Utc::now),
            }),
            Box::new(UpdateHistory {
                key: keys::preview_history(&request.project, &pr),
            }),
        ]
    }
}

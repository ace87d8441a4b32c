//! Rollback manager
//!
//! Picks a historical version and redeploys it with the rolling steps. A
//! rollback is itself recorded in history, so it can be rolled back too.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deploy::engine::{validate_version, DeploymentEngine};
use crate::deploy::rolling::RollingStrategy;
use crate::errors::DeployError;
use crate::models::deployment::{DeployRequest, DeploymentResult, StrategyKind};
use crate::models::project::{is_valid_name, Environment};

/// A rollback request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub project: String,
    pub environment: Environment,

    /// Version to return to; the newest non-running version when absent
    #[serde(default)]
    pub version: Option<String>,

    /// Only report the steps that would run
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub skip_healthcheck: bool,
}

/// Version a rollback deploys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackTarget {
    pub version: String,
    /// Image recorded in history, `None` for versions never deployed here
    pub image: Option<String>,
}

/// Rollbacks of one engine
pub struct RollbackManager<'a> {
    engine: &'a DeploymentEngine,
}

impl<'a> RollbackManager<'a> {
    pub fn new(engine: &'a DeploymentEngine) -> Self {
        Self { engine }
    }

    /// The explicit version when given, otherwise the newest history entry
    /// that differs from the running version
    pub async fn resolve_target(
        &self,
        project: &str,
        environment: Environment,
        explicit: Option<&str>,
    ) -> Result<RollbackTarget, DeployError> {
        let log = self.engine.history().load(project, environment).await?;

        if let Some(version) = explicit {
            validate_version(version)?;
            return Ok(RollbackTarget {
                version: version.to_string(),
                image: log.find(version).map(|e| e.image.clone()),
            });
        }

        let candidate = log
            .rollback_candidate()
            .ok_or_else(|| DeployError::NoHistory {
                project: project.to_string(),
                environment,
            })?;
        Ok(RollbackTarget {
            version: candidate.version.clone(),
            image: Some(candidate.image.clone()),
        })
    }

    /// Redeploy the resolved target.
    ///
    /// The image is always pulled. A dry run touches nothing: no remote
    /// command, no reservation, no history entry.
    pub async fn rollback(&self, request: RollbackRequest) -> Result<DeploymentResult, DeployError> {
        if !is_valid_name(&request.project) {
            return Err(DeployError::InvalidRequest(format!(
                "invalid project name `{}`",
                request.project
            )));
        }
        if request.environment == Environment::Preview {
            return Err(DeployError::InvalidRequest(
                "previews are redeployed, not rolled back".to_string(),
            ));
        }

        let _guard = self
            .engine
            .lock_flow(&request.project, request.environment)
            .await;
        let target = self
            .resolve_target(&request.project, request.environment, request.version.as_deref())
            .await?;
        info!(
            "Rolling back {}/{} to {}{}",
            request.project,
            request.environment,
            target.version,
            if request.dry_run { " (dry run)" } else { "" }
        );

        let mut deploy = DeployRequest::new(
            &request.project,
            request.environment,
            target.version,
            StrategyKind::Rollback,
        );
        deploy.image = target.image;
        deploy.skip_healthcheck = request.skip_healthcheck;
        deploy.force = true;

        self.engine
            .run_locked(deploy, Box::new(RollingStrategy::rollback()), request.dry_run)
            .await
    }
}

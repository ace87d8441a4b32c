//! Pipeline steps shared by the strategies

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::deploy::context::StepContext;
use crate::deploy::health::HealthStatus;
use crate::deploy::step::{Step, StepOutcome};
use crate::deploy::strategy::CANARY_SERVICE;
use crate::errors::DeployError;
use crate::models::history::HistoryEntry;
use crate::models::rollout::{CanaryMetadata, PreviewMetadata, Slot, SlotMarker};
use crate::ports::store::PortKey;
use crate::routing::WeightedBackend;
use crate::storage::state::{keys, save};

async fn ensure_image(ctx: &StepContext) -> Result<String, DeployError> {
    let runtime = &ctx.services.runtime;
    if !ctx.always_pull && runtime.image_exists(&ctx.image).await? {
        return Ok(format!("image {} already present", ctx.image));
    }
    runtime.pull(&ctx.image).await?;
    Ok(format!("pulled {}", ctx.image))
}

async fn remove_created_container(ctx: &StepContext) -> Option<String> {
    match ctx.services.runtime.remove_container(&ctx.container).await {
        Ok(true) => Some(format!("removed {}", ctx.container)),
        Ok(false) => None,
        Err(e) => {
            warn!("Failed to remove {}: {}", ctx.container, e);
            Some(format!("cleanup of {} failed: {}", ctx.container, e))
        }
    }
}

async fn route(ctx: &StepContext, domain: &str, port: u16) -> Result<(), DeployError> {
    let router = &ctx.services.router;
    router
        .set_route(domain, port, &ctx.env_config.health.path)
        .await?;
    router.reload().await
}

async fn restore_route(ctx: &StepContext, domain: &str, port: u16) -> String {
    match route(ctx, domain, port).await {
        Ok(()) => format!("{} restored to port {}", domain, port),
        Err(e) => {
            warn!("Failed to restore route of {}: {}", domain, e);
            format!("route restore of {} failed: {}", domain, e)
        }
    }
}

/// Pull the release image unless it is already on the host
pub struct PullImage;

#[async_trait]
impl Step for PullImage {
    fn name(&self) -> &'static str {
        "pull_image"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        if ctx.always_pull {
            format!("pull {}", ctx.image)
        } else {
            format!("pull {} if not present", ctx.image)
        }
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        Ok(StepOutcome::done(ensure_image(ctx).await?))
    }
}

/// Remember the image of the running container
pub struct BackupCurrent;

#[async_trait]
impl Step for BackupCurrent {
    fn name(&self) -> &'static str {
        "backup_current"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, ctx: &StepContext) -> String {
        format!("record the image of {}", ctx.container)
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        match ctx.services.runtime.container_image(&ctx.container).await? {
            Some(image) => {
                let output = format!("{} runs {}", ctx.container, image);
                ctx.backup_image = Some(image);
                Ok(StepOutcome::Done(Some(output)))
            }
            None => Ok(StepOutcome::skipped(format!(
                "no container {} to back up",
                ctx.container
            ))),
        }
    }
}

/// Check the env file exists and parses
pub struct VerifyConfig;

#[async_trait]
impl Step for VerifyConfig {
    fn name(&self) -> &'static str {
        "verify_config"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        match &ctx.env_config.env_file {
            Some(path) => format!("check env file {}", path),
            None => "no env file declared".to_string(),
        }
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        match &ctx.env_config.env_file {
            Some(path) => {
                let count = ctx.services.runtime.check_env_file(path).await?;
                Ok(StepOutcome::done(format!("{} defines {} variables", path, count)))
            }
            None => Ok(StepOutcome::done("no env file declared")),
        }
    }
}

/// Stop and remove the running container, if any
pub struct StopOldContainer;

#[async_trait]
impl Step for StopOldContainer {
    fn name(&self) -> &'static str {
        "stop_old_container"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, ctx: &StepContext) -> String {
        format!("stop and remove {}", ctx.container)
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        if ctx.services.runtime.remove_container(&ctx.container).await? {
            Ok(StepOutcome::done(format!("removed {}", ctx.container)))
        } else {
            Ok(StepOutcome::skipped(format!("no container {}", ctx.container)))
        }
    }
}

/// Start the flow's container on the claimed port
pub struct StartContainer {
    pub name: &'static str,
    /// Remove a leftover container of the same name first
    pub replace_existing: bool,
    /// Pull the image first when it is missing
    pub ensure_image: bool,
}

impl StartContainer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            replace_existing: false,
            ensure_image: false,
        }
    }

    pub fn replacing(mut self) -> Self {
        self.replace_existing = true;
        self
    }

    pub fn pulling(mut self) -> Self {
        self.ensure_image = true;
        self
    }
}

#[async_trait]
impl Step for StartContainer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        format!(
            "start {} from {} on port {}",
            ctx.container,
            ctx.image,
            ctx.port_label()
        )
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let mut notes = Vec::new();
        if self.ensure_image {
            notes.push(ensure_image(ctx).await?);
        }
        if self.replace_existing && ctx.services.runtime.remove_container(&ctx.container).await? {
            notes.push(format!("replaced stale {}", ctx.container));
        }

        let id = ctx
            .services
            .runtime
            .run_container(&ctx.container_spec())
            .await?;
        let short: String = id.chars().take(12).collect();
        notes.push(format!("started {} ({}) on port {}", ctx.container, short, ctx.port));
        Ok(StepOutcome::Done(Some(notes.join("; "))))
    }

    async fn compensate(&self, ctx: &mut StepContext) -> Option<String> {
        remove_created_container(ctx).await
    }
}

/// Health gate poll of the new container
pub struct HealthCheck {
    /// Remove the new container when the gate fails
    pub teardown_on_failure: bool,
}

#[async_trait]
impl Step for HealthCheck {
    fn name(&self) -> &'static str {
        "healthcheck"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        let health = &ctx.env_config.health;
        format!(
            "poll {} up to {} times every {}s",
            health.path, health.retries, health.interval_secs
        )
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        if ctx.skip_healthcheck {
            return Ok(StepOutcome::skipped("health check disabled by request"));
        }

        let health = &ctx.env_config.health;
        let status = ctx
            .services
            .health
            .poll(
                &ctx.health_target(),
                health.retries,
                Duration::from_secs(health.interval_secs),
            )
            .await;

        match status {
            HealthStatus::Healthy { attempts } => Ok(StepOutcome::done(format!(
                "healthy after {} attempt(s)",
                attempts
            ))),
            HealthStatus::Unhealthy(reason) => Err(DeployError::HealthCheckFailed(reason)),
            HealthStatus::Timeout { attempts } => Err(DeployError::HealthCheckTimeout { attempts }),
        }
    }

    async fn compensate(&self, ctx: &mut StepContext) -> Option<String> {
        if self.teardown_on_failure {
            remove_created_container(ctx).await
        } else {
            None
        }
    }
}

/// Append the deployed version to a history log
pub struct UpdateHistory {
    pub key: String,
}

#[async_trait]
impl Step for UpdateHistory {
    fn name(&self) -> &'static str {
        "update_history"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, ctx: &StepContext) -> String {
        format!("record {} as active in {}", ctx.version, self.key)
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let log = ctx
            .services
            .history
            .append_key(&self.key, HistoryEntry::new(&ctx.version, &ctx.image))
            .await?;
        Ok(StepOutcome::done(format!(
            "{} is active, {} entries kept",
            ctx.version,
            log.len()
        )))
    }
}

/// Point the environment's domain at the new blue-green slot
pub struct SwitchTraffic {
    /// Port of the slot that served traffic before the switch
    pub previous_port: Option<u16>,
}

#[async_trait]
impl Step for SwitchTraffic {
    fn name(&self) -> &'static str {
        "switch_traffic"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        match &ctx.domain {
            Some(domain) => format!("route {} to port {}", domain, ctx.port_label()),
            None => "no domain configured".to_string(),
        }
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let Some(domain) = ctx.domain.clone() else {
            return Ok(StepOutcome::skipped("no domain configured"));
        };
        route(ctx, &domain, ctx.port).await?;
        Ok(StepOutcome::done(format!("{} -> port {}", domain, ctx.port)))
    }

    async fn compensate(&self, ctx: &mut StepContext) -> Option<String> {
        let mut notes = Vec::new();
        if let (Some(domain), Some(port)) = (ctx.domain.clone(), self.previous_port) {
            notes.push(restore_route(ctx, &domain, port).await);
        }
        if let Some(removed) = remove_created_container(ctx).await {
            notes.push(removed);
        }
        (!notes.is_empty()).then(|| notes.join("; "))
    }
}

/// Persist the active blue-green slot
pub struct PersistSlot {
    pub slot: Slot,
}

#[async_trait]
impl Step for PersistSlot {
    fn name(&self) -> &'static str {
        "persist_slot"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, _ctx: &StepContext) -> String {
        format!("mark {} as active", self.slot)
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let marker = SlotMarker {
            active: self.slot,
            version: Some(ctx.version.clone()),
            updated_at: Utc::now(),
        };
        save(
            ctx.services.state.as_ref(),
            &keys::slot(&ctx.project.name, ctx.environment),
            &marker,
        )
        .await?;
        Ok(StepOutcome::done(format!("{} is active", self.slot)))
    }
}

/// Keep the former slot running for a fast switch back
pub struct RetainPreviousSlot {
    pub slot: Slot,
    pub container: String,
}

#[async_trait]
impl Step for RetainPreviousSlot {
    fn name(&self) -> &'static str {
        "retain_previous_slot"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, _ctx: &StepContext) -> String {
        format!("keep {} ({}) for rollback", self.container, self.slot)
    }

    async fn run(&self, _ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        Ok(StepOutcome::done(format!(
            "{} slot kept as {} for rollback",
            self.slot, self.container
        )))
    }
}

/// Split traffic between the stable instance and the canary
pub struct ConfigureTrafficSplit {
    pub stable_port: u16,
    pub weight: u32,
}

impl ConfigureTrafficSplit {
    fn backends(&self, canary_port: u16) -> [WeightedBackend; 2] {
        [
            WeightedBackend {
                port: self.stable_port,
                weight: 100 - self.weight,
            },
            WeightedBackend {
                port: canary_port,
                weight: self.weight,
            },
        ]
    }
}

#[async_trait]
impl Step for ConfigureTrafficSplit {
    fn name(&self) -> &'static str {
        "configure_traffic_split"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        format!(
            "send {}% to port {} and {}% to port {}",
            100 - self.weight,
            self.stable_port,
            self.weight,
            ctx.port_label()
        )
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let Some(domain) = ctx.domain.clone() else {
            return Ok(StepOutcome::skipped("no domain configured"));
        };
        let router = &ctx.services.router;
        router
            .set_weighted_route(
                &domain,
                &self.backends(ctx.port),
                &ctx.env_config.health.path,
            )
            .await?;
        router.reload().await?;
        Ok(StepOutcome::done(format!(
            "{}: stable {}%, canary {}%",
            domain,
            100 - self.weight,
            self.weight
        )))
    }

    async fn compensate(&self, ctx: &mut StepContext) -> Option<String> {
        let mut notes = Vec::new();
        if let Some(domain) = ctx.domain.clone() {
            notes.push(restore_route(ctx, &domain, self.stable_port).await);
        }
        if let Some(removed) = remove_created_container(ctx).await {
            notes.push(removed);
        }
        (!notes.is_empty()).then(|| notes.join("; "))
    }
}

/// Persist the running canary
pub struct PersistCanary {
    pub stable_port: u16,
    pub weight: u32,
}

#[async_trait]
impl Step for PersistCanary {
    fn name(&self) -> &'static str {
        "persist_canary_metadata"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, ctx: &StepContext) -> String {
        format!("record canary {} at {}%", ctx.version, self.weight)
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let metadata = CanaryMetadata {
            version: ctx.version.clone(),
            image: ctx.image.clone(),
            weight: self.weight,
            port: ctx.port,
            stable_port: self.stable_port,
            container: ctx.container.clone(),
            created_at: Utc::now(),
        };
        save(
            ctx.services.state.as_ref(),
            &keys::canary(&ctx.project.name, ctx.environment),
            &metadata,
        )
        .await?;
        Ok(StepOutcome::done(format!("canary {} recorded", ctx.version)))
    }
}

/// Route the preview domain to the preview container
pub struct ConfigureRoute;

#[async_trait]
impl Step for ConfigureRoute {
    fn name(&self) -> &'static str {
        "configure_route"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        match &ctx.domain {
            Some(domain) => format!("route {} to port {}", domain, ctx.port_label()),
            None => "no preview domain configured".to_string(),
        }
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let Some(domain) = ctx.domain.clone() else {
            return Ok(StepOutcome::skipped("no preview domain configured"));
        };
        route(ctx, &domain, ctx.port).await?;
        Ok(StepOutcome::done(format!("{} -> port {}", domain, ctx.port)))
    }

    async fn compensate(&self, ctx: &mut StepContext) -> Option<String> {
        let domain = ctx.domain.clone()?;
        let mut notes = Vec::new();
        if let Err(e) = ctx.services.router.remove_route(&domain).await {
            notes.push(format!("route cleanup failed: {}", e));
        }
        if let Some(removed) = remove_created_container(ctx).await {
            notes.push(removed);
        }
        (!notes.is_empty()).then(|| notes.join("; "))
    }
}

/// Persist the preview so it can be torn down later
pub struct PersistPreview {
    pub pr_number: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
impl Step for PersistPreview {
    fn name(&self) -> &'static str {
        "persist_preview_metadata"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, _ctx: &StepContext) -> String {
        format!("record preview pr-{} until {}", self.pr_number, self.expires_at)
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let metadata = PreviewMetadata {
            project: ctx.project.name.clone(),
            pr_number: self.pr_number.clone(),
            version: ctx.version.clone(),
            port: ctx.port,
            container: ctx.container.clone(),
            domain: ctx.domain.clone(),
            created_at: Utc::now(),
            expires_at: self.expires_at,
        };
        save(
            ctx.services.state.as_ref(),
            &keys::preview(&ctx.project.name, &self.pr_number),
            &metadata,
        )
        .await?;
        Ok(StepOutcome::done(format!("expires at {}", self.expires_at)))
    }
}

/// Send all traffic of the domain back to the stable port
pub struct ResetRoute;

#[async_trait]
impl Step for ResetRoute {
    fn name(&self) -> &'static str {
        "reset_route"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn describe(&self, ctx: &StepContext) -> String {
        match &ctx.domain {
            Some(domain) => format!("route all of {} to port {}", domain, ctx.port_label()),
            None => "no domain configured".to_string(),
        }
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let Some(domain) = ctx.domain.clone() else {
            return Ok(StepOutcome::skipped("no domain configured"));
        };
        route(ctx, &domain, ctx.port).await?;
        Ok(StepOutcome::done(format!("{} -> port {}", domain, ctx.port)))
    }
}

/// Remove the canary container after promotion
pub struct RemoveCanary {
    pub container: String,
}

#[async_trait]
impl Step for RemoveCanary {
    fn name(&self) -> &'static str {
        "remove_canary"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, _ctx: &StepContext) -> String {
        format!("stop and remove {}", self.container)
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        if ctx.services.runtime.remove_container(&self.container).await? {
            Ok(StepOutcome::done(format!("removed {}", self.container)))
        } else {
            Ok(StepOutcome::skipped(format!("no container {}", self.container)))
        }
    }
}

/// Release the canary port and forget its metadata
pub struct ClearCanary;

#[async_trait]
impl Step for ClearCanary {
    fn name(&self) -> &'static str {
        "clear_canary_metadata"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn describe(&self, _ctx: &StepContext) -> String {
        "release the canary port and metadata".to_string()
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError> {
        let key = PortKey::new(&ctx.project.name, ctx.environment, CANARY_SERVICE);
        let released = ctx.services.ledger.release_commitment(&key).await?;
        ctx.services
            .state
            .delete(&keys::canary(&ctx.project.name, ctx.environment))
            .await?;
        Ok(StepOutcome::done(if released {
            format!("released port of {}", key)
        } else {
            format!("{} held no port", key)
        }))
    }
}

//! Deployment strategy engine
//!
//! Runs the protocol shared by every flow: validate the request, claim the
//! target port, execute the strategy's pipeline, then commit the claim on
//! success or release it on failure. Each `(project, environment)` runs one
//! flow at a time.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use crate::deploy::context::{StepContext, StepServices};
use crate::deploy::fsm::{FlowEvent, FlowFsm};
use crate::deploy::history::HistoryStore;
use crate::deploy::locks::KeyLocks;
use crate::deploy::pipeline::Pipeline;
use crate::deploy::preview::preview_container;
use crate::deploy::promote::PromoteStrategy;
use crate::deploy::rollback::RollbackManager;
use crate::deploy::strategy::{self, preview_service, PlanInput, Strategy, Target};
use crate::errors::{DeployError, LedgerError};
use crate::exec::docker::PortProbe;
use crate::models::deployment::{
    DeployRequest, DeploymentResult, DeploymentStep, PortValidation, StepStatus, StrategyKind,
};
use crate::models::history::HistoryLog;
use crate::models::project::{is_valid_name, Environment, ProjectConfig};
use crate::models::rollout::{CanaryMetadata, PreviewMetadata, SlotMarker};
use crate::notify::{Notification, Notifier, Severity};
use crate::ports::ledger::PortLedger;
use crate::ports::store::{PortCommitment, PortKey, PortReservation};
use crate::routing::TrafficRouter;
use crate::storage::state::{keys, load, save};
use crate::utils::elapsed_ms;

/// Name of the step recording the port claim
pub const PORT_VALIDATION_STEP: &str = "port_validation";

/// Engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Port offset of the green slot from the blue one
    pub slot_offset: u16,

    /// Preview lifetime when the project does not set one
    pub preview_ttl_hours: u64,

    /// Preview domain suffix when the project does not set one
    pub preview_domain_suffix: Option<String>,

    /// Channel label of notifications
    pub notify_channel: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            slot_offset: 500,
            preview_ttl_hours: 72,
            preview_domain_suffix: None,
            notify_channel: "deployments".to_string(),
        }
    }
}

/// Options of a canary promotion
#[derive(Debug, Clone, Default)]
pub struct PromoteOptions {
    pub skip_healthcheck: bool,
    pub force: bool,
}

/// Outcome of a preview teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub project: String,
    pub pr_number: String,
    /// Metadata of the preview existed
    pub found: bool,
    pub container_removed: bool,
    pub route_removed: bool,
    pub port_released: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl TeardownReport {
    fn new(project: &str, pr_number: &str) -> Self {
        Self {
            project: project.to_string(),
            pr_number: pr_number.to_string(),
            found: false,
            container_removed: false,
            route_removed: false,
            port_released: false,
            errors: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Rollout state of a project environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub project: String,
    pub environment: Environment,
    pub active_slot: Option<SlotMarker>,
    pub canary: Option<CanaryMetadata>,
    pub history: HistoryLog,
    pub ports: Vec<PortCommitment>,
}

/// Ledger view of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortStatus {
    pub commitments: Vec<PortCommitment>,
    pub reservations: Vec<PortReservation>,
}

struct PortClaim {
    port: u16,
    token: Option<String>,
    validation: PortValidation,
    note: String,
}

/// Runs deployment, promotion, rollback and teardown flows
pub struct DeploymentEngine {
    services: StepServices,
    notifier: Arc<dyn Notifier>,
    locks: KeyLocks,
    options: EngineOptions,
}

fn advance(fsm: &mut FlowFsm, event: FlowEvent) -> Result<(), DeployError> {
    fsm.process(event).map_err(DeployError::Internal)
}

/// Check a version is usable as an image tag
pub fn validate_version(version: &str) -> Result<(), DeployError> {
    let valid = !version.is_empty()
        && version.len() <= 128
        && !version.starts_with(['.', '-'])
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(DeployError::InvalidRequest(format!("invalid version `{}`", version)))
    }
}

fn validate_project(project: &str) -> Result<(), DeployError> {
    if is_valid_name(project) {
        Ok(())
    } else {
        Err(DeployError::InvalidRequest(format!("invalid project name `{}`", project)))
    }
}

fn lock_key(project: &str, environment: Environment) -> String {
    format!("{}/{}", project, environment)
}

fn preview_lock_key(project: &str, pr_number: &str) -> String {
    format!("{}/preview/pr-{}", project, pr_number)
}

async fn drop_route(router: &dyn TrafficRouter, domain: &str) -> Result<(), DeployError> {
    router.remove_route(domain).await?;
    router.reload().await
}

impl DeploymentEngine {
    pub fn new(services: StepServices, notifier: Arc<dyn Notifier>, options: EngineOptions) -> Self {
        Self {
            services,
            notifier,
            locks: KeyLocks::new(),
            options,
        }
    }

    pub fn ledger(&self) -> &Arc<PortLedger> {
        &self.services.ledger
    }

    pub fn history(&self) -> &HistoryStore {
        &self.services.history
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Rollbacks through this engine
    pub fn rollbacks(&self) -> RollbackManager<'_> {
        RollbackManager::new(self)
    }

    /// Store a project configuration record
    pub async fn register_project(&self, config: &ProjectConfig) -> Result<(), DeployError> {
        config.validate().map_err(DeployError::ConfigInvalid)?;
        save(self.services.state.as_ref(), &keys::project(&config.name), config).await?;
        info!("Registered project {}", config.name);
        Ok(())
    }

    /// Load a project configuration record
    pub async fn project(&self, name: &str) -> Result<ProjectConfig, DeployError> {
        load(self.services.state.as_ref(), &keys::project(name))
            .await?
            .ok_or_else(|| DeployError::ConfigMissing(format!("project {} is not registered", name)))
    }

    /// Deploy a version with the requested strategy.
    ///
    /// `Err` means the request was rejected before any remote command ran.
    /// Pipeline failures, including a rejected port, are reported in the
    /// returned result.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeploymentResult, DeployError> {
        let strategy = strategy::for_request(&request)?;
        self.validate_request(&request, strategy.as_ref())?;

        let key = match request.strategy {
            StrategyKind::Preview => {
                preview_lock_key(&request.project, request.pr_number.as_deref().unwrap_or_default())
            }
            _ => lock_key(&request.project, request.environment),
        };
        let _guard = self.locks.lock(&key).await;
        self.run_locked(request, strategy, false).await
    }

    /// Promote the running canary of a project environment to stable
    pub async fn promote(
        &self,
        project: &str,
        environment: Environment,
        options: PromoteOptions,
    ) -> Result<DeploymentResult, DeployError> {
        validate_project(project)?;
        if environment == Environment::Preview {
            return Err(DeployError::InvalidRequest(
                "previews have no canary to promote".to_string(),
            ));
        }

        let _guard = self.lock_flow(project, environment).await;
        let canary: CanaryMetadata = load(
            self.services.state.as_ref(),
            &keys::canary(project, environment),
        )
        .await?
        .ok_or_else(|| {
            DeployError::InvalidRequest(format!("no canary running for {}/{}", project, environment))
        })?;

        info!(
            "Promoting canary {} of {}/{} at {}%",
            canary.version, project, environment, canary.weight
        );
        let mut request = DeployRequest::new(
            project,
            environment,
            canary.version.clone(),
            StrategyKind::Promote,
        );
        request.image = Some(canary.image.clone());
        request.skip_healthcheck = options.skip_healthcheck;
        request.force = options.force;

        self.run_locked(request, Box::new(PromoteStrategy::new(canary)), false)
            .await
    }

    pub(crate) async fn lock_flow(&self, project: &str, environment: Environment) -> OwnedMutexGuard<()> {
        self.locks.lock(&lock_key(project, environment)).await
    }

    fn validate_request(&self, request: &DeployRequest, strategy: &dyn Strategy) -> Result<(), DeployError> {
        validate_project(&request.project)?;
        validate_version(&request.version)?;
        if request.environment == Environment::Preview && strategy.kind() != StrategyKind::Preview {
            return Err(DeployError::InvalidRequest(format!(
                "the preview environment only accepts preview deployments, not {}",
                strategy.kind()
            )));
        }
        strategy.validate(request)
    }

    /// Plan and run a flow. The caller holds the flow lock.
    pub(crate) async fn run_locked(
        &self,
        request: DeployRequest,
        mut strategy: Box<dyn Strategy>,
        dry_run: bool,
    ) -> Result<DeploymentResult, DeployError> {
        let started = Instant::now();
        let project = self.project(&request.project).await?;
        let env_config = project.environment(request.environment);

        let (target, pipeline) = {
            let input = PlanInput {
                request: &request,
                project: &project,
                env_config: &env_config,
                options: &self.options,
                state: self.services.state.as_ref(),
                ledger: self.services.ledger.as_ref(),
            };
            let target = strategy.prepare(&input).await?;
            let pipeline = Pipeline::new(strategy.plan(&input, &target));
            (target, pipeline)
        };
        info!(
            "{} {} of {} to {}{}: {}",
            request.strategy,
            request.version,
            request.project,
            request.environment,
            if dry_run { " (dry run)" } else { "" },
            pipeline.names().join(" -> ")
        );

        let image = request
            .image
            .clone()
            .unwrap_or_else(|| project.image.tagged(&request.version));
        let mut ctx = StepContext {
            project,
            environment: request.environment,
            env_config,
            version: request.version.clone(),
            image,
            container: target.container.clone(),
            port: 0,
            domain: target.domain.clone(),
            always_pull: request.force,
            skip_healthcheck: request.skip_healthcheck,
            backup_image: None,
            services: self.services.clone(),
        };

        if dry_run {
            return Ok(self.simulate(&request, &target, &pipeline, &mut ctx, started).await);
        }

        let executor = self.services.runtime.executor().clone();
        executor.connect().await?;
        let outcome = self
            .execute(&request, &target, &pipeline, &mut ctx, started)
            .await;
        if let Err(e) = executor.disconnect().await {
            warn!("Failed to disconnect from {}: {}", executor.target(), e);
        }

        let result = outcome?;
        self.notify(Notification::from_result(&self.options.notify_channel, &result))
            .await;
        Ok(result)
    }

    async fn execute(
        &self,
        request: &DeployRequest,
        target: &Target,
        pipeline: &Pipeline,
        ctx: &mut StepContext,
        started: Instant,
    ) -> Result<DeploymentResult, DeployError> {
        let mut fsm = FlowFsm::new();
        advance(&mut fsm, FlowEvent::Validate)?;
        advance(&mut fsm, FlowEvent::Reserve)?;

        let claim_started = Instant::now();
        let claim = match self.claim_port(target).await {
            Ok(claim) => claim,
            Err(e) => {
                error!("Port validation failed for {}: {}", target.key, e);
                advance(&mut fsm, FlowEvent::Fail(e.to_string()))?;
                let step = DeploymentStep::failed(
                    PORT_VALIDATION_STEP,
                    e.to_string(),
                    elapsed_ms(claim_started),
                );
                return Ok(self.result(
                    request,
                    started,
                    None,
                    PortValidation::Rejected,
                    vec![step],
                    Some(format!("{}: {}", PORT_VALIDATION_STEP, e)),
                ));
            }
        };
        ctx.port = claim.port;
        let mut steps = vec![DeploymentStep {
            status: StepStatus::Success,
            duration_ms: elapsed_ms(claim_started),
            output: Some(claim.note.clone()),
            ..DeploymentStep::new(PORT_VALIDATION_STEP)
        }];

        advance(&mut fsm, FlowEvent::Execute)?;
        let run = pipeline.run(ctx).await;
        let success = run.success();
        steps.extend(run.steps);

        advance(&mut fsm, FlowEvent::Finalize)?;
        self.settle(&claim, success).await;
        match &run.failure {
            None => advance(&mut fsm, FlowEvent::Succeed)?,
            Some(failure) => advance(&mut fsm, FlowEvent::Fail(failure.clone()))?,
        }

        Ok(self.result(
            request,
            started,
            Some(claim.port),
            claim.validation,
            steps,
            run.failure,
        ))
    }

    async fn resolve_port(&self, target: &Target) -> Result<u16, DeployError> {
        if let Some(port) = target.preferred_port {
            if target.excluded_ports.contains(&port) {
                return Err(DeployError::PortConflict {
                    port,
                    holder: format!("another instance of {}", target.key.project),
                });
            }
            return Ok(port);
        }
        let ledger = &self.services.ledger;
        if let Some(commitment) = ledger.commitment_for(&target.key).await? {
            if !target.excluded_ports.contains(&commitment.port) {
                return Ok(commitment.port);
            }
        }
        Ok(ledger
            .find_next_available_excluding(
                target.key.environment,
                &target.key.service,
                &target.excluded_ports,
            )
            .await?)
    }

    /// Reserve the target port, degrading to a direct probe when the ledger
    /// cannot be reached. Never succeeds without positive evidence the port
    /// is free.
    async fn claim_port(&self, target: &Target) -> Result<PortClaim, DeployError> {
        let port = self.resolve_port(target).await?;
        match self.services.ledger.reserve(&target.key, port).await {
            Ok(reservation) => Ok(PortClaim {
                port,
                note: format!("reserved port {} for {}", port, target.key),
                token: Some(reservation.token),
                validation: PortValidation::Reserved,
            }),
            Err(LedgerError::Unavailable(reason)) => {
                warn!(
                    "Port ledger unavailable ({}), probing port {} on the host",
                    reason, port
                );
                match self.services.runtime.probe_port(port, &target.container).await {
                    Ok(PortProbe::Free) => Ok(PortClaim {
                        port,
                        token: None,
                        validation: PortValidation::Fallback,
                        note: format!(
                            "port {} validated via fallback, no reservation held",
                            port
                        ),
                    }),
                    Ok(PortProbe::HeldByOwn(names)) => Ok(PortClaim {
                        port,
                        token: None,
                        validation: PortValidation::Fallback,
                        note: format!(
                            "port {} held by {} only; validated via fallback, no reservation held",
                            port,
                            names.join(", ")
                        ),
                    }),
                    Ok(PortProbe::Bound(holder)) => Err(DeployError::PortConflict { port, holder }),
                    Err(e) => Err(DeployError::PortLedgerUnavailable(format!(
                        "{}; fallback probe failed: {}",
                        reason, e
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn settle(&self, claim: &PortClaim, success: bool) {
        let Some(token) = &claim.token else {
            if success {
                warn!(
                    "Port {} is in use without a ledger commitment (validated via fallback)",
                    claim.port
                );
            }
            return;
        };

        let ledger = &self.services.ledger;
        if success {
            match ledger.commit(token).await {
                Ok(true) => {}
                Ok(false) => warn!("Reservation of port {} lapsed before commit", claim.port),
                Err(e) => warn!("Failed to commit port {}: {}", claim.port, e),
            }
        } else if let Err(e) = ledger.release(token).await {
            warn!("Failed to release reservation of port {}: {}", claim.port, e);
        }
    }

    async fn simulate(
        &self,
        request: &DeployRequest,
        target: &Target,
        pipeline: &Pipeline,
        ctx: &mut StepContext,
        started: Instant,
    ) -> DeploymentResult {
        ctx.port = match target.preferred_port {
            Some(port) => port,
            None => match self.services.ledger.commitment_for(&target.key).await {
                Ok(Some(commitment)) => commitment.port,
                _ => 0,
            },
        };

        let mut steps = vec![DeploymentStep {
            status: StepStatus::Skipped,
            output: Some(format!(
                "claim port {} for {} (nothing reserved in a dry run)",
                ctx.port_label(),
                target.key
            )),
            simulated: true,
            ..DeploymentStep::new(PORT_VALIDATION_STEP)
        }];
        steps.extend(pipeline.simulate(ctx));

        let port = (ctx.port != 0).then_some(ctx.port);
        self.result(request, started, port, PortValidation::Simulated, steps, None)
    }

    fn result(
        &self,
        request: &DeployRequest,
        started: Instant,
        port: Option<u16>,
        port_validation: PortValidation,
        steps: Vec<DeploymentStep>,
        error: Option<String>,
    ) -> DeploymentResult {
        let result = DeploymentResult {
            success: error.is_none(),
            project: request.project.clone(),
            environment: request.environment,
            version: request.version.clone(),
            strategy: request.strategy,
            duration_ms: elapsed_ms(started),
            timestamp: Utc::now(),
            port,
            port_validation,
            steps,
            error,
        };
        if result.success {
            info!(
                "{} of {} {} to {} succeeded in {} ms",
                result.strategy, result.project, result.version, result.environment, result.duration_ms
            );
        } else {
            error!(
                "{} of {} {} to {} failed: {}",
                result.strategy,
                result.project,
                result.version,
                result.environment,
                result.error.as_deref().unwrap_or_default()
            );
        }
        result
    }

    async fn notify(&self, notification: Notification) {
        let outcome = self.notifier.send(&notification).await;
        if !outcome.success {
            warn!(
                "Notification `{}` not delivered: {}",
                notification.title,
                outcome.error.unwrap_or_default()
            );
        }
    }

    /// Remove a preview: container, route, port commitment and metadata
    pub async fn teardown_preview(&self, project: &str, pr_number: &str) -> Result<TeardownReport, DeployError> {
        validate_project(project)?;
        if !is_valid_name(pr_number) {
            return Err(DeployError::InvalidRequest(format!(
                "invalid pull request number `{}`",
                pr_number
            )));
        }
        let _guard = self.locks.lock(&preview_lock_key(project, pr_number)).await;
        self.teardown_locked(project, pr_number).await
    }

    async fn teardown_locked(&self, project: &str, pr_number: &str) -> Result<TeardownReport, DeployError> {
        let state = self.services.state.as_ref();
        let metadata_key = keys::preview(project, pr_number);
        let metadata: Option<PreviewMetadata> = load(state, &metadata_key).await?;

        let mut report = TeardownReport::new(project, pr_number);
        report.found = metadata.is_some();
        let container = metadata
            .as_ref()
            .map(|m| m.container.clone())
            .unwrap_or_else(|| preview_container(project, pr_number));
        let domain = metadata.as_ref().and_then(|m| m.domain.clone());
        info!("Tearing down preview pr-{} of {}", pr_number, project);

        let executor = self.services.runtime.executor().clone();
        executor.connect().await?;
        match self.services.runtime.remove_container(&container).await {
            Ok(removed) => report.container_removed = removed,
            Err(e) => report.errors.push(format!("remove {}: {}", container, e)),
        }
        if let Some(domain) = &domain {
            match drop_route(self.services.router.as_ref(), domain).await {
                Ok(()) => report.route_removed = true,
                Err(e) => report.errors.push(format!("remove route {}: {}", domain, e)),
            }
        }
        if let Err(e) = executor.disconnect().await {
            warn!("Failed to disconnect from {}: {}", executor.target(), e);
        }

        // The port stays claimed while the container may still hold it
        if report.errors.is_empty() {
            let key = PortKey::new(project, Environment::Preview, preview_service(pr_number));
            match self.services.ledger.release_commitment(&key).await {
                Ok(released) => report.port_released = released,
                Err(e) => report.errors.push(format!("release port of {}: {}", key, e)),
            }
        }
        if report.errors.is_empty() {
            state.delete(&metadata_key).await?;
            self.services
                .history
                .remove_key(&keys::preview_history(project, pr_number))
                .await?;
        }

        let (severity, verdict) = if report.success() {
            (Severity::Info, "removed")
        } else {
            (Severity::Warning, "partially removed")
        };
        self.notify(Notification {
            channel: self.options.notify_channel.clone(),
            severity,
            title: format!("preview pr-{} of {} {}", pr_number, project, verdict),
            message: report.errors.join("; "),
            details: serde_json::to_value(&report).unwrap_or_default(),
        })
        .await;
        Ok(report)
    }

    /// Tear down every preview whose TTL has passed
    pub async fn sweep_previews(&self, now: DateTime<Utc>) -> Result<Vec<TeardownReport>, DeployError> {
        let mut reports = Vec::new();
        for preview in self.previews(None).await? {
            if !preview.is_expired(now) {
                continue;
            }
            info!(
                "Preview pr-{} of {} expired at {}",
                preview.pr_number, preview.project, preview.expires_at
            );
            let _guard = self
                .locks
                .lock(&preview_lock_key(&preview.project, &preview.pr_number))
                .await;
            match self.teardown_locked(&preview.project, &preview.pr_number).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    let mut report = TeardownReport::new(&preview.project, &preview.pr_number);
                    report.found = true;
                    report.errors.push(e.to_string());
                    reports.push(report);
                }
            }
        }
        Ok(reports)
    }

    /// Recorded previews, optionally of one project
    pub async fn previews(&self, project: Option<&str>) -> Result<Vec<PreviewMetadata>, DeployError> {
        let state = self.services.state.as_ref();
        let prefix = match project {
            Some(project) => format!("{}{}/", keys::PREVIEWS_PREFIX, project),
            None => keys::PREVIEWS_PREFIX.to_string(),
        };
        let mut previews = Vec::new();
        for key in state.list(&prefix).await? {
            match load::<PreviewMetadata>(state, &key).await {
                Ok(Some(preview)) => previews.push(preview),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable preview record {}: {}", key, e),
            }
        }
        Ok(previews)
    }

    /// Slot, canary, history and ports of a project environment
    pub async fn status(&self, project: &str, environment: Environment) -> Result<EnvironmentStatus, DeployError> {
        let state = self.services.state.as_ref();
        let ports = self
            .services
            .ledger
            .commitments()
            .await?
            .into_iter()
            .filter(|c| c.key.project == project && c.key.environment == environment)
            .collect();

        Ok(EnvironmentStatus {
            project: project.to_string(),
            environment,
            active_slot: load(state, &keys::slot(project, environment)).await?,
            canary: load(state, &keys::canary(project, environment)).await?,
            history: self.services.history.load(project, environment).await?,
            ports,
        })
    }

    /// Ledger commitments and live reservations, optionally of one project
    pub async fn port_status(&self, project: Option<&str>) -> Result<PortStatus, DeployError> {
        let ledger = &self.services.ledger;
        let matches = |key: &PortKey| project.is_none_or(|p| key.project == p);
        Ok(PortStatus {
            commitments: ledger
                .commitments()
                .await?
                .into_iter()
                .filter(|c| matches(&c.key))
                .collect(),
            reservations: ledger
                .reservations()
                .await?
                .into_iter()
                .filter(|r| matches(&r.key))
                .collect(),
        })
    }
}

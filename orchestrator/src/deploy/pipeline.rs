//! Ordered step execution

use std::time::Instant;

use tracing::{error, info, warn};

use crate::deploy::context::StepContext;
use crate::deploy::step::{Step, StepOutcome};
use crate::models::deployment::{DeploymentStep, StepStatus};
use crate::utils::elapsed_ms;

/// Steps recorded by a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub steps: Vec<DeploymentStep>,
    /// `step: error` of the blocking step that stopped the run
    pub failure: Option<String>,
}

impl PipelineRun {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }
}

/// A strategy's ordered steps
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run the steps in order.
    ///
    /// The first failing blocking step is compensated and ends the run;
    /// later steps are not attempted. Soft failures are recorded only.
    pub async fn run(&self, ctx: &mut StepContext) -> PipelineRun {
        let mut records = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let name = step.name();
            info!("[{}] running", name);
            let started = Instant::now();
            let result = step.run(ctx).await;

            let mut record = DeploymentStep::new(name);
            match result {
                Ok(StepOutcome::Done(output)) => {
                    record.status = StepStatus::Success;
                    record.output = output;
                }
                Ok(StepOutcome::Skipped(reason)) => {
                    info!("[{}] skipped: {}", name, reason);
                    record.status = StepStatus::Skipped;
                    record.output = Some(reason);
                }
                Err(e) if step.blocking() => {
                    error!("[{}] failed: {}", name, e);
                    record.status = StepStatus::Failed;
                    record.error = Some(e.to_string());
                    if let Some(cleanup) = step.compensate(ctx).await {
                        info!("[{}] compensated: {}", name, cleanup);
                        record.output = Some(cleanup);
                    }
                    record.duration_ms = elapsed_ms(started);
                    records.push(record);
                    return PipelineRun {
                        steps: records,
                        failure: Some(format!("{}: {}", name, e)),
                    };
                }
                Err(e) => {
                    warn!("[{}] failed, continuing: {}", name, e);
                    record.status = StepStatus::Failed;
                    record.error = Some(e.to_string());
                }
            }
            record.duration_ms = elapsed_ms(started);
            records.push(record);
        }

        PipelineRun {
            steps: records,
            failure: None,
        }
    }

    /// Describe the steps without running them
    pub fn simulate(&self, ctx: &StepContext) -> Vec<DeploymentStep> {
        self.steps
            .iter()
            .map(|step| DeploymentStep {
                status: StepStatus::Skipped,
                output: Some(step.describe(ctx)),
                simulated: true,
                ..DeploymentStep::new(step.name())
            })
            .collect()
    }
}

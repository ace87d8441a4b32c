//! Pipeline step contract

use async_trait::async_trait;

use crate::deploy::context::StepContext;
use crate::errors::DeployError;

/// Result of a step that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step did its work, with optional output
    Done(Option<String>),
    /// Nothing to do, with the reason
    Skipped(String),
}

impl StepOutcome {
    pub fn done(output: impl Into<String>) -> Self {
        StepOutcome::Done(Some(output.into()))
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped(reason.into())
    }
}

/// One named unit of a deployment pipeline.
///
/// A failing blocking step stops the pipeline and fails the flow; a failing
/// soft step is recorded and the pipeline continues.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    fn blocking(&self) -> bool;

    /// What the step would do, for dry runs
    fn describe(&self, ctx: &StepContext) -> String;

    async fn run(&self, ctx: &mut StepContext) -> Result<StepOutcome, DeployError>;

    /// Undo what a failed run created. Called once, only for blocking steps.
    async fn compensate(&self, _ctx: &mut StepContext) -> Option<String> {
        None
    }
}

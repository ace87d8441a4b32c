//! Finite state machine for a deployment flow

use serde::{Deserialize, Serialize};

/// Flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    /// Created, nothing checked yet
    Pending,

    /// Request and project configuration are being checked
    Validating,

    /// Target port is being claimed
    Reserving,

    /// Pipeline steps are running
    Executing,

    /// Reservation is being committed or released
    Finalizing,

    /// Flow finished without a blocking failure
    Succeeded,

    /// Flow stopped on a failure
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Succeeded | FlowState::Failed)
    }
}

/// Flow event
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// Start validating the request
    Validate,

    /// Validation passed, claim the port
    Reserve,

    /// Port claimed, run the pipeline
    Execute,

    /// Pipeline finished, settle the reservation
    Finalize,

    /// Flow completed
    Succeed,

    /// Flow failed
    Fail(String),
}

/// Deployment flow FSM
#[derive(Debug, Clone)]
pub struct FlowFsm {
    state: FlowState,
    error: Option<String>,
}

impl FlowFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: FlowState::Pending,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: FlowEvent) -> Result<(), String> {
        let new_state = match (self.state, &event) {
            (FlowState::Pending, FlowEvent::Validate) => FlowState::Validating,
            (FlowState::Validating, FlowEvent::Reserve) => FlowState::Reserving,
            (FlowState::Reserving, FlowEvent::Execute) => FlowState::Executing,
            (FlowState::Executing, FlowEvent::Finalize) => FlowState::Finalizing,
            (FlowState::Finalizing, FlowEvent::Succeed) => FlowState::Succeeded,

            // Any running flow may fail
            (state, FlowEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                FlowState::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for FlowFsm {
    fn default() -> Self {
        Self::new()
    }
}

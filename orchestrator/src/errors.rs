//! Error types for the deployment orchestrator

use thiserror::Error;

use crate::models::project::Environment;

/// Main error type for deployment, rollback and teardown flows
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Port {port} is already held by {holder}")]
    PortConflict { port: u16, holder: String },

    #[error("Port ledger unavailable: {0}")]
    PortLedgerUnavailable(String),

    #[error("No available port for {service} in {environment}")]
    NoAvailablePort {
        environment: Environment,
        service: String,
    },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("Container start failed: {0}")]
    ContainerStartFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Health check timed out after {attempts} attempts")]
    HealthCheckTimeout { attempts: u32 },

    #[error("Traffic switch failed: {0}")]
    TrafficSwitchFailed(String),

    #[error("Remote command `{command}` exited with {exit_code}: {stderr}")]
    RemoteCommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Remote command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("No rollback target in history for {project}/{environment}")]
    NoHistory {
        project: String,
        environment: Environment,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

/// Errors raised by the port ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Port {port} is in use by {holder}")]
    PortInUse { port: u16, holder: String },

    #[error("Invalid reservation request: {0}")]
    Invalid(String),

    #[error("No available port for {service} in {environment}")]
    NoAvailablePort {
        environment: Environment,
        service: String,
    },

    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for DeployError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::PortInUse { port, holder } => DeployError::PortConflict { port, holder },
            LedgerError::Invalid(msg) => DeployError::InvalidRequest(msg),
            LedgerError::NoAvailablePort {
                environment,
                service,
            } => DeployError::NoAvailablePort {
                environment,
                service,
            },
            LedgerError::Unavailable(msg) => DeployError::PortLedgerUnavailable(msg),
        }
    }
}

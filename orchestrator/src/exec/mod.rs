//! Remote command execution
//!
//! The orchestrator never talks to a host directly: every command goes
//! through a [`RemoteExecutor`], and every docker/ss command line and its
//! output parsing lives in [`docker::ContainerRuntime`].

pub mod docker;
pub mod local;
pub mod ssh;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Options for a single remote command
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

/// Output of a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands on one target host.
///
/// Implementations serialise calls: commands are never interleaved over
/// one connection.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Human-readable target, e.g. `deploy@10.0.0.5`
    fn target(&self) -> String;

    /// Open the connection
    async fn connect(&self) -> Result<(), DeployError>;

    /// Close the connection
    async fn disconnect(&self) -> Result<(), DeployError>;

    /// Run a shell command; exceeding `opts.timeout` is an error
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecOutput, DeployError>;

    /// Write a file on the target
    async fn write_file(&self, path: &str, content: &str) -> Result<(), DeployError>;
}

/// Await a command future under a timeout
pub(crate) async fn with_timeout<F>(timeout: Duration, future: F) -> Result<ExecOutput, DeployError>
where
    F: std::future::Future<Output = Result<ExecOutput, DeployError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| DeployError::CommandTimeout(timeout))?
}

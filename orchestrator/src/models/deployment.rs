//! Deployment request and result models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::project::Environment;

/// Rollout strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Rolling,
    BlueGreen,
    Canary,
    Preview,
    /// Promotion of a running canary to the stable instance
    Promote,
    /// Redeploy of a historical version
    Rollback,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Rolling => "rolling",
            StrategyKind::BlueGreen => "blue-green",
            StrategyKind::Canary => "canary",
            StrategyKind::Preview => "preview",
            StrategyKind::Promote => "promote",
            StrategyKind::Rollback => "rollback",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rolling" => Ok(StrategyKind::Rolling),
            "blue-green" | "bluegreen" | "blue_green" => Ok(StrategyKind::BlueGreen),
            "canary" => Ok(StrategyKind::Canary),
            "preview" => Ok(StrategyKind::Preview),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

/// A deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub project: String,
    pub environment: Environment,
    pub version: String,
    pub strategy: StrategyKind,

    /// Full image reference overriding the project's image coordinates
    #[serde(default)]
    pub image: Option<String>,

    /// Canary traffic share in percent
    #[serde(default)]
    pub canary_weight: Option<u32>,

    /// Pull request identifier for preview deployments
    #[serde(default)]
    pub pr_number: Option<String>,

    /// Do not gate on the health check
    #[serde(default)]
    pub skip_healthcheck: bool,

    /// Pull the image even when it is present on the host
    #[serde(default)]
    pub force: bool,
}

impl DeployRequest {
    pub fn new(
        project: impl Into<String>,
        environment: Environment,
        version: impl Into<String>,
        strategy: StrategyKind,
    ) -> Self {
        Self {
            project: project.into(),
            environment,
            version: version.into(),
            strategy,
            image: None,
            canary_weight: None,
            pr_number: None,
            skip_healthcheck: false,
            force: false,
        }
    }
}

/// Status of a pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// Record of one executed pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether the step was only described, never executed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

impl DeploymentStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            duration_ms: 0,
            output: None,
            error: None,
            simulated: false,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Failed,
            duration_ms,
            error: Some(error.into()),
            ..Self::new(name)
        }
    }
}

/// How the target port was validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortValidation {
    /// A ledger reservation was held for the flow
    Reserved,
    /// Validated via fallback probe, no reservation held
    Fallback,
    /// Dry run, nothing reserved
    Simulated,
    /// The port was rejected
    Rejected,
}

/// Immutable outcome of a deployment or rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    pub project: String,
    pub environment: Environment,
    pub version: String,
    pub strategy: StrategyKind,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    pub port_validation: PortValidation,
    pub steps: Vec<DeploymentStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentResult {
    /// Names of the recorded steps, in order
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Find a recorded step by name
    pub fn step(&self, name: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

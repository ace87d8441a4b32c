//! Project and environment configuration models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
    Preview,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Preview => "preview",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            "preview" => Ok(Environment::Preview),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

/// Container image coordinates, without the tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry host, e.g. `ghcr.io`
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Registry namespace (organisation or user)
    pub owner: String,

    /// Repository name
    pub name: String,
}

fn default_registry() -> String {
    "ghcr.io".to_string()
}

impl ImageRef {
    /// Full image reference for a version tag
    pub fn tagged(&self, version: &str) -> String {
        format!("{}/{}/{}:{}", self.registry, self.owner, self.name, version)
    }
}

/// Declared container health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// HTTP path probed inside and outside the container
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Seconds between health gate attempts
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Maximum health gate attempts
    #[serde(default = "default_health_retries")]
    pub retries: u32,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval() -> u64 {
    5
}

fn default_health_retries() -> u32 {
    12
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_health_interval(),
            retries: default_health_retries(),
        }
    }
}

/// Per-environment settings of a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Fixed host port for the app service
    #[serde(default)]
    pub port: Option<u16>,

    /// Public domain routed to the app
    #[serde(default)]
    pub domain: Option<String>,

    /// Env file on the target host passed to the container
    #[serde(default)]
    pub env_file: Option<String>,

    /// Health check declaration
    #[serde(default)]
    pub health: HealthCheckConfig,
}

/// Preview environment settings of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Suffix appended to `pr-<n>.` to form the preview domain
    pub domain_suffix: Option<String>,

    /// Lifetime of a preview deployment
    #[serde(default)]
    pub ttl_hours: Option<u64>,
}

/// Persisted project configuration record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name, also used to name containers
    pub name: String,

    /// Image coordinates
    pub image: ImageRef,

    /// Port the app listens on inside the container
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// Environment-specific settings
    #[serde(default)]
    pub environments: BTreeMap<Environment, EnvironmentConfig>,

    /// Preview settings
    #[serde(default)]
    pub preview: Option<PreviewConfig>,
}

fn default_container_port() -> u16 {
    3000
}

impl ProjectConfig {
    /// Settings for an environment, defaults when not declared
    pub fn environment(&self, environment: Environment) -> EnvironmentConfig {
        self.environments
            .get(&environment)
            .cloned()
            .unwrap_or_default()
    }

    /// Validate fields the orchestrator relies on
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_name(&self.name) {
            return Err(format!(
                "project name `{}` must be lowercase alphanumeric with dashes",
                self.name
            ));
        }
        if self.image.owner.is_empty() || self.image.name.is_empty() {
            return Err("image owner and name are required".to_string());
        }
        for (environment, config) in &self.environments {
            if config.port == Some(0) {
                return Err(format!("port for {} must be non-zero", environment));
            }
            if !config.health.path.starts_with('/') {
                return Err(format!(
                    "health path for {} must start with `/`",
                    environment
                ));
            }
        }
        Ok(())
    }
}

/// Names used for containers and state keys
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
}

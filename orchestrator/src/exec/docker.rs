//! Docker runtime adapter
//!
//! Builds every docker/ss command line the orchestrator issues and turns
//! their output into typed values. Structured output (`--format '{{json}}'`)
//! is used wherever docker offers it; the remaining text parsing is kept in
//! the `parse_*` functions below.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::exec::{ExecOptions, ExecOutput, RemoteExecutor};
use crate::utils::shell_quote;

/// Label carrying the project name on every managed container
pub const PROJECT_LABEL: &str = "fleetdeploy.project";

/// Label carrying the deployed version on every managed container
pub const VERSION_LABEL: &str = "fleetdeploy.version";

/// Health-check command baked into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCommand {
    pub path: String,
    pub interval_secs: u64,
    pub retries: u32,
}

/// Container to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env_file: Option<String>,
    pub health: Option<HealthCommand>,
    pub labels: Vec<(String, String)>,
}

/// `docker inspect` `.State`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub health: Option<ContainerHealth>,
}

/// `docker inspect` `.State.Health`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerHealth {
    pub status: String,
}

impl ContainerState {
    /// The container stopped and will not recover on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "exited" | "dead")
    }

    /// Declared health status, when the container has a health check
    pub fn health_status(&self) -> Option<&str> {
        self.health.as_ref().map(|h| h.status.as_str())
    }
}

/// Who is listening on a host port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortProbe {
    /// Nothing is bound
    Free,
    /// Bound only by the flow's own container
    HeldByOwn(Vec<String>),
    /// Bound by something else
    Bound(String),
}

/// Docker operations on one host
#[derive(Clone)]
pub struct ContainerRuntime {
    executor: Arc<dyn RemoteExecutor>,
    command_timeout: Duration,
    pull_timeout: Duration,
}

impl ContainerRuntime {
    pub fn new(executor: Arc<dyn RemoteExecutor>, command_timeout: Duration, pull_timeout: Duration) -> Self {
        Self {
            executor,
            command_timeout,
            pull_timeout,
        }
    }

    /// Underlying executor
    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<ExecOutput, DeployError> {
        self.executor.exec(command, ExecOptions { timeout }).await
    }

    /// Run a command and fail on a non-zero exit code
    pub async fn run_checked(&self, command: &str) -> Result<ExecOutput, DeployError> {
        let output = self.run(command, self.command_timeout).await?;
        if !output.success() {
            return Err(DeployError::RemoteCommandFailed {
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Whether an image is present on the host
    pub async fn image_exists(&self, image: &str) -> Result<bool, DeployError> {
        let command = format!("docker image inspect --format '{{{{.Id}}}}' {}", shell_quote(image));
        Ok(self.run(&command, self.command_timeout).await?.success())
    }

    /// Pull an image
    pub async fn pull(&self, image: &str) -> Result<(), DeployError> {
        info!("Pulling image: {}", image);
        let command = format!("docker pull {}", shell_quote(image));
        let output = self
            .run(&command, self.pull_timeout)
            .await
            .map_err(|e| DeployError::ImagePullFailed(format!("{}: {}", image, e)))?;

        if !output.success() {
            return Err(DeployError::ImagePullFailed(format!(
                "{}: {}",
                image,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Image a container was created from, `None` when it does not exist
    pub async fn container_image(&self, name: &str) -> Result<Option<String>, DeployError> {
        let command = format!(
            "docker inspect --format '{{{{.Config.Image}}}}' {}",
            shell_quote(name)
        );
        let output = self.run(&command, self.command_timeout).await?;
        if !output.success() {
            return Ok(None);
        }
        let image = output.stdout.trim();
        Ok((!image.is_empty()).then(|| image.to_string()))
    }

    /// Runtime state of a container, `None` when it does not exist
    pub async fn container_state(&self, name: &str) -> Result<Option<ContainerState>, DeployError> {
        let command = format!(
            "docker inspect --format '{{{{json .State}}}}' {}",
            shell_quote(name)
        );
        let output = self.run(&command, self.command_timeout).await?;
        if !output.success() {
            return Ok(None);
        }
        parse_container_state(&output.stdout).map(Some)
    }

    /// Stop and remove a container. Returns false when it did not exist.
    pub async fn remove_container(&self, name: &str) -> Result<bool, DeployError> {
        let quoted = shell_quote(name);
        let stop = self
            .run(&format!("docker stop -t 10 {}", quoted), self.command_timeout)
            .await?;
        if !stop.success() {
            if is_missing_container(&stop.stderr) {
                debug!("Container {} does not exist", name);
                return Ok(false);
            }
            return Err(DeployError::RemoteCommandFailed {
                command: format!("docker stop {}", name),
                exit_code: stop.exit_code,
                stderr: stop.stderr.trim().to_string(),
            });
        }

        let remove = self
            .run(&format!("docker rm {}", quoted), self.command_timeout)
            .await?;
        if !remove.success() && !is_missing_container(&remove.stderr) {
            return Err(DeployError::RemoteCommandFailed {
                command: format!("docker rm {}", name),
                exit_code: remove.exit_code,
                stderr: remove.stderr.trim().to_string(),
            });
        }
        info!("Removed container {}", name);
        Ok(true)
    }

    /// Start a detached container, returning its id
    pub async fn run_container(&self, spec: &ContainerSpec) -> Result<String, DeployError> {
        let command = run_command(spec);
        info!("Starting container {} on port {}", spec.name, spec.host_port);

        let output = self
            .run(&command, self.command_timeout)
            .await
            .map_err(|e| DeployError::ContainerStartFailed(format!("{}: {}", spec.name, e)))?;
        if !output.success() {
            return Err(DeployError::ContainerStartFailed(format!(
                "{}: {}",
                spec.name,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Check who is listening on a host port.
    ///
    /// Only a container named exactly `own_container` belongs to the caller;
    /// any other holder is a conflict.
    pub async fn probe_port(&self, port: u16, own_container: &str) -> Result<PortProbe, DeployError> {
        let containers = self
            .run_checked(&format!(
                "docker ps --filter publish={} --format '{{{{.Names}}}}'",
                port
            ))
            .await?;
        let names = parse_names(&containers.stdout);
        if !names.is_empty() {
            if names.iter().all(|n| n == own_container) {
                return Ok(PortProbe::HeldByOwn(names));
            }
            return Ok(PortProbe::Bound(format!("container {}", names.join(", "))));
        }

        let listeners = self
            .run_checked(&format!("ss -tlnH 'sport = :{}'", port))
            .await?;
        if parse_listening(&listeners.stdout, port) {
            return Ok(PortProbe::Bound("host process".to_string()));
        }
        Ok(PortProbe::Free)
    }

    /// Check that an env file exists and parses; returns its variable count
    pub async fn check_env_file(&self, path: &str) -> Result<usize, DeployError> {
        let output = self.run(&format!("cat {}", shell_quote(path)), self.command_timeout).await?;
        if !output.success() {
            return Err(DeployError::ConfigMissing(format!("env file {} not found", path)));
        }
        parse_env_file(&output.stdout)
            .map_err(|e| DeployError::ConfigInvalid(format!("{}: {}", path, e)))
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container")
}

fn run_command(spec: &ContainerSpec) -> String {
    let mut parts = vec![
        "docker run -d".to_string(),
        format!("--name {}", shell_quote(&spec.name)),
        "--restart unless-stopped".to_string(),
        format!("-p {}:{}", spec.host_port, spec.container_port),
    ];
    if let Some(env_file) = &spec.env_file {
        parts.push(format!("--env-file {}", shell_quote(env_file)));
    }
    if let Some(health) = &spec.health {
        let probe = format!(
            "curl -fsS http://localhost:{}{} || exit 1",
            spec.container_port, health.path
        );
        parts.push(format!("--health-cmd {}", shell_quote(&probe)));
        parts.push(format!("--health-interval {}s", health.interval_secs.max(1)));
        parts.push(format!("--health-retries {}", health.retries.max(1)));
    }
    for (key, value) in &spec.labels {
        parts.push(format!("--label {}", shell_quote(&format!("{}={}", key, value))));
    }
    parts.push(shell_quote(&spec.image));
    parts.join(" ")
}

/// Parse `docker inspect --format '{{json .State}}'`
pub fn parse_container_state(stdout: &str) -> Result<ContainerState, DeployError> {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).map_err(|e| {
        DeployError::RemoteCommandFailed {
            command: "docker inspect".to_string(),
            exit_code: 0,
            stderr: format!("unexpected state output `{}`: {}", trimmed, e),
        }
    })
}

/// Parse one name per line
pub fn parse_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `ss -tlnH` output lists a listener on `port`
pub fn parse_listening(stdout: &str, port: u16) -> bool {
    let suffix = format!(":{}", port);
    stdout.lines().any(|line| {
        line.split_whitespace()
            .nth(3)
            .is_some_and(|local| local.ends_with(&suffix))
    })
}

/// Validate `KEY=VALUE` lines, returning the number of variables
pub fn parse_env_file(contents: &str) -> Result<usize, String> {
    let mut count = 0;
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, _)) = line.split_once('=') else {
            return Err(format!("line {} is not KEY=VALUE", index + 1));
        };
        let key = key.trim();
        let valid_key = !key.is_empty()
            && !key.starts_with(|c: char| c.is_ascii_digit())
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            return Err(format!("line {} has invalid key `{}`", index + 1, key));
        }
        count += 1;
    }
    Ok(count)
}

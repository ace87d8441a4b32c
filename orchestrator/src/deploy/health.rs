//! Health gate
//!
//! Bounded polling of a freshly started container. The container's declared
//! health status is authoritative when docker reports one; otherwise the gate
//! falls back to an HTTP GET against the published port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::exec::docker::ContainerRuntime;

/// Outcome of a health gate poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy { attempts: u32 },
    Unhealthy(String),
    Timeout { attempts: u32 },
}

/// Direct HTTP probe
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// GET `url`, returning the response status code
    async fn get(&self, url: &str) -> Result<u16, DeployError>;
}

/// `reqwest` backed probe
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, url: &str) -> Result<u16, DeployError> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}

/// What to poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub container: String,
    pub port: u16,
    pub path: String,
}

/// Polls containers until they report healthy
pub struct HealthGate {
    runtime: ContainerRuntime,
    probe: Arc<dyn HttpProbe>,
    host: String,
}

enum Attempt {
    Healthy,
    Pending(String),
    Failed(String),
}

impl HealthGate {
    pub fn new(runtime: ContainerRuntime, probe: Arc<dyn HttpProbe>, host: impl Into<String>) -> Self {
        Self {
            runtime,
            probe,
            host: host.into(),
        }
    }

    /// Poll `target` up to `max_attempts` times, sleeping `interval` between attempts
    pub async fn poll(&self, target: &HealthTarget, max_attempts: u32, interval: Duration) -> HealthStatus {
        let max_attempts = max_attempts.max(1);
        info!(
            "Waiting for {} to become healthy ({} attempts, {:?} apart)",
            target.container, max_attempts, interval
        );

        for attempt in 1..=max_attempts {
            match self.attempt(target).await {
                Attempt::Healthy => {
                    info!("{} is healthy after {} attempt(s)", target.container, attempt);
                    return HealthStatus::Healthy { attempts: attempt };
                }
                Attempt::Failed(reason) => {
                    warn!("{} is unhealthy: {}", target.container, reason);
                    return HealthStatus::Unhealthy(reason);
                }
                Attempt::Pending(reason) => {
                    debug!(
                        "Health attempt {}/{} for {}: {}",
                        attempt, max_attempts, target.container, reason
                    );
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!(
            "{} did not become healthy after {} attempts",
            target.container, max_attempts
        );
        HealthStatus::Timeout {
            attempts: max_attempts,
        }
    }

    async fn attempt(&self, target: &HealthTarget) -> Attempt {
        match self.runtime.container_state(&target.container).await {
            Ok(None) => return Attempt::Failed(format!("container {} not found", target.container)),
            Ok(Some(state)) if state.is_terminal() => {
                return Attempt::Failed(format!(
                    "container {} with exit code {}",
                    state.status, state.exit_code
                ));
            }
            Ok(Some(state)) => match state.health_status() {
                Some("healthy") => return Attempt::Healthy,
                Some(status) => return Attempt::Pending(format!("container reports {}", status)),
                None => {}
            },
            Err(e) => debug!("Container state unavailable, probing directly: {}", e),
        }

        let url = format!("http://{}:{}{}", self.host, target.port, target.path);
        match self.probe.get(&url).await {
            Ok(status) if (200..300).contains(&status) => Attempt::Healthy,
            Ok(status) => Attempt::Pending(format!("GET {} returned {}", url, status)),
            Err(e) => Attempt::Pending(format!("GET {} failed: {}", url, e)),
        }
    }
}

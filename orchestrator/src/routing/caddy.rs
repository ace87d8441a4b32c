//! Caddy site files written through the remote executor

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::errors::DeployError;
use crate::exec::{ExecOptions, RemoteExecutor};
use crate::routing::{TrafficRouter, WeightedBackend};
use crate::utils::shell_quote;

/// Writes one Caddy site file per domain and reloads Caddy
pub struct CaddyRouter {
    executor: Arc<dyn RemoteExecutor>,
    config_dir: String,
    reload_command: String,
}

impl CaddyRouter {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config_dir: impl Into<String>, reload_command: impl Into<String>) -> Self {
        Self {
            executor,
            config_dir: config_dir.into().trim_end_matches('/').to_string(),
            reload_command: reload_command.into(),
        }
    }

    fn site_path(&self, domain: &str) -> String {
        format!("{}/{}.caddy", self.config_dir, domain)
    }

    async fn run(&self, command: &str) -> Result<(), DeployError> {
        let output = self
            .executor
            .exec(
                command,
                ExecOptions {
                    timeout: Duration::from_secs(30),
                },
            )
            .await
            .map_err(|e| DeployError::TrafficSwitchFailed(e.to_string()))?;
        if !output.success() {
            return Err(DeployError::TrafficSwitchFailed(format!(
                "`{}` exited with {}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

fn validate_domain(domain: &str) -> Result<(), DeployError> {
    let valid = !domain.is_empty()
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DeployError::ConfigInvalid(format!("invalid domain `{}`", domain)))
    }
}

/// Site block routing a domain to a single upstream
pub fn render_site(domain: &str, port: u16, health_path: &str) -> String {
    format!(
        "{domain} {{\n\treverse_proxy localhost:{port} {{\n\t\thealth_uri {health_path}\n\t\thealth_interval 10s\n\t}}\n}}\n"
    )
}

/// Site block splitting a domain across weighted upstreams
pub fn render_weighted_site(domain: &str, backends: &[WeightedBackend], health_path: &str) -> String {
    let upstreams: Vec<String> = backends
        .iter()
        .map(|b| format!("localhost:{}", b.port))
        .collect();
    let weights: Vec<String> = backends.iter().map(|b| b.weight.to_string()).collect();
    format!(
        "{domain} {{\n\treverse_proxy {} {{\n\t\tlb_policy weighted_round_robin {}\n\t\thealth_uri {health_path}\n\t\thealth_interval 10s\n\t}}\n}}\n",
        upstreams.join(" "),
        weights.join(" ")
    )
}

#[async_trait]
impl TrafficRouter for CaddyRouter {
    async fn set_route(&self, domain: &str, port: u16, health_path: &str) -> Result<(), DeployError> {
        validate_domain(domain)?;
        info!("Routing {} -> localhost:{}", domain, port);
        self.executor
            .write_file(&self.site_path(domain), &render_site(domain, port, health_path))
            .await
            .map_err(|e| DeployError::TrafficSwitchFailed(e.to_string()))
    }

    async fn set_weighted_route(
        &self,
        domain: &str,
        backends: &[WeightedBackend],
        health_path: &str,
    ) -> Result<(), DeployError> {
        validate_domain(domain)?;
        // Zero-weight upstreams are dropped
        let active: Vec<WeightedBackend> = backends.iter().copied().filter(|b| b.weight > 0).collect();
        if active.is_empty() {
            return Err(DeployError::TrafficSwitchFailed(format!(
                "no upstream with positive weight for {}",
                domain
            )));
        }
        info!("Routing {} across {:?}", domain, active);
        self.executor
            .write_file(
                &self.site_path(domain),
                &render_weighted_site(domain, &active, health_path),
            )
            .await
            .map_err(|e| DeployError::TrafficSwitchFailed(e.to_string()))
    }

    async fn remove_route(&self, domain: &str) -> Result<(), DeployError> {
        validate_domain(domain)?;
        info!("Removing route for {}", domain);
        self.run(&format!("rm -f {}", shell_quote(&self.site_path(domain))))
            .await
    }

    async fn reload(&self) -> Result<(), DeployError> {
        self.run(&self.reload_command).await
    }
}

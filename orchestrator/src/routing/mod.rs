//! Reverse proxy configuration

pub mod caddy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// One upstream of a weighted route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedBackend {
    pub port: u16,
    pub weight: u32,
}

/// Points public domains at host ports
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Route all traffic of `domain` to one port
    async fn set_route(&self, domain: &str, port: u16, health_path: &str) -> Result<(), DeployError>;

    /// Split traffic of `domain` across several ports by weight
    async fn set_weighted_route(
        &self,
        domain: &str,
        backends: &[WeightedBackend],
        health_path: &str,
    ) -> Result<(), DeployError>;

    /// Remove the route of `domain`
    async fn remove_route(&self, domain: &str) -> Result<(), DeployError>;

    /// Apply pending configuration
    async fn reload(&self) -> Result<(), DeployError>;
}

//! Application configuration options

use std::time::Duration;

use crate::deploy::engine::EngineOptions;
use crate::exec::ssh::SshTarget;
use crate::ports::ranges::PortRanges;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ExecutorKind, RouterSettings, Settings};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Where remote commands run
    pub executor: ExecutorOptions,

    /// Timeout of a single remote command
    pub command_timeout: Duration,

    /// Timeout of an image pull
    pub pull_timeout: Duration,

    /// Port ledger options
    pub ledger: LedgerOptions,

    /// History entries kept per project environment
    pub history_retention: usize,

    /// Health gate options
    pub health: HealthOptions,

    /// Reverse proxy options
    pub router: RouterSettings,

    /// Webhook receiving notifications
    pub webhook_url: Option<String>,

    /// Engine options
    pub engine: EngineOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), &Settings::default())
    }
}

impl AppOptions {
    /// Derive options from a settings file
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        let executor = match settings.executor.kind {
            ExecutorKind::Local => ExecutorOptions::Local,
            ExecutorKind::Ssh => ExecutorOptions::Ssh(SshTarget {
                host: settings.executor.host.clone().unwrap_or_default(),
                user: settings.executor.user.clone(),
                port: settings.executor.ssh_port,
                identity_file: settings.executor.identity_file.clone(),
            }),
        };

        // Probes of a remote host go to that host unless configured otherwise
        let health_host = match &executor {
            ExecutorOptions::Ssh(target) if settings.health.host == "127.0.0.1" => target.host.clone(),
            _ => settings.health.host.clone(),
        };

        Self {
            layout,
            executor,
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
            pull_timeout: Duration::from_secs(settings.pull_timeout_secs),
            ledger: LedgerOptions {
                reservation_ttl: Duration::from_secs(settings.ledger.reservation_ttl_secs),
                ranges: settings.ledger.ranges.clone(),
            },
            history_retention: settings.history_retention,
            health: HealthOptions {
                host: health_host,
                probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
            },
            router: settings.router.clone(),
            webhook_url: settings.notifications.webhook_url.clone(),
            engine: EngineOptions {
                slot_offset: settings.blue_green_slot_offset,
                preview_ttl_hours: settings.preview.ttl_hours,
                preview_domain_suffix: settings.preview.domain_suffix.clone(),
                notify_channel: settings
                    .notifications
                    .channel
                    .clone()
                    .unwrap_or_else(|| EngineOptions::default().notify_channel),
            },
        }
    }
}

/// Remote executor selection
#[derive(Debug, Clone)]
pub enum ExecutorOptions {
    Local,
    Ssh(SshTarget),
}

/// Port ledger options
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Lifetime of an uncommitted reservation
    pub reservation_ttl: Duration,

    /// Port ranges per environment and service
    pub ranges: PortRanges,
}

/// Health gate options
#[derive(Debug, Clone)]
pub struct HealthOptions {
    /// Host probed over HTTP
    pub host: String,

    /// Timeout of one HTTP probe
    pub probe_timeout: Duration,
}

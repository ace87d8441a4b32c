//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::ports::ranges::PortRanges;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Remote executor configuration
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Timeout for a single remote command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for image pulls
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,

    /// Port ledger configuration
    #[serde(default)]
    pub ledger: LedgerSettings,

    /// Port offset of the green slot from the blue one
    #[serde(default = "default_slot_offset")]
    pub blue_green_slot_offset: u16,

    /// History entries kept per project environment
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,

    /// Health gate configuration
    #[serde(default)]
    pub health: HealthSettings,

    /// Reverse proxy configuration
    #[serde(default)]
    pub router: RouterSettings,

    /// Notification configuration
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Preview environment defaults
    #[serde(default)]
    pub preview: PreviewSettings,
}

fn default_command_timeout() -> u64 {
    120
}

fn default_pull_timeout() -> u64 {
    600
}

fn default_slot_offset() -> u16 {
    500
}

fn default_history_retention() -> usize {
    crate::models::history::DEFAULT_RETENTION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            executor: ExecutorSettings::default(),
            command_timeout_secs: default_command_timeout(),
            pull_timeout_secs: default_pull_timeout(),
            ledger: LedgerSettings::default(),
            blue_green_slot_offset: default_slot_offset(),
            history_retention: default_history_retention(),
            health: HealthSettings::default(),
            router: RouterSettings::default(),
            notifications: NotificationSettings::default(),
            preview: PreviewSettings::default(),
        }
    }
}

/// Kind of remote executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Local,
    Ssh,
}

/// Remote executor settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub kind: ExecutorKind,

    /// Target host for ssh
    #[serde(default)]
    pub host: Option<String>,

    /// Login user for ssh
    #[serde(default)]
    pub user: Option<String>,

    /// ssh port
    #[serde(default)]
    pub ssh_port: Option<u16>,

    /// Private key for ssh
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

/// Port ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Lifetime of an uncommitted reservation
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_secs: u64,

    /// Port ranges per environment and service
    #[serde(default)]
    pub ranges: PortRanges,
}

fn default_reservation_ttl() -> u64 {
    300
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: default_reservation_ttl(),
            ranges: PortRanges::default(),
        }
    }
}

/// Health gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Host used for direct HTTP probes
    #[serde(default = "default_health_host")]
    pub host: String,

    /// Timeout of a single HTTP probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_health_host() -> String {
    "127.0.0.1".to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            host: default_health_host(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Directory holding one site file per domain
    #[serde(default = "default_router_dir")]
    pub config_dir: String,

    /// Command reloading the proxy
    #[serde(default = "default_reload_command")]
    pub reload_command: String,
}

fn default_router_dir() -> String {
    "/etc/caddy/sites".to_string()
}

fn default_reload_command() -> String {
    "caddy reload --config /etc/caddy/Caddyfile".to_string()
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            config_dir: default_router_dir(),
            reload_command: default_reload_command(),
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Generic webhook receiving deployment events
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Channel label attached to notifications
    #[serde(default)]
    pub channel: Option<String>,
}

/// Preview environment defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSettings {
    /// Domain suffix used when a project does not declare one
    #[serde(default)]
    pub domain_suffix: Option<String>,

    /// Default preview lifetime
    #[serde(default = "default_preview_ttl")]
    pub ttl_hours: u64,
}

fn default_preview_ttl() -> u64 {
    72
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            domain_suffix: None,
            ttl_hours: default_preview_ttl(),
        }
    }
}

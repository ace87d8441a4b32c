//! Persisted per-strategy rollout state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blue-green slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    #[default]
    Blue,
    Green,
}

impl Slot {
    pub fn other(&self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    /// Port offset of the slot from the environment's base port
    pub fn port_offset(&self, green_offset: u16) -> u16 {
        match self {
            Slot::Blue => 0,
            Slot::Green => green_offset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current active blue-green slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMarker {
    pub active: Slot,
    pub version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A running canary alongside the stable instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryMetadata {
    pub version: String,
    pub image: String,
    pub weight: u32,
    pub port: u16,
    pub stable_port: u16,
    pub container: String,
    pub created_at: DateTime<Utc>,
}

/// A pull-request preview deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewMetadata {
    pub project: String,
    pub pr_number: String,
    pub version: String,
    pub port: u16,
    pub container: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PreviewMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

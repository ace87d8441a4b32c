//! Version history models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries kept per project environment
pub const DEFAULT_RETENTION: usize = 20;

/// Status of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Active,
    Previous,
    Archived,
}

/// A deployed version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: String,
    pub image: String,
    pub deployed_at: DateTime<Utc>,
    pub status: HistoryStatus,
}

impl HistoryEntry {
    pub fn new(version: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            image: image.into(),
            deployed_at: Utc::now(),
            status: HistoryStatus::Active,
        }
    }
}

/// Bounded history of one project environment, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLog {
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Record a successful deployment.
    ///
    /// The current active entry becomes `previous`, any older `previous`
    /// entry is archived, and the log is trimmed to `retention`.
    pub fn append(&mut self, mut entry: HistoryEntry, retention: usize) {
        for existing in self.entries.iter_mut() {
            existing.status = match existing.status {
                HistoryStatus::Active => HistoryStatus::Previous,
                HistoryStatus::Previous | HistoryStatus::Archived => HistoryStatus::Archived,
            };
        }

        entry.status = HistoryStatus::Active;
        self.entries.insert(0, entry);
        self.entries.truncate(retention.max(1));
    }

    /// The entry currently marked active
    pub fn active(&self) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .find(|e| e.status == HistoryStatus::Active)
    }

    /// The newest entry whose version differs from the running one
    pub fn rollback_candidate(&self) -> Option<&HistoryEntry> {
        let running = self.active().map(|e| e.version.as_str());
        self.entries
            .iter()
            .find(|e| e.status != HistoryStatus::Active && Some(e.version.as_str()) != running)
    }

    /// Newest entry for a version
    pub fn find(&self, version: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.version == version)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

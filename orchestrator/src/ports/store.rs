//! Ledger snapshots and their backing stores

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::errors::LedgerError;
use crate::filesys::file::File;
use crate::models::project::Environment;

/// Owner of a port: one service of one project environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortKey {
    pub project: String,
    pub environment: Environment,
    pub service: String,
}

impl PortKey {
    pub fn new(project: impl Into<String>, environment: Environment, service: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            environment,
            service: service.into(),
        }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.environment, self.service)
    }
}

/// Time-boxed, uncommitted claim on a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortReservation {
    pub token: String,
    #[serde(flatten)]
    pub key: PortKey,
    pub port: u16,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PortReservation {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Durable claim on a port tied to a running deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCommitment {
    #[serde(flatten)]
    pub key: PortKey,
    pub port: u16,
    pub committed_at: DateTime<Utc>,
}

/// Versioned ledger contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub reservations: Vec<PortReservation>,
    #[serde(default)]
    pub commitments: Vec<PortCommitment>,
}

impl LedgerSnapshot {
    /// Drop reservations past their expiry
    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.reservations.retain(|r| r.is_live(now));
    }

    /// Key holding `port` through a live reservation or a commitment
    pub fn holder(&self, port: u16, now: DateTime<Utc>) -> Option<&PortKey> {
        self.commitments
            .iter()
            .find(|c| c.port == port)
            .map(|c| &c.key)
            .or_else(|| {
                self.reservations
                    .iter()
                    .find(|r| r.port == port && r.is_live(now))
                    .map(|r| &r.key)
            })
    }
}

/// Backing store with atomic check-and-set on the snapshot revision
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the current snapshot
    async fn load(&self) -> Result<LedgerSnapshot, LedgerError>;

    /// Replace the snapshot if its revision is still `expected`.
    ///
    /// Returns false when another writer got there first.
    async fn compare_and_swap(
        &self,
        expected: u64,
        next: LedgerSnapshot,
    ) -> Result<bool, LedgerError>;
}

/// In-process ledger store
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    snapshot: RwLock<LedgerSnapshot>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn compare_and_swap(
        &self,
        expected: u64,
        mut next: LedgerSnapshot,
    ) -> Result<bool, LedgerError> {
        let mut current = self.snapshot.write().await;
        if current.revision != expected {
            return Ok(false);
        }
        next.revision = expected + 1;
        *current = next;
        Ok(true)
    }
}

/// File-backed ledger store shared by every process on the host.
///
/// Writers serialise through an exclusive lock file; readers rely on
/// atomic renames and never see a partial snapshot.
pub struct FileLedgerStore {
    file: File,
    lock_file: File,
    local: Mutex<()>,
    lock_wait: Duration,
    stale_lock_after: Duration,
}

impl FileLedgerStore {
    pub fn new(file: File, lock_file: File) -> Self {
        Self {
            file,
            lock_file,
            local: Mutex::new(()),
            lock_wait: Duration::from_secs(5),
            stale_lock_after: Duration::from_secs(30),
        }
    }

    async fn acquire_lock(&self) -> Result<(), LedgerError> {
        let deadline = tokio::time::Instant::now() + self.lock_wait;
        loop {
            if self.lock_file.create_exclusive().await.map_err(unavailable)? {
                return Ok(());
            }

            if let Some(age) = self.lock_file.age().await {
                if age > self.stale_lock_after {
                    warn!(
                        "Removing stale ledger lock {} ({:?} old)",
                        self.lock_file.path().display(),
                        age
                    );
                    self.lock_file.delete().await.map_err(unavailable)?;
                    continue;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(LedgerError::Unavailable(format!(
                    "timed out waiting for {}",
                    self.lock_file.path().display()
                )));
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn swap_locked(
        &self,
        expected: u64,
        mut next: LedgerSnapshot,
    ) -> Result<bool, LedgerError> {
        let current: LedgerSnapshot = self
            .file
            .read_json_opt()
            .await
            .map_err(unavailable)?
            .unwrap_or_default();
        if current.revision != expected {
            debug!(
                "Ledger revision moved from {} to {}",
                expected, current.revision
            );
            return Ok(false);
        }
        next.revision = expected + 1;
        self.file.write_json(&next).await.map_err(unavailable)?;
        Ok(true)
    }
}

fn unavailable(err: impl fmt::Display) -> LedgerError {
    LedgerError::Unavailable(err.to_string())
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self
            .file
            .read_json_opt()
            .await
            .map_err(unavailable)?
            .unwrap_or_default())
    }

    async fn compare_and_swap(
        &self,
        expected: u64,
        next: LedgerSnapshot,
    ) -> Result<bool, LedgerError> {
        let _local = self.local.lock().await;
        self.acquire_lock().await?;

        let result = self.swap_locked(expected, next).await;

        if let Err(e) = self.lock_file.delete().await {
            warn!("Failed to release ledger lock: {}", e);
        }
        result
    }
}

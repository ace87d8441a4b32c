//! Version history store

use std::sync::Arc;

use tracing::debug;

use crate::errors::DeployError;
use crate::models::history::{HistoryEntry, HistoryLog};
use crate::models::project::Environment;
use crate::storage::state::{keys, load, save, StateStore};

/// Bounded history logs kept in the state store
#[derive(Clone)]
pub struct HistoryStore {
    state: Arc<dyn StateStore>,
    retention: usize,
}

impl HistoryStore {
    pub fn new(state: Arc<dyn StateStore>, retention: usize) -> Self {
        Self { state, retention }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// History of a project environment, newest first
    pub async fn load(&self, project: &str, environment: Environment) -> Result<HistoryLog, DeployError> {
        self.load_key(&keys::history(project, environment)).await
    }

    /// History stored under an explicit key
    pub async fn load_key(&self, key: &str) -> Result<HistoryLog, DeployError> {
        Ok(load::<HistoryLog>(self.state.as_ref(), key)
            .await?
            .unwrap_or_default())
    }

    /// Record a successful deployment of a project environment
    pub async fn append(
        &self,
        project: &str,
        environment: Environment,
        entry: HistoryEntry,
    ) -> Result<HistoryLog, DeployError> {
        self.append_key(&keys::history(project, environment), entry)
            .await
    }

    /// Record a successful deployment under an explicit key
    pub async fn append_key(&self, key: &str, entry: HistoryEntry) -> Result<HistoryLog, DeployError> {
        let mut log = self.load_key(key).await?;
        debug!("Appending {} to {}", entry.version, key);
        log.append(entry, self.retention);
        save(self.state.as_ref(), key, &log).await?;
        Ok(log)
    }

    /// Drop a history log
    pub async fn remove_key(&self, key: &str) -> Result<(), DeployError> {
        self.state.delete(key).await
    }
}

//! Key/value persistence for project configs, history and rollout markers

use std::collections::BTreeMap;
use std::path::Component;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Persisted JSON documents addressed by `/`-separated keys
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a document
    async fn get(&self, key: &str) -> Result<Option<Value>, DeployError>;

    /// Create or replace a document
    async fn put(&self, key: &str, value: Value) -> Result<(), DeployError>;

    /// Remove a document; missing keys are not an error
    async fn delete(&self, key: &str) -> Result<(), DeployError>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, DeployError>;
}

/// Read and decode a document
pub async fn load<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>, DeployError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and write a document
pub async fn save<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<(), DeployError> {
    store.put(key, serde_json::to_value(value)?).await
}

/// State keys
pub mod keys {
    use crate::models::project::Environment;

    pub fn project(project: &str) -> String {
        format!("projects/{}", project)
    }

    pub fn history(project: &str, environment: Environment) -> String {
        format!("history/{}/{}", project, environment)
    }

    pub fn slot(project: &str, environment: Environment) -> String {
        format!("slots/{}/{}", project, environment)
    }

    pub fn canary(project: &str, environment: Environment) -> String {
        format!("canary/{}/{}", project, environment)
    }

    pub fn preview(project: &str, pr_number: &str) -> String {
        format!("previews/{}/pr-{}", project, pr_number)
    }

    pub fn preview_history(project: &str, pr_number: &str) -> String {
        format!("history/{}/preview/pr-{}", project, pr_number)
    }

    pub const PREVIEWS_PREFIX: &str = "previews/";
}

fn validate_key(key: &str) -> Result<(), DeployError> {
    let valid = !key.is_empty()
        && std::path::Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(DeployError::Storage(format!("invalid state key `{}`", key)))
    }
}

/// One JSON file per key below a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: Dir,
}

impl FileStateStore {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }

    fn file(&self, key: &str) -> Result<File, DeployError> {
        validate_key(key)?;
        Ok(File::new(self.root.path().join(format!("{}.json", key))))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, DeployError> {
        self.file(key)?.read_json_opt().await
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), DeployError> {
        self.file(key)?.write_json(&value).await
    }

    async fn delete(&self, key: &str) -> Result<(), DeployError> {
        self.file(key)?.delete().await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DeployError> {
        let keys = self
            .root
            .list_files_recursive()
            .await?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let key = path.with_extension("");
                let parts: Vec<_> = key
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect();
                Some(parts.join("/")).filter(|k| k.starts_with(prefix))
            })
            .collect();
        Ok(keys)
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    documents: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, DeployError> {
        validate_key(key)?;
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), DeployError> {
        validate_key(key)?;
        self.documents.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DeployError> {
        self.documents.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DeployError> {
        Ok(self
            .documents
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

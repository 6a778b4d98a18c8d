use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::Database;

/// Key/value persistence for the engine's long-lived state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static;

    async fn save<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync;
}

/// JSON payloads in a single SQLite table.
#[derive(Clone)]
pub struct SqliteStateStore {
    db: Database,
}

impl SqliteStateStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            db: Database::new(path)?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let Some(payload) = self.db.read_blob(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&payload)
            .with_context(|| format!("failed to decode state blob '{key}'"))?;
        Ok(Some(value))
    }

    async fn save<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let payload = serde_json::to_string(value)
            .with_context(|| format!("failed to encode state blob '{key}'"))?;
        self.db.write_blob(key, payload).await
    }
}

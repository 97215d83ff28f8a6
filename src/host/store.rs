use std::{collections::BTreeMap, io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::{drivers::NonVolatileStore, error::Fault};

/// Non-volatile store kept as a JSON object in one file.
///
/// Every write replaces the file through a rename so a power cut leaves
/// either the old or the new contents.
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, i64>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, Fault> {
        let path = path.into();
        let values = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Discarding unreadable state file {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(JsonFileStore { path, values })
    }

    /// Write `values` to disk. Callers commit them in memory only afterwards.
    async fn persist(&self, values: &BTreeMap<String, i64>) -> Result<(), Fault> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes =
            serde_json::to_vec_pretty(values).map_err(|e| Fault::Store(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl NonVolatileStore for JsonFileStore {
    async fn get(&mut self, key: &str) -> Result<Option<i64>, Fault> {
        Ok(self.values.get(key).copied())
    }

    async fn set(&mut self, key: &str, value: i64) -> Result<(), Fault> {
        let mut values = self.values.clone();
        values.insert(key.to_string(), value);
        self.persist(&values).await?;
        self.values = values;
        Ok(())
    }

    async fn erase(&mut self, key: &str) -> Result<(), Fault> {
        if !self.values.contains_key(key) {
            return Ok(());
        }
        let mut values = self.values.clone();
        values.remove(key);
        self.persist(&values).await?;
        self.values = values;
        Ok(())
    }
}

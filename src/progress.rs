use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub current_time: f64,
    #[serde(default)]
    pub duration: f64,
    /// Opaque client timestamp, echoed back unchanged.
    #[serde(default)]
    pub timestamp: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_type: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn resume_position(&self) -> Option<f64> {
        let within = self.duration <= 0.0 || self.current_time < self.duration;
        (self.current_time > 0.0 && within).then_some(self.current_time)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressUpdate {
    pub current_time: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub timestamp: serde_json::Value,
    #[serde(default)]
    pub player_type: Option<String>,
}

pub struct ProgressStore {
    path: PathBuf,
    records: Mutex<HashMap<String, ProgressRecord>>,
    writer: tokio::sync::Mutex<()>,
}

impl ProgressStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, ProgressRecord>>(&bytes) {
                Ok(records) => records,
                Err(err) => {
                    warn!("Ignoring unreadable progress file {}: {err}", path.display());
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read progress file {}", path.display()));
            }
        };

        info!("Progress file {} ({} entries)", path.display(), records.len());
        Ok(ProgressStore {
            path,
            records: Mutex::new(records),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub async fn save(&self, key: &str, update: ProgressUpdate) -> crate::error::Result<ProgressRecord> {
        let record = ProgressRecord {
            current_time: update.current_time.max(0.0),
            duration: update.duration.max(0.0),
            timestamp: update.timestamp,
            player_type: update.player_type,
            updated_at: Utc::now(),
        };

        let _writer = self.writer.lock().await;
        let mut next = self.records.lock().clone();
        next.insert(key.to_string(), record.clone());
        self.commit(next).await?;
        info!("Saved progress {key} @ {:.1}s", record.current_time);
        Ok(record)
    }

    pub fn load(&self, key: &str) -> Option<ProgressRecord> {
        self.records.lock().get(key).cloned()
    }

    pub async fn clear(&self, key: &str) -> crate::error::Result<bool> {
        let _writer = self.writer.lock().await;
        let mut next = self.records.lock().clone();
        if next.remove(key).is_none() {
            return Ok(false);
        }
        self.commit(next).await?;
        info!("Cleared progress {key}");
        Ok(true)
    }

    async fn commit(&self, next: HashMap<String, ProgressRecord>) -> crate::error::Result<()> {
        persist(&self.path, &next)
            .await
            .map_err(|err| Error::Storage(format!("{err:#}")))?;
        *self.records.lock() = next;
        Ok(())
    }
}

async fn persist(path: &Path, records: &HashMap<String, ProgressRecord>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(records)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(tmp, path).await?;
    Ok(())
}

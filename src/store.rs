//! Persisted per-channel state: the last known-good URL and how many checks
//! in a row failed to confirm it.
//!
//! Both records are plain JSON files. Loading never fails: a missing,
//! unreadable or malformed file reads as the zero value (empty URL, count 0).

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Empty when history was evicted
    pub url: String,
    /// Unix epoch seconds
    #[serde(default)]
    pub time: i64,
    /// Local time, `YYYY-MM-DD HH:MM:SS`
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounterRecord {
    pub err_count: u32,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Last known-good URL, or `""` when there is none
    pub async fn load(&self) -> String {
        read_record::<HistoryRecord>(&self.path)
            .await
            .map(|r| r.url)
            .unwrap_or_default()
    }

    /// Overwrites the record. Saving `""` evicts the history.
    ///
    /// # Errors
    /// Errors when the file or its directory cannot be written
    pub async fn save(&self, url: &str) -> Result<()> {
        let now = Local::now();
        let record = HistoryRecord {
            url: url.to_string(),
            time: now.timestamp(),
            date: now.format(DATE_FORMAT).to_string(),
        };

        write_record(&self.path, &record).await
    }
}

#[derive(Debug, Clone)]
pub struct ErrorCounterStore {
    path: PathBuf,
}

impl ErrorCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> u32 {
        read_record::<ErrorCounterRecord>(&self.path)
            .await
            .map(|r| r.err_count)
            .unwrap_or_default()
    }

    /// # Errors
    /// Errors when the file or its directory cannot be written
    pub async fn save(&self, count: u32) -> Result<()> {
        let record = ErrorCounterRecord {
            err_count: count,
            time: Local::now().timestamp(),
        };

        write_record(&self.path, &record).await
    }
}

async fn read_record<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist yet", path.display());
            return None;
        }
        Err(e) => {
            warn!("Unable to read {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Ignoring malformed {}: {e}", path.display());
            None
        }
    }
}

async fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Creating state directory {}", parent.display()))?;
    }

    // serde_json keeps non-ASCII as-is, so channel URLs stay readable
    let content = serde_json::to_string_pretty(record).context("Serializing state record")?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Writing {}", path.display()))
}

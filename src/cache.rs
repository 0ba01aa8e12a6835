/// Flat key-value file cache
///
/// Each entry is one JSON file `<cache_dir>/<key>.json` holding the value
/// together with its creation time and the parameters it was built from.
/// Keys combine a dataset kind with the year range it covers, e.g.
/// `disasters_combined_1979_2000`.

use crate::logging::{self, DataSource};
use crate::model::{Period, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Key of the combined export cache (all periods in one entry).
pub const EXPORTS_KEY: &str = "exports_combined";
pub const DISASTERS_KIND: &str = "disasters_combined";

pub fn key_for(kind: &str, period: Period) -> String {
    format!("{}_{}", kind, period.label())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub parameters: serde_json::Value,
    pub value: T,
}

/// Metadata of a stored entry, as shown by `cache list`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheInfo {
    pub key: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

#[derive(Deserialize)]
struct EntryHeader {
    created_at: DateTime<Utc>,
}

pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path(key).exists()
    }

    /// Returns the entry for `key`, or `None` when absent or unreadable.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let path = self.path(key);
        if !path.exists() {
            logging::debug(DataSource::Cache, Some(key), "miss");
            return None;
        }
        let parsed = fs::read_to_string(&path)
            .map_err(crate::model::PipelineError::from)
            .and_then(|text| Ok(serde_json::from_str::<CacheEntry<T>>(&text)?));
        match parsed {
            Ok(entry) => {
                logging::info(
                    DataSource::Cache,
                    Some(key),
                    &format!("loaded (created {})", entry.created_at.format("%Y-%m-%d %H:%M")),
                );
                Some(entry)
            }
            Err(err) => {
                logging::warn(
                    DataSource::Cache,
                    Some(key),
                    &format!("unreadable entry ignored: {}", err),
                );
                None
            }
        }
    }

    pub fn store<T: Serialize>(&self, key: &str, parameters: serde_json::Value, value: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            key: key.to_string(),
            created_at: Utc::now(),
            parameters,
            value,
        };
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        fs::rename(&tmp, &path)?;
        logging::info(DataSource::Cache, Some(key), &format!("saved to {}", path.display()));
        Ok(path)
    }

    /// Deletes one entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        logging::info(DataSource::Cache, Some(key), "deleted");
        Ok(true)
    }

    pub fn list(&self) -> Result<Vec<CacheInfo>> {
        let mut entries = Vec::new();
        if !self.dir.exists() {
            return Ok(entries);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let size_bytes = fs::metadata(&path)?.len();
            let created_at = fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<EntryHeader>(&text).ok())
                .map(|header| header.created_at);
            entries.push(CacheInfo {
                key: key.to_string(),
                created_at,
                size_bytes,
            });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Deletes every entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = self.list()?;
        for info in &entries {
            fs::remove_file(self.path(&info.key))?;
        }
        logging::info(
            DataSource::Cache,
            None,
            &format!("{} entries deleted from {}", entries.len(), self.dir.display()),
        );
        Ok(entries.len())
    }
}

//! File-backed catalog snapshot storage
//!
//! The snapshot is a single JSON document. Saves go through a sibling temp file
//! and a rename so a crash mid-write leaves the previous snapshot intact.

use crate::error::{HarvestError, Result};
use crate::proxy::models::Catalog;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default snapshot file name
pub const DEFAULT_SNAPSHOT: &str = "list.json";

/// Reads, writes and rotates the catalog snapshot
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the snapshot. Fails with `NotFound` if none has been written yet.
    pub fn load(&self) -> Result<Catalog> {
        let content = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                HarvestError::NotFound(self.path.clone())
            } else {
                HarvestError::StorageRead {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        serde_json::from_str(&content).map_err(|source| HarvestError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the snapshot wholesale
    pub fn save(&self, catalog: &Catalog) -> Result<()> {
        let write_err = |source| HarvestError::StorageWrite {
            path: self.path.clone(),
            source,
        };

        let content = serde_json::to_string_pretty(catalog)
            .map_err(|e| write_err(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, content).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        debug!(
            path = %self.path.display(),
            countries = catalog.proxies.len(),
            records = catalog.total_records(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Move the current snapshot aside to `<stem>-YYYY-MM-DD.json`, dated by its harvest time.
    ///
    /// Two backups of snapshots harvested on the same calendar day share a name; the later
    /// one replaces the earlier. A snapshot without a timestamp is dated today.
    pub fn backup(&self, timestamp: Option<i64>) -> Result<PathBuf> {
        if !self.exists() {
            return Err(HarvestError::NoExistingSnapshot(self.path.clone()));
        }

        let harvested = timestamp
            .and_then(|ts| Local.timestamp_millis_opt(ts).single())
            .unwrap_or_else(Local::now);
        let target = self.backup_path(harvested);

        fs::rename(&self.path, &target).map_err(|source| HarvestError::StorageWrite {
            path: target.clone(),
            source,
        })?;

        info!(backup = %target.display(), "Backed up old data");
        Ok(target)
    }

    /// Whether the catalog has to be harvested again
    pub fn is_stale(&self, catalog: &Catalog) -> bool {
        catalog.is_stale(Utc::now())
    }

    /// Backup file name for a snapshot harvested at the given time
    pub fn backup_path<Tz: TimeZone>(&self, harvested: DateTime<Tz>) -> PathBuf
    where
        Tz::Offset: std::fmt::Display,
    {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("list");
        let name = format!("{}-{}.json", stem, harvested.format("%Y-%m-%d"));
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_SNAPSHOT.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT)
    }
}

//! Keyed persistence of iteration attributes and statistics.
//!
//! The pipeline only requires "save under iteration + key" / "load by
//! iteration + key" semantics; `FileStore` implements them as one JSON
//! file per key inside one directory per iteration, written atomically
//! (temp file + rename) with a backup of the previous version.

use crate::models::{EikasiaError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single named statistic with its formatted value and unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatEntry {
    /// Statistic name, e.g. `tot_analyze_time`.
    pub name: String,
    /// Formatted value.
    pub value: String,
    /// Unit, possibly empty.
    pub unit: String,
}

impl StatEntry {
    /// Convenience constructor.
    pub fn new(name: &str, value: impl Into<String>, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            unit: unit.to_string(),
        }
    }
}

/// Keyed save/load of per-iteration data.
pub trait PersistentStore {
    /// Save a value under `iteration` + `key`, replacing any previous
    /// value.
    fn save<T: Serialize>(&self, iteration: u32, key: &str, value: &T) -> Result<()>;

    /// Load the value stored under `iteration` + `key`, if any.
    fn load<T: DeserializeOwned>(&self, iteration: u32, key: &str) -> Result<Option<T>>;

    /// Merge statistics into the iteration's statistics record.
    fn save_statistics(&self, iteration: u32, entries: &[StatEntry]) -> Result<()>;
}

/// JSON file store: `<dir>/iteration_NNN/<key>.json`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| EikasiaError::io("creating store dir", e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Iteration indices present in the store, ascending.
    pub fn iterations(&self) -> Result<Vec<u32>> {
        let pattern = self.dir.join("iteration_*");
        let mut found = Vec::new();
        let matches = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| EikasiaError::Internal(format!("invalid glob pattern: {}", e)))?;
        for entry in matches.filter_map(|r| r.ok()) {
            if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
                if let Ok(i) = name.trim_start_matches("iteration_").parse::<u32>() {
                    found.push(i);
                }
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.dir.join(format!("iteration_{:03}", iteration))
    }

    fn key_path(&self, iteration: u32, key: &str) -> PathBuf {
        self.iteration_dir(iteration).join(format!("{}.json", key))
    }
}

impl PersistentStore for FileStore {
    fn save<T: Serialize>(&self, iteration: u32, key: &str, value: &T) -> Result<()> {
        let dir = self.iteration_dir(iteration);
        fs::create_dir_all(&dir).map_err(|e| EikasiaError::io("creating iteration dir", e))?;

        let path = self.key_path(iteration, key);

        // Back up the previous version
        if path.exists() {
            let backup = path.with_extension("backup.json");
            fs::copy(&path, &backup).map_err(|e| EikasiaError::io("backing up record", e))?;
        }

        // Write to temp file, then rename atomically
        let temp = dir.join(format!("{}.tmp.json", key));
        let file = File::create(&temp).map_err(|e| EikasiaError::io("creating temp record", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, value)
            .map_err(|e| EikasiaError::Internal(format!("serializing record: {}", e)))?;
        fs::rename(&temp, &path).map_err(|e| EikasiaError::io("renaming record", e))?;

        debug!(iteration, key, "record saved");
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, iteration: u32, key: &str) -> Result<Option<T>> {
        let path = self.key_path(iteration, key);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(|e| EikasiaError::io("opening record", e))?;
        let reader = BufReader::new(file);
        let value = serde_json::from_reader(reader)
            .map_err(|e| EikasiaError::Parse(format!("invalid record {}: {}", key, e)))?;
        Ok(Some(value))
    }

    fn save_statistics(&self, iteration: u32, entries: &[StatEntry]) -> Result<()> {
        let mut stats: BTreeMap<String, (String, String)> = self
            .load(iteration, "statistics")?
            .unwrap_or_default();
        for entry in entries {
            stats.insert(
                entry.name.clone(),
                (entry.value.clone(), entry.unit.clone()),
            );
        }
        self.save(iteration, "statistics", &stats)
    }
}

//! Calculation record persistence
//!
//! The resolver loads and saves its records through the [`CalculationStore`] trait. The
//! file-backed store writes `{"calculations": [...]}` and rewrites the whole file on every
//! save.
//!
//! There is no locking: two runs sharing one store file can interleave their
//! read-modify-write cycles and the later save silently wins.

use crate::models::CalculationRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// On-disk document shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalculationDocument {
    #[serde(default)]
    pub calculations: Vec<CalculationRecord>,
}

/// Persistence boundary for calculation records
pub trait CalculationStore {
    /// All persisted records; an absent store yields an empty list
    fn load(&self) -> Result<Vec<CalculationRecord>, StoreError>;

    /// Replace the persisted records
    fn save(&self, records: &[CalculationRecord]) -> Result<(), StoreError>;
}

/// JSON file store
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalculationStore for JsonFileStore {
    fn load(&self) -> Result<Vec<CalculationRecord>, StoreError> {
        if !self.path.exists() {
            debug!("No calculation store at {}", self.path.display());
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            StoreError::IoError(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let document: CalculationDocument = serde_json::from_str(&content).map_err(|e| {
            StoreError::SerializationError(format!(
                "Failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(document.calculations)
    }

    fn save(&self, records: &[CalculationRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::IoError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let document = CalculationDocument {
            calculations: records.to_vec(),
        };
        let content = serde_json::to_string_pretty(&document).map_err(|e| {
            StoreError::SerializationError(format!("Failed to serialize calculations: {}", e))
        })?;
        std::fs::write(&self.path, content).map_err(|e| {
            StoreError::IoError(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        info!(
            "Saved {} calculation record(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CalculationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<CalculationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl CalculationStore for MemoryStore {
    fn load(&self) -> Result<Vec<CalculationRecord>, StoreError> {
        self.records
            .lock()
            .map(|r| r.clone())
            .map_err(|e| StoreError::IoError(format!("Store lock poisoned: {}", e)))
    }

    fn save(&self, records: &[CalculationRecord]) -> Result<(), StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StoreError::IoError(format!("Store lock poisoned: {}", e)))?;
        *guard = records.to_vec();
        Ok(())
    }
}

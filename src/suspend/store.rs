//! Suspension storage: persist paused executions, list them, load them
//! back after a restart.
//!
//! Two implementations of the store contract ship with the engine: an
//! in-memory map for tests and embedded hosts, and a one-file-per-entry
//! JSON store for durable persistence. File writes go to a temp file first
//! and rename into place, so a crash never leaves a half-written entry.
//!
//! Either store can be initialized with codec validation: every save then
//! runs the snapshot through encode + decode and rejects it before commit
//! if the two disagree. This catches serialization drift at write time
//! instead of at some later resume.

use super::codec::{round_trip_check, suspension_from_str, suspension_to_string};
use super::SuspendedExecution;
use crate::value::{CType, CodecError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Save rejected by codec round-trip validation
    #[error("codec validation failed on save: {0}")]
    CodecValidation(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Stable reference to a persisted suspension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuspensionHandle(pub Uuid);

impl SuspensionHandle {
    fn fresh() -> Self {
        SuspensionHandle(Uuid::new_v4())
    }
}

impl fmt::Display for SuspensionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Listing filter; every bound is optional and inclusive
#[derive(Debug, Clone, Default)]
pub struct SuspensionFilter {
    pub structural_hash: Option<String>,
    pub execution_id: Option<Uuid>,
    pub min_resumption_count: Option<u32>,
    pub max_resumption_count: Option<u32>,
}

impl SuspensionFilter {
    fn matches(&self, suspension: &SuspendedExecution) -> bool {
        if let Some(hash) = &self.structural_hash {
            if suspension.structural_hash != *hash {
                return false;
            }
        }
        if let Some(id) = self.execution_id {
            if suspension.execution_id != id {
                return false;
            }
        }
        if let Some(min) = self.min_resumption_count {
            if suspension.resumption_count < min {
                return false;
            }
        }
        if let Some(max) = self.max_resumption_count {
            if suspension.resumption_count > max {
                return false;
            }
        }
        true
    }
}

/// Listing entry with the inputs still needed to resume
#[derive(Debug, Clone)]
pub struct SuspensionSummary {
    pub handle: SuspensionHandle,
    pub execution_id: Uuid,
    pub structural_hash: String,
    pub resumption_count: u32,
    /// Missing user inputs by name, with their declared types
    pub missing_inputs: BTreeMap<String, CType>,
}

fn summarize(handle: SuspensionHandle, suspension: &SuspendedExecution) -> SuspensionSummary {
    SuspensionSummary {
        handle,
        execution_id: suspension.execution_id,
        structural_hash: suspension.structural_hash.clone(),
        resumption_count: suspension.resumption_count,
        missing_inputs: suspension.missing_inputs(),
    }
}

/// Persistence contract for suspended executions.
#[async_trait]
pub trait SuspensionStore: Send + Sync {
    /// Persist a suspension; the handle stays valid across restarts
    async fn save(&self, suspension: &SuspendedExecution) -> StoreResult<SuspensionHandle>;

    /// Load by handle; `None` for unknown handles
    async fn load(&self, handle: &SuspensionHandle) -> StoreResult<Option<SuspendedExecution>>;

    /// Delete by handle; true iff an entry was removed
    async fn delete(&self, handle: &SuspensionHandle) -> StoreResult<bool>;

    /// List entries matching `filter`
    async fn list(&self, filter: &SuspensionFilter) -> StoreResult<Vec<SuspensionSummary>>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Map-backed store. Inserts are atomic; concurrent saves never lose data.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<SuspensionHandle, SuspendedExecution>,
    validate_codec: bool,
}

impl MemoryStore {
    /// Store without save-time codec validation
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Store that round-trips every snapshot through the codec before
    /// committing it
    pub fn with_codec_validation() -> Self {
        MemoryStore {
            entries: DashMap::new(),
            validate_codec: true,
        }
    }
}

#[async_trait]
impl SuspensionStore for MemoryStore {
    async fn save(&self, suspension: &SuspendedExecution) -> StoreResult<SuspensionHandle> {
        if self.validate_codec {
            round_trip_check(suspension)
                .map_err(|error| StoreError::CodecValidation(error.to_string()))?;
        }
        let handle = SuspensionHandle::fresh();
        self.entries.insert(handle, suspension.clone());
        debug!(handle = %handle, execution_id = %suspension.execution_id, "suspension_saved");
        Ok(handle)
    }

    async fn load(&self, handle: &SuspensionHandle) -> StoreResult<Option<SuspendedExecution>> {
        Ok(self.entries.get(handle).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, handle: &SuspensionHandle) -> StoreResult<bool> {
        Ok(self.entries.remove(handle).is_some())
    }

    async fn list(&self, filter: &SuspensionFilter) -> StoreResult<Vec<SuspensionSummary>> {
        let mut summaries: Vec<SuspensionSummary> = self
            .entries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| summarize(*entry.key(), entry.value()))
            .collect();
        summaries.sort_by_key(|summary| summary.handle);
        Ok(summaries)
    }
}

// ============================================================================
// File store
// ============================================================================

/// One-JSON-file-per-suspension store under a data directory.
pub struct FileStore {
    dir: PathBuf,
    validate_codec: bool,
}

impl FileStore {
    /// Store rooted at `dir`, created if absent
    pub async fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(FileStore {
            dir,
            validate_codec: false,
        })
    }

    /// Store with save-time codec validation
    pub async fn with_codec_validation(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let mut store = FileStore::new(dir).await?;
        store.validate_codec = true;
        Ok(store)
    }

    fn path_for(&self, handle: &SuspensionHandle) -> PathBuf {
        self.dir.join(format!("{handle}.json"))
    }

    async fn read_entry(&self, path: &Path) -> StoreResult<SuspendedExecution> {
        let payload = tokio::fs::read_to_string(path).await?;
        Ok(suspension_from_str(&payload)?)
    }
}

#[async_trait]
impl SuspensionStore for FileStore {
    async fn save(&self, suspension: &SuspendedExecution) -> StoreResult<SuspensionHandle> {
        if self.validate_codec {
            round_trip_check(suspension)
                .map_err(|error| StoreError::CodecValidation(error.to_string()))?;
        }
        let handle = SuspensionHandle::fresh();
        let payload = suspension_to_string(suspension);

        // Write-then-rename keeps the entry atomic on crash
        let tmp = self.dir.join(format!(".tmp-{handle}"));
        tokio::fs::write(&tmp, payload.as_bytes()).await?;
        tokio::fs::rename(&tmp, self.path_for(&handle)).await?;
        debug!(handle = %handle, execution_id = %suspension.execution_id, "suspension_saved");
        Ok(handle)
    }

    async fn load(&self, handle: &SuspensionHandle) -> StoreResult<Option<SuspendedExecution>> {
        let path = self.path_for(handle);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(Some(self.read_entry(&path).await?)),
            Ok(false) => Ok(None),
            Err(error) => Err(StoreError::Io(error)),
        }
    }

    async fn delete(&self, handle: &SuspensionHandle) -> StoreResult<bool> {
        match tokio::fs::remove_file(self.path_for(handle)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(StoreError::Io(error)),
        }
    }

    async fn list(&self, filter: &SuspensionFilter) -> StoreResult<Vec<SuspensionSummary>> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(id) = Uuid::parse_str(stem) else {
                continue;
            };
            match self.read_entry(&path).await {
                Ok(suspension) => {
                    if filter.matches(&suspension) {
                        summaries.push(summarize(SuspensionHandle(id), &suspension));
                    }
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "suspension_entry_unreadable");
                }
            }
        }
        summaries.sort_by_key(|summary| summary.handle);
        Ok(summaries)
    }
}

//! File-backed persistence for the shared state.
//!
//! The entire state lives in one pretty-printed JSON document so an admin
//! can inspect or hand-edit it between sale days:
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  data.json                                 │
//! │                                            │
//! │  load:  absent / empty / corrupt           │
//! │         → default state, written back      │
//! │  save:  write a private temp file, rename  │
//! │         (readers never see half a file)    │
//! └────────────────────────────────────────────┘
//! ```
//!
//! The API is synchronous; async callers wrap it in `spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info, warn};

use lunchline_core::SharedState;

// Every save gets its own temp file name. Two writers sharing one temp
// path can rename each other's half-written file into place.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Store errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    ReadFailed(String),
    WriteFailed(String),
    SerializationError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(e) => write!(f, "Store read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "Store write failed: {e}"),
            Self::SerializationError(e) => write!(f, "Store serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Reads and writes the state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state file, healing it when it cannot be read.
    ///
    /// A missing, empty, or unparseable file yields the default state, and
    /// the default is written back so the next load succeeds cleanly. This
    /// method never fails; an unwritable disk is logged and the in-memory
    /// default is used regardless.
    pub fn load(&self) -> SharedState {
        match self.try_load() {
            Ok(state) => {
                info!(
                    "Loaded state from {}: {} orders, {} menu items, {} students",
                    self.path.display(),
                    state.orders.len(),
                    state.menu_items.len(),
                    state.students.len()
                );
                state
            }
            Err(e) => {
                warn!(
                    "Could not load {}: {e}; starting from defaults",
                    self.path.display()
                );
                let state = SharedState::default();
                if let Err(e) = self.save(&state) {
                    error!("Could not write default state back: {e}");
                }
                state
            }
        }
    }

    /// Strict load: any problem is an error, nothing is healed.
    pub fn try_load(&self) -> Result<SharedState, StoreError> {
        let text =
            fs::read_to_string(&self.path).map_err(|e| StoreError::ReadFailed(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(StoreError::ReadFailed("file is empty".to_string()));
        }
        serde_json::from_str(&text).map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    /// Persist the whole state atomically.
    ///
    /// Serializes to a uniquely named sibling temp file and renames it over
    /// the target, so a crash mid-write leaves the previous file intact and
    /// concurrent saves cannot clobber each other's temp file. The last
    /// rename wins whole; the file never holds a mix of two snapshots.
    pub fn save(&self, state: &SharedState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            }
        }

        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self.path.with_extension(format!("json.tmp{seq}"));
        fs::write(&tmp, json).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::WriteFailed(e.to_string())
        })?;
        Ok(())
    }
}

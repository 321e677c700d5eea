//! Process-wide registry of currently-executing runs.

use crate::errors::StoreError;
use crate::store::write_atomic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Filename of the registry snapshot at the storage root.
pub const REGISTRY_FILE: &str = "in-flight.json";

/// The serialized registry snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    entries: BTreeMap<Uuid, String>,
}

/// Process-wide set of currently-executing runs.
///
/// Holds only identifiers and lookup keys, never run state: the source of
/// truth for liveness is always the pair `(ExecutionGraph, completed flag)`
/// owned by the run record. The registry's persisted snapshot is what seeds
/// recovery candidates after a restart.
///
/// Registration and deregistration are idempotent; deregistering an absent
/// entry is logged and tolerated, never a hard failure.
#[derive(Debug)]
pub struct InFlightRegistry {
    path: PathBuf,
    entries: RwLock<BTreeMap<Uuid, String>>,
}

impl InFlightRegistry {
    /// Opens the registry at the storage root, populating it from the
    /// persisted snapshot if one exists.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let path = root.join(REGISTRY_FILE);
        let entries = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: SnapshotFile = serde_json::from_slice(&bytes)?;
                file.entries
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        if !entries.is_empty() {
            info!(count = entries.len(), "Loaded in-flight registry snapshot");
        }
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Registers a run as in flight. Idempotent.
    pub fn register(&self, run_id: Uuid, key: impl Into<String>) -> Result<(), StoreError> {
        let key = key.into();
        {
            let mut entries = self.entries.write();
            if entries.insert(run_id, key).is_some() {
                warn!(run_id = %run_id, "Run already registered as in flight");
            }
        }
        self.persist()
    }

    /// Removes a run from the registry. Idempotent; an absent entry is
    /// metadata drift, not an error.
    pub fn unregister(&self, run_id: Uuid) -> Result<(), StoreError> {
        let removed = self.entries.write().remove(&run_id).is_some();
        if !removed {
            warn!(run_id = %run_id, "Unregister of run not present in registry");
            return Ok(());
        }
        self.persist()
    }

    /// Returns true if the run is currently registered.
    #[must_use]
    pub fn contains(&self, run_id: Uuid) -> bool {
        self.entries.read().contains_key(&run_id)
    }

    /// Returns all registered run identifiers.
    #[must_use]
    pub fn run_ids(&self) -> Vec<Uuid> {
        self.entries.read().keys().copied().collect()
    }

    /// Number of registered runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no runs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clears the in-memory view without touching the persisted snapshot.
    ///
    /// Called at controlled shutdown: the snapshot on disk must survive so
    /// the next startup can discover which runs were in flight.
    pub fn reset(&self) {
        self.entries.write().clear();
    }

    fn persist(&self) -> Result<(), StoreError> {
        let file = SnapshotFile {
            entries: self.entries.read().clone(),
        };
        write_atomic(&self.path, &file)
    }
}

//! Durable storage of the suspended-program continuation snapshot.

use super::{write_atomic, RunLayout};
use crate::durability::DurabilityHint;
use crate::errors::StoreError;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tracing::{debug, warn};

/// Opaque serialized snapshot of a suspended program.
///
/// Sufficient to resume execution after the last completed node. The payload
/// is owned by the step-execution collaborator; this core never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationState {
    /// The collaborator-owned program snapshot.
    pub program: serde_json::Value,
    /// When the snapshot was taken (ISO 8601).
    pub saved_at: String,
}

impl ContinuationState {
    /// Wraps a program snapshot with a capture timestamp.
    #[must_use]
    pub fn new(program: serde_json::Value) -> Self {
        Self {
            program,
            saved_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Durable storage of one continuation snapshot per run.
///
/// Each save fully replaces the prior snapshot. Saves are deferred only
/// under the loosest durability policy and then reach disk on
/// [`ContinuationStore::flush`]; the best-effort policy writes at once but
/// tolerates a failed write. A failed load is survivable: it drives the run
/// to forced finalization rather than propagating upward.
#[derive(Debug)]
pub struct ContinuationStore {
    layout: RunLayout,
    write_on_save: bool,
    best_effort: bool,
    pending: Mutex<Option<ContinuationState>>,
}

impl ContinuationStore {
    /// Creates a store for one run under the given layout and policy.
    #[must_use]
    pub fn new(layout: RunLayout, hint: DurabilityHint) -> Self {
        Self {
            layout,
            write_on_save: hint.persists_continuation_on_suspend(),
            best_effort: hint.tolerates_continuation_write_failure(),
            pending: Mutex::new(None),
        }
    }

    /// Stores a snapshot, replacing any prior one.
    ///
    /// Under the buffered policy the snapshot is held in memory until the
    /// next flush; a crash in between loses it, which is the policy's
    /// documented tradeoff. Under the best-effort policy a failed write is
    /// logged, kept in memory, and retried at the next flush.
    pub fn save(&self, state: ContinuationState) -> Result<(), StoreError> {
        if !self.write_on_save {
            debug!("Deferred continuation save");
            *self.pending.lock() = Some(state);
            return Ok(());
        }
        match self.write_snapshot(&state) {
            Ok(()) => {
                *self.pending.lock() = None;
                Ok(())
            }
            Err(e) if self.best_effort => {
                warn!(error = %e, "Continuation write failed; snapshot kept in memory");
                *self.pending.lock() = Some(state);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Writes any deferred snapshot to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        let deferred = self.pending.lock().take();
        if let Some(state) = deferred {
            self.write_snapshot(&state)?;
            debug!("Flushed deferred continuation snapshot");
        }
        Ok(())
    }

    /// Returns true if a snapshot is waiting to be flushed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Loads the current snapshot.
    ///
    /// Absence and corruption are distinct, reportable failures; neither is a
    /// process-level crash.
    pub fn load(&self) -> Result<ContinuationState, StoreError> {
        if let Some(state) = self.pending.lock().as_ref() {
            return Ok(state.clone());
        }
        let bytes = std::fs::read(self.layout.continuation_path()).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::ContinuationMissing
            } else {
                StoreError::Io(e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::ContinuationMalformed(e.to_string()))
    }

    /// Discards the snapshot, in memory and on disk.
    pub fn discard(&self) -> Result<(), StoreError> {
        *self.pending.lock() = None;
        match std::fs::remove_file(self.layout.continuation_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write_snapshot(&self, state: &ContinuationState) -> Result<(), StoreError> {
        self.layout.ensure_dirs()?;
        write_atomic(&self.layout.continuation_path(), state)
    }
}

//! Error types for the duraflow persistence core.
//!
//! The taxonomy separates low-level storage failures from the corruption
//! classes that the recovery coordinator consumes. Every corruption class is
//! survivable: recovery converges the affected run to a terminal state
//! instead of propagating a process-fatal error.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for duraflow operations.
#[derive(Debug, Error)]
pub enum DuraflowError {
    /// A storage-level failure.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The referenced run is not known to the engine.
    #[error("Unknown run: {0}")]
    UnknownRun(Uuid),

    /// An operation was attempted against an already-completed run.
    #[error("Run {0} is already completed")]
    AlreadyCompleted(Uuid),

    /// Block exit recorded with no matching open block.
    #[error("Block stack violation for run {run_id}: {message}")]
    BlockStack {
        /// The run involved.
        run_id: Uuid,
        /// What went wrong.
        message: String,
    },

    /// A controlled-shutdown drain did not finish within the grace period.
    #[error("Shutdown drain timed out after {grace_ms}ms with {pending} run(s) unflushed")]
    DrainTimeout {
        /// The grace period in milliseconds.
        grace_ms: u64,
        /// Number of runs that did not flush in time.
        pending: usize,
    },
}

/// Errors produced by the node and continuation stores.
///
/// Missing and malformed records are distinct variants so the recovery layer
/// can classify them rather than treating everything as a generic parse error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A node record file does not exist.
    #[error("Node record {id} is missing from storage")]
    NodeMissing {
        /// The missing node identifier.
        id: NodeId,
    },

    /// A node record file exists but cannot be decoded.
    #[error("Node record {id} is malformed: {reason}")]
    NodeMalformed {
        /// The malformed node identifier.
        id: NodeId,
        /// Decode failure detail.
        reason: String,
    },

    /// An immutable node record was about to be rewritten.
    #[error("Node record {id} is already persisted and is not an end node")]
    NodeImmutable {
        /// The node identifier.
        id: NodeId,
    },

    /// The continuation snapshot is absent.
    #[error("Continuation snapshot is missing")]
    ContinuationMissing,

    /// The continuation snapshot exists but cannot be decoded.
    #[error("Continuation snapshot is malformed: {0}")]
    ContinuationMalformed(String),

    /// The run record file is absent or unreadable.
    #[error("Run record is unreadable: {0}")]
    RecordUnreadable(String),

    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure while writing a record.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The corruption classes consumed by the recovery coordinator.
///
/// All four are handled entirely within recovery, by forced finalization or
/// self-healing. None propagate upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionKind {
    /// Unreadable or missing node record, or an inconsistent block stack.
    GraphCorruption,
    /// Unreadable or missing continuation snapshot.
    ContinuationCorruption,
    /// The in-flight registry disagrees with on-disk state.
    RegistryInconsistency,
    /// Completion flag is false while the graph is structurally terminal.
    LateFlagMismatch,
}

impl fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GraphCorruption => write!(f, "graph_corruption"),
            Self::ContinuationCorruption => write!(f, "continuation_corruption"),
            Self::RegistryInconsistency => write!(f, "registry_inconsistency"),
            Self::LateFlagMismatch => write!(f, "late_flag_mismatch"),
        }
    }
}

impl StoreError {
    /// Returns true if this failure indicates graph corruption.
    #[must_use]
    pub fn is_graph_corruption(&self) -> bool {
        matches!(
            self,
            Self::NodeMissing { .. } | Self::NodeMalformed { .. } | Self::RecordUnreadable(_)
        )
    }

    /// Returns true if this failure indicates continuation corruption.
    #[must_use]
    pub fn is_continuation_corruption(&self) -> bool {
        matches!(self, Self::ContinuationMissing | Self::ContinuationMalformed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_kind_display() {
        assert_eq!(CorruptionKind::GraphCorruption.to_string(), "graph_corruption");
        assert_eq!(
            CorruptionKind::ContinuationCorruption.to_string(),
            "continuation_corruption"
        );
        assert_eq!(CorruptionKind::LateFlagMismatch.to_string(), "late_flag_mismatch");
    }

    #[test]
    fn test_corruption_kind_serialize() {
        let json = serde_json::to_string(&CorruptionKind::RegistryInconsistency).unwrap();
        assert_eq!(json, r#""registry_inconsistency""#);
    }

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::NodeMissing { id: 4 }.is_graph_corruption());
        assert!(StoreError::ContinuationMissing.is_continuation_corruption());
        assert!(!StoreError::ContinuationMissing.is_graph_corruption());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NodeMalformed {
            id: 7,
            reason: "unexpected end of input".to_string(),
        };
        assert!(err.to_string().contains("7"));
        assert!(err.to_string().contains("malformed"));
    }
}

//! Read-only inspection snapshot of a run's state.

use crate::durability::DurabilityHint;
use crate::graph::{NodeId, RunOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stable, read-only view of a run record at a point in time.
///
/// This is the supported way to inspect run state from tests and tooling;
/// nothing outside the core reaches into the record's internals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The run identifier.
    pub run_id: Uuid,
    /// The run's durability policy.
    pub hint: DurabilityHint,
    /// Whether the run has completed.
    pub completed: bool,
    /// The terminal result, unset until completion.
    pub result: Option<RunOutcome>,
    /// The current frontier node identifiers.
    pub heads: Vec<NodeId>,
    /// Open block-start identifiers, outermost first.
    pub open_blocks: Vec<NodeId>,
    /// True if the graph has a single end-node head and no open blocks.
    pub structurally_terminal: bool,
}

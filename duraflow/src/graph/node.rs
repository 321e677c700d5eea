//! Flow node records and the run outcome vocabulary.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node within one run's execution graph.
///
/// Identifiers are strictly increasing and unique within a run. A node, once
/// durably appended, never changes kind or parent set.
pub type NodeId = u64;

/// The kind of a flow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The first node of a run.
    Start,
    /// Entry into a nested block scope.
    BlockStart,
    /// Exit from a nested block scope.
    BlockEnd,
    /// A single step or event.
    Atom,
    /// The terminal node of a run.
    End,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::BlockStart => write!(f, "block_start"),
            Self::BlockEnd => write!(f, "block_end"),
            Self::Atom => write!(f, "atom"),
            Self::End => write!(f, "end"),
        }
    }
}

/// The terminal outcome of a run or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run finished successfully.
    Success,
    /// The run failed.
    Failure,
    /// The run was aborted before reaching a natural end.
    Aborted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl RunOutcome {
    /// Returns true if the outcome indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One step/event in a run's execution DAG.
///
/// Immutable once durably written, except that an end node's outcome may be
/// the final write for that node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Monotonically increasing identifier, unique within the run.
    pub id: NodeId,
    /// The node kind.
    pub kind: NodeKind,
    /// Ordered parent identifiers.
    #[serde(default)]
    pub parents: Vec<NodeId>,
    /// The outcome carried by this node, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// When the node was recorded (ISO 8601).
    pub recorded_at: String,
}

impl FlowNode {
    /// Creates a new flow node.
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, parents: Vec<NodeId>) -> Self {
        Self {
            id,
            kind,
            parents,
            outcome: None,
            recorded_at: Utc::now().to_rfc3339(),
        }
    }

    /// Sets the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: RunOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Returns true if this is a terminal (end) node.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.kind == NodeKind::End
    }

    /// Returns true if this node opens a block scope.
    #[must_use]
    pub fn is_block_start(&self) -> bool {
        self.kind == NodeKind::BlockStart
    }
}

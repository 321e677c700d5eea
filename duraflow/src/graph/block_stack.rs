//! Bounded LIFO stack of open block scopes.

use super::{FlowNode, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum nesting depth before pushes are refused.
pub const MAX_BLOCK_DEPTH: usize = 1024;

/// A LIFO stack of block-start node identifiers for currently-open scopes.
///
/// Pushed on block entry, popped on the matching block exit. Recovery
/// validates the stack against actual graph linkage via [`BlockStack::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockStack {
    entries: Vec<NodeId>,
}

/// A block stack inconsistency detected at push time or during validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlockStackError {
    /// Push beyond the depth cap.
    #[error("Block stack depth exceeds {MAX_BLOCK_DEPTH}")]
    DepthExceeded,
    /// Pop with no open blocks.
    #[error("Block exit with no open block")]
    Underflow,
    /// A stacked entry has no corresponding node in the graph.
    #[error("Open block {0} has no node record")]
    DanglingEntry(NodeId),
    /// A stacked entry refers to a node that is not a block start.
    #[error("Open block {id} is a {kind} node, not a block start")]
    NotABlockStart {
        /// The offending node id.
        id: NodeId,
        /// The actual kind found.
        kind: NodeKind,
    },
    /// Entries are not in nesting order.
    #[error("Open blocks out of nesting order at {0}")]
    OutOfOrder(NodeId),
}

impl BlockStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a block-start node id.
    pub fn push(&mut self, id: NodeId) -> Result<(), BlockStackError> {
        if self.entries.len() >= MAX_BLOCK_DEPTH {
            return Err(BlockStackError::DepthExceeded);
        }
        self.entries.push(id);
        Ok(())
    }

    /// Pops the innermost open block.
    pub fn pop(&mut self) -> Result<NodeId, BlockStackError> {
        self.entries.pop().ok_or(BlockStackError::Underflow)
    }

    /// Returns the innermost open block, if any.
    #[must_use]
    pub fn innermost(&self) -> Option<NodeId> {
        self.entries.last().copied()
    }

    /// Returns the number of open blocks.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no blocks are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the open block ids, outermost first.
    #[must_use]
    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }

    /// Clears all open blocks.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Validates the stack against resolved graph nodes.
    ///
    /// Every entry must resolve to a block-start node and entries must be in
    /// nesting order (outer ids precede inner ids). Any violation is graph
    /// corruption from recovery's point of view.
    pub fn validate(&self, nodes: &BTreeMap<NodeId, FlowNode>) -> Result<(), BlockStackError> {
        let mut previous: Option<NodeId> = None;
        for &id in &self.entries {
            let node = nodes.get(&id).ok_or(BlockStackError::DanglingEntry(id))?;
            if !node.is_block_start() {
                return Err(BlockStackError::NotABlockStart { id, kind: node.kind });
            }
            if let Some(prev) = previous {
                if id <= prev {
                    return Err(BlockStackError::OutOfOrder(id));
                }
            }
            previous = Some(id);
        }
        Ok(())
    }
}

//! The in-memory execution graph for one run.

use super::{BlockStack, BlockStackError, FlowNode, NodeId, NodeKind, RunOutcome};
use std::collections::BTreeMap;

/// The DAG of flow nodes for one run, plus the current execution frontier
/// (`heads`) and the stack of open block scopes.
///
/// The graph is the working copy; durability is the node store's concern.
/// `heads`, `open_blocks` and the id counter are persisted in the run record.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    nodes: BTreeMap<NodeId, FlowNode>,
    heads: Vec<NodeId>,
    open_blocks: BlockStack,
    next_id: NodeId,
}

impl ExecutionGraph {
    /// Creates an empty graph. The first allocated id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            heads: Vec::new(),
            open_blocks: BlockStack::new(),
            next_id: 1,
        }
    }

    /// Reassembles a graph from persisted frontier state and resolved nodes.
    #[must_use]
    pub fn from_parts(
        heads: Vec<NodeId>,
        open_blocks: BlockStack,
        next_id: NodeId,
        nodes: BTreeMap<NodeId, FlowNode>,
    ) -> Self {
        Self {
            nodes,
            heads,
            open_blocks,
            next_id,
        }
    }

    /// Appends a new node of the given kind, advancing the frontier.
    ///
    /// Parents are the current heads (empty for the start node). Block starts
    /// are pushed onto the open-block stack; block ends pop their scope.
    pub fn append(
        &mut self,
        kind: NodeKind,
        outcome: Option<RunOutcome>,
    ) -> Result<FlowNode, BlockStackError> {
        let id = self.next_id;
        let parents = if kind == NodeKind::Start {
            Vec::new()
        } else {
            self.heads.clone()
        };
        let mut node = FlowNode::new(id, kind, parents);
        if let Some(outcome) = outcome {
            node = node.with_outcome(outcome);
        }

        match kind {
            NodeKind::BlockStart => self.open_blocks.push(id)?,
            NodeKind::BlockEnd => {
                self.open_blocks.pop()?;
            }
            NodeKind::Start | NodeKind::Atom | NodeKind::End => {}
        }

        self.next_id = id + 1;
        self.heads = vec![id];
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    /// Returns the current frontier node identifiers.
    #[must_use]
    pub fn heads(&self) -> &[NodeId] {
        &self.heads
    }

    /// Returns the stack of open block scopes.
    #[must_use]
    pub fn open_blocks(&self) -> &BlockStack {
        &self.open_blocks
    }

    /// Clears all open block scopes. Used only by forced finalization.
    pub fn clear_open_blocks(&mut self) {
        self.open_blocks.clear();
    }

    /// Returns the next node identifier to be allocated.
    #[must_use]
    pub fn next_id(&self) -> NodeId {
        self.next_id
    }

    /// Looks up a node in the working copy.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.get(&id)
    }

    /// Returns all nodes in the working copy.
    #[must_use]
    pub fn nodes(&self) -> &BTreeMap<NodeId, FlowNode> {
        &self.nodes
    }

    /// Returns the sole head node, if the frontier has exactly one entry
    /// resolved in the working copy.
    #[must_use]
    pub fn sole_head(&self) -> Option<&FlowNode> {
        match self.heads.as_slice() {
            [id] => self.nodes.get(id),
            _ => None,
        }
    }

    /// Returns true if the graph has the shape of a finished run: exactly one
    /// head, that head is an end node, and no block scope is open.
    #[must_use]
    pub fn is_structurally_terminal(&self) -> bool {
        self.open_blocks.is_empty() && self.sole_head().is_some_and(FlowNode::is_end)
    }

    /// Returns the end node recorded in the working copy, if any.
    #[must_use]
    pub fn end_node(&self) -> Option<&FlowNode> {
        self.nodes.values().rev().find(|n| n.is_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> ExecutionGraph {
        let mut graph = ExecutionGraph::new();
        graph.append(NodeKind::Start, None).unwrap();
        graph.append(NodeKind::Atom, Some(RunOutcome::Success)).unwrap();
        graph
    }

    #[test]
    fn test_ids_strictly_increase() {
        let mut graph = ExecutionGraph::new();
        let a = graph.append(NodeKind::Start, None).unwrap();
        let b = graph.append(NodeKind::Atom, None).unwrap();
        let c = graph.append(NodeKind::End, Some(RunOutcome::Success)).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(c.id, 3);
        assert_eq!(graph.next_id(), 4);
    }

    #[test]
    fn test_parents_follow_heads() {
        let mut graph = linear_graph();
        let node = graph.append(NodeKind::Atom, None).unwrap();
        assert_eq!(node.parents, vec![2]);
        assert_eq!(graph.heads(), &[3]);
    }

    #[test]
    fn test_block_scope_tracking() {
        let mut graph = ExecutionGraph::new();
        graph.append(NodeKind::Start, None).unwrap();
        let open = graph.append(NodeKind::BlockStart, None).unwrap();
        assert_eq!(graph.open_blocks().entries(), &[open.id]);
        graph.append(NodeKind::Atom, None).unwrap();
        graph.append(NodeKind::BlockEnd, None).unwrap();
        assert!(graph.open_blocks().is_empty());
    }

    #[test]
    fn test_block_end_without_open_block_fails() {
        let mut graph = ExecutionGraph::new();
        graph.append(NodeKind::Start, None).unwrap();
        assert!(graph.append(NodeKind::BlockEnd, None).is_err());
    }

    #[test]
    fn test_structurally_terminal() {
        let mut graph = linear_graph();
        assert!(!graph.is_structurally_terminal());
        graph.append(NodeKind::End, Some(RunOutcome::Success)).unwrap();
        assert!(graph.is_structurally_terminal());
        assert_eq!(graph.end_node().map(|n| n.id), Some(3));
    }

    #[test]
    fn test_open_block_prevents_terminal_shape() {
        let mut graph = ExecutionGraph::new();
        graph.append(NodeKind::Start, None).unwrap();
        graph.append(NodeKind::BlockStart, None).unwrap();
        graph.append(NodeKind::End, Some(RunOutcome::Failure)).unwrap();
        assert!(!graph.is_structurally_terminal());
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let graph = linear_graph();
        let rebuilt = ExecutionGraph::from_parts(
            graph.heads().to_vec(),
            graph.open_blocks().clone(),
            graph.next_id(),
            graph.nodes().clone(),
        );
        assert_eq!(rebuilt.heads(), graph.heads());
        assert_eq!(rebuilt.next_id(), graph.next_id());
    }
}

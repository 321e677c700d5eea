//! Append-only durable storage of flow node records.

use super::{write_atomic, RunLayout};
use crate::durability::DurabilityHint;
use crate::errors::StoreError;
use crate::graph::{BlockStack, FlowNode, NodeId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io::ErrorKind;
use tracing::{debug, warn};

/// Durable append-only storage of graph nodes for one run.
///
/// Each node is one record file keyed by its identifier. Appends are
/// all-or-nothing: records are written to a temporary file and renamed into
/// place, so no reader ever sees a partial record. Under the loosest
/// durability policy appends are buffered in memory and only reach disk on
/// [`ExecutionGraphStore::flush`].
#[derive(Debug)]
pub struct ExecutionGraphStore {
    layout: RunLayout,
    buffered: bool,
    buffer: Mutex<BTreeMap<NodeId, FlowNode>>,
}

impl ExecutionGraphStore {
    /// Creates a store for one run under the given layout and policy.
    #[must_use]
    pub fn new(layout: RunLayout, hint: DurabilityHint) -> Self {
        Self {
            layout,
            buffered: !hint.persists_nodes_synchronously(),
            buffer: Mutex::new(BTreeMap::new()),
        }
    }

    /// Persists a new node record.
    ///
    /// A successfully appended node is immutable thereafter; the only
    /// permitted rewrite is an end node receiving its final outcome. A write
    /// failure is fatal to the current step only, never to the process.
    pub fn append(&self, node: &FlowNode) -> Result<(), StoreError> {
        if !node.is_end() && self.layout.node_path(node.id).exists() {
            return Err(StoreError::NodeImmutable { id: node.id });
        }
        if self.buffered {
            self.buffer.lock().insert(node.id, node.clone());
            debug!(node_id = node.id, kind = %node.kind, "Buffered node append");
            return Ok(());
        }
        self.write_record(node)
    }

    /// Drains every buffered node record to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        let pending: Vec<FlowNode> = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut *buffer).into_values().collect()
        };
        for node in &pending {
            self.write_record(node)?;
        }
        if !pending.is_empty() {
            debug!(count = pending.len(), "Flushed buffered node records");
        }
        Ok(())
    }

    /// Number of node records waiting in the write buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Loads one node record.
    ///
    /// Missing and malformed records are reported as distinct failures so the
    /// recovery layer can classify them as graph corruption.
    pub fn read(&self, id: NodeId) -> Result<FlowNode, StoreError> {
        if let Some(node) = self.buffer.lock().get(&id) {
            return Ok(node.clone());
        }
        let path = self.layout.node_path(id);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NodeMissing { id }
            } else {
                StoreError::Io(e)
            }
        })?;
        let node: FlowNode = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::NodeMalformed { id, reason: e.to_string() })?;
        if node.id != id {
            return Err(StoreError::NodeMalformed {
                id,
                reason: format!("record claims id {}", node.id),
            });
        }
        Ok(node)
    }

    /// Resolves the transitive closure of nodes reachable from the frontier
    /// and the open-block stack, without loading unreferenced history.
    ///
    /// Any missing or malformed record along the way is an error; recovery
    /// treats it as graph corruption.
    pub fn list_referenced(
        &self,
        heads: &[NodeId],
        open_blocks: &BlockStack,
    ) -> Result<BTreeMap<NodeId, FlowNode>, StoreError> {
        let mut resolved: BTreeMap<NodeId, FlowNode> = BTreeMap::new();
        let mut queue: VecDeque<NodeId> = heads
            .iter()
            .chain(open_blocks.entries())
            .copied()
            .collect();
        while let Some(id) = queue.pop_front() {
            if resolved.contains_key(&id) {
                continue;
            }
            let node = self.read(id)?;
            queue.extend(node.parents.iter().copied());
            resolved.insert(id, node);
        }
        Ok(resolved)
    }

    /// Scans storage for a recorded end node carrying an outcome.
    ///
    /// Used by forced finalization to recover an already-achieved result when
    /// only the completion bookkeeping was lost. Malformed records are skipped;
    /// this is a best-effort scan, not a consistency check.
    #[must_use]
    pub fn find_recorded_end(&self) -> Option<FlowNode> {
        let mut best: Option<FlowNode> = None;
        for node in self.buffer.lock().values() {
            if node.is_end() && node.outcome.is_some() {
                best = Some(node.clone());
            }
        }
        let entries = match std::fs::read_dir(self.layout.nodes_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "Node storage directory unreadable during end-node scan");
                return best;
            }
        };
        for entry in entries.flatten() {
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            let Ok(node) = serde_json::from_slice::<FlowNode>(&bytes) else {
                warn!(path = %entry.path().display(), "Skipping malformed node record during scan");
                continue;
            };
            if node.is_end() && node.outcome.is_some() {
                match &best {
                    Some(current) if current.id >= node.id => {}
                    _ => best = Some(node),
                }
            }
        }
        best
    }

    /// Returns the highest node id with a record on disk or in the buffer.
    ///
    /// Used when rebuilding a run whose record was lost: the highest
    /// surviving node is the best available frontier.
    #[must_use]
    pub fn highest_recorded(&self) -> Option<NodeId> {
        let mut best = self.buffer.lock().keys().next_back().copied();
        let entries = match std::fs::read_dir(self.layout.nodes_dir()) {
            Ok(entries) => entries,
            Err(_) => return best,
        };
        for entry in entries.flatten() {
            let Some(stem) = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
            else {
                continue;
            };
            let Ok(id) = stem.parse::<NodeId>() else {
                continue;
            };
            if best.map_or(true, |b| id > b) {
                best = Some(id);
            }
        }
        best
    }

    fn write_record(&self, node: &FlowNode) -> Result<(), StoreError> {
        self.layout.ensure_dirs()?;
        write_atomic(&self.layout.node_path(node.id), node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, RunOutcome};
    use uuid::Uuid;

    fn store(hint: DurabilityHint) -> (tempfile::TempDir, ExecutionGraphStore) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(tmp.path(), Uuid::new_v4());
        layout.ensure_dirs().unwrap();
        (tmp, ExecutionGraphStore::new(layout, hint))
    }

    #[test]
    fn test_append_and_read_synchronous() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        let node = FlowNode::new(1, NodeKind::Start, vec![]);
        store.append(&node).unwrap();
        assert_eq!(store.pending(), 0);
        assert_eq!(store.read(1).unwrap(), node);
    }

    #[test]
    fn test_buffered_append_not_on_disk_until_flush() {
        let (_tmp, store) = store(DurabilityHint::PerformanceOptimized);
        let node = FlowNode::new(1, NodeKind::Start, vec![]);
        store.append(&node).unwrap();
        assert_eq!(store.pending(), 1);
        // Still readable through the buffer.
        assert_eq!(store.read(1).unwrap().id, 1);
        store.flush().unwrap();
        assert_eq!(store.pending(), 0);
        assert_eq!(store.read(1).unwrap(), node);
    }

    #[test]
    fn test_read_missing_is_distinct() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        assert!(matches!(store.read(9), Err(StoreError::NodeMissing { id: 9 })));
    }

    #[test]
    fn test_read_malformed_is_distinct() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        std::fs::write(store.layout.node_path(3), b"{not json").unwrap();
        assert!(matches!(
            store.read(3),
            Err(StoreError::NodeMalformed { id: 3, .. })
        ));
    }

    #[test]
    fn test_non_end_node_is_immutable() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        let node = FlowNode::new(2, NodeKind::Atom, vec![1]);
        store.append(&node).unwrap();
        assert!(matches!(
            store.append(&node),
            Err(StoreError::NodeImmutable { id: 2 })
        ));
    }

    #[test]
    fn test_end_node_outcome_may_be_rewritten() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        let end = FlowNode::new(4, NodeKind::End, vec![3]);
        store.append(&end).unwrap();
        let finished = end.with_outcome(RunOutcome::Success);
        store.append(&finished).unwrap();
        assert_eq!(store.read(4).unwrap().outcome, Some(RunOutcome::Success));
    }

    #[test]
    fn test_list_referenced_resolves_closure() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        store.append(&FlowNode::new(1, NodeKind::Start, vec![])).unwrap();
        store.append(&FlowNode::new(2, NodeKind::Atom, vec![1])).unwrap();
        store.append(&FlowNode::new(3, NodeKind::Atom, vec![2])).unwrap();
        let resolved = store.list_referenced(&[3], &BlockStack::new()).unwrap();
        assert_eq!(resolved.len(), 3);
        assert!(resolved.contains_key(&1));
    }

    #[test]
    fn test_list_referenced_missing_parent_fails() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        store.append(&FlowNode::new(2, NodeKind::Atom, vec![1])).unwrap();
        assert!(matches!(
            store.list_referenced(&[2], &BlockStack::new()),
            Err(StoreError::NodeMissing { id: 1 })
        ));
    }

    #[test]
    fn test_highest_recorded() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        assert_eq!(store.highest_recorded(), None);
        store.append(&FlowNode::new(1, NodeKind::Start, vec![])).unwrap();
        store.append(&FlowNode::new(2, NodeKind::Atom, vec![1])).unwrap();
        assert_eq!(store.highest_recorded(), Some(2));
    }

    #[test]
    fn test_find_recorded_end() {
        let (_tmp, store) = store(DurabilityHint::MaxSurvivability);
        store.append(&FlowNode::new(1, NodeKind::Start, vec![])).unwrap();
        assert!(store.find_recorded_end().is_none());
        store
            .append(&FlowNode::new(2, NodeKind::End, vec![1]).with_outcome(RunOutcome::Success))
            .unwrap();
        let end = store.find_recorded_end().unwrap();
        assert_eq!(end.id, 2);
        assert_eq!(end.outcome, Some(RunOutcome::Success));
    }
}

//! Persistent record of one run.

use super::StateSnapshot;
use crate::durability::DurabilityHint;
use crate::errors::{DuraflowError, StoreError};
use crate::graph::{
    BlockStack, ExecutionGraph, FlowNode, NodeId, NodeKind, RunOutcome,
};
use crate::store::{
    write_atomic, ContinuationState, ContinuationStore, ExecutionGraphStore, RunLayout,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// The serialized form of a run record (`run.json`).
#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    id: Uuid,
    hint: DurabilityHint,
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<RunOutcome>,
    heads: Vec<NodeId>,
    open_blocks: BlockStack,
    next_id: NodeId,
    created_at: String,
    updated_at: String,
}

/// Owns one run's execution graph, continuation slot, completion flag and
/// result.
///
/// The pair `(graph, completed)` is the source of truth for a run's liveness;
/// the in-flight registry is metadata only. Mutations are serialized by the
/// caller: a run executes one step at a time, so no two steps of the same run
/// persist concurrently.
#[derive(Debug)]
pub struct RunRecord {
    id: Uuid,
    hint: DurabilityHint,
    completed: bool,
    result: Option<RunOutcome>,
    created_at: String,
    updated_at: String,
    graph: ExecutionGraph,
    layout: RunLayout,
    nodes: ExecutionGraphStore,
    continuation: ContinuationStore,
}

impl RunRecord {
    /// Creates a new run under the storage root and durably writes its start
    /// node and record, regardless of policy. Everything after the start node
    /// follows the run's durability hint.
    pub fn create(root: &Path, id: Uuid, hint: DurabilityHint) -> Result<Self, DuraflowError> {
        let layout = RunLayout::new(root, id);
        layout.ensure_dirs().map_err(StoreError::Io)?;
        let now = Utc::now().to_rfc3339();
        let mut record = Self {
            id,
            hint,
            completed: false,
            result: None,
            created_at: now.clone(),
            updated_at: now,
            graph: ExecutionGraph::new(),
            layout: layout.clone(),
            nodes: ExecutionGraphStore::new(layout.clone(), hint),
            continuation: ContinuationStore::new(layout, hint),
        };
        let start = record
            .graph
            .append(NodeKind::Start, None)
            .map_err(|e| record.block_error(&e))?;
        record.nodes.append(&start)?;
        record.nodes.flush()?;
        record.save_record()?;
        info!(run_id = %id, hint = %hint, "Run created");
        Ok(record)
    }

    /// Reconstructs a minimal in-progress record for a run whose `run.json`
    /// was lost, adopting whatever node records survive on disk.
    ///
    /// The highest surviving node becomes the frontier; only when nothing
    /// survives is a fresh start node written. Only recovery calls this, on
    /// its way to forced finalization.
    pub(crate) fn rebuild(root: &Path, id: Uuid) -> Result<Self, DuraflowError> {
        let layout = RunLayout::new(root, id);
        layout.ensure_dirs().map_err(StoreError::Io)?;
        let hint = DurabilityHint::MaxSurvivability;
        let nodes = ExecutionGraphStore::new(layout.clone(), hint);
        let now = Utc::now().to_rfc3339();
        let (heads, next_id) = match nodes.highest_recorded() {
            Some(head) => (vec![head], head + 1),
            None => (Vec::new(), 1),
        };
        let mut record = Self {
            id,
            hint,
            completed: false,
            result: None,
            created_at: now.clone(),
            updated_at: now,
            graph: ExecutionGraph::from_parts(
                heads.clone(),
                BlockStack::new(),
                next_id,
                BTreeMap::new(),
            ),
            layout: layout.clone(),
            nodes,
            continuation: ContinuationStore::new(layout, hint),
        };
        if heads.is_empty() {
            let start = record
                .graph
                .append(NodeKind::Start, None)
                .map_err(|e| record.block_error(&e))?;
            record.nodes.append(&start)?;
            record.nodes.flush()?;
        }
        record.save_record()?;
        info!(run_id = %id, frontier = ?record.graph.heads(), "Run record rebuilt");
        Ok(record)
    }

    /// Loads a run record from its `run.json`.
    ///
    /// Node records are not resolved here; recovery resolves them explicitly
    /// via the node store so that missing or malformed records surface as
    /// classified corruption.
    pub fn load(root: &Path, id: Uuid) -> Result<Self, StoreError> {
        let layout = RunLayout::new(root, id);
        let bytes = std::fs::read(layout.record_path())
            .map_err(|e| StoreError::RecordUnreadable(e.to_string()))?;
        let file: RecordFile = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::RecordUnreadable(e.to_string()))?;
        let graph = ExecutionGraph::from_parts(
            file.heads,
            file.open_blocks,
            file.next_id,
            BTreeMap::new(),
        );
        Ok(Self {
            id: file.id,
            hint: file.hint,
            completed: file.completed,
            result: file.result,
            created_at: file.created_at,
            updated_at: file.updated_at,
            graph,
            layout: layout.clone(),
            nodes: ExecutionGraphStore::new(layout.clone(), file.hint),
            continuation: ContinuationStore::new(layout, file.hint),
        })
    }

    /// Records a completed step as a new atom node.
    pub fn record_step_completed(
        &mut self,
        outcome: Option<RunOutcome>,
    ) -> Result<NodeId, DuraflowError> {
        self.append_durable(NodeKind::Atom, outcome)
    }

    /// Records entry into a nested block scope.
    pub fn record_block_entered(&mut self) -> Result<NodeId, DuraflowError> {
        self.append_durable(NodeKind::BlockStart, None)
    }

    /// Records exit from the innermost block scope.
    pub fn record_block_exited(&mut self) -> Result<NodeId, DuraflowError> {
        self.append_durable(NodeKind::BlockEnd, None)
    }

    /// Records a suspension point, checkpointing the continuation snapshot.
    ///
    /// The snapshot is written before this returns under every policy except
    /// `PerformanceOptimized`, so the run may be considered parked. Under
    /// `SurvivableNondurable` a failed write is tolerated and retried at the
    /// next flush; under `PerformanceOptimized` the write itself is deferred.
    pub fn record_step_suspended(
        &mut self,
        state: ContinuationState,
    ) -> Result<(), DuraflowError> {
        self.ensure_in_progress()?;
        self.continuation.save(state)?;
        debug!(run_id = %self.id, "Run parked at suspension point");
        Ok(())
    }

    /// Finalizes the run: appends the end node, sets the result and the
    /// completion flag, and discards the continuation.
    ///
    /// Finalization is always durable, whatever the run's hint: a completed
    /// run's invariants must hold at rest.
    pub fn finalize(&mut self, outcome: RunOutcome) -> Result<NodeId, DuraflowError> {
        self.ensure_in_progress()?;
        let end = self
            .graph
            .append(NodeKind::End, Some(outcome))
            .map_err(|e| self.block_error(&e))?;
        self.nodes.append(&end)?;
        self.completed = true;
        self.result = Some(outcome);
        self.continuation.discard()?;
        self.nodes.flush()?;
        self.save_record()?;
        info!(run_id = %self.id, outcome = %outcome, "Run finalized");
        Ok(end.id)
    }

    /// Drains all buffered state to disk. Called for every live run during a
    /// controlled shutdown.
    pub fn flush(&mut self) -> Result<(), DuraflowError> {
        self.nodes.flush()?;
        self.continuation.flush()?;
        self.save_record()?;
        Ok(())
    }

    /// Returns a read-only snapshot of the run's state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            run_id: self.id,
            hint: self.hint,
            completed: self.completed,
            result: self.result,
            heads: self.graph.heads().to_vec(),
            open_blocks: self.graph.open_blocks().entries().to_vec(),
            structurally_terminal: self.graph.is_structurally_terminal(),
        }
    }

    /// The run identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The run's durability policy.
    #[must_use]
    pub fn hint(&self) -> DurabilityHint {
        self.hint
    }

    /// Whether the run has completed.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// The terminal result, unset until completion.
    #[must_use]
    pub fn result(&self) -> Option<RunOutcome> {
        self.result
    }

    /// The run's execution graph.
    #[must_use]
    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// The run's node store.
    #[must_use]
    pub fn node_store(&self) -> &ExecutionGraphStore {
        &self.nodes
    }

    /// The run's continuation store.
    #[must_use]
    pub fn continuation_store(&self) -> &ContinuationStore {
        &self.continuation
    }

    /// Installs nodes resolved from storage into the working graph.
    pub fn install_nodes(&mut self, nodes: BTreeMap<NodeId, FlowNode>) {
        self.graph = ExecutionGraph::from_parts(
            self.graph.heads().to_vec(),
            self.graph.open_blocks().clone(),
            self.graph.next_id(),
            nodes,
        );
    }

    /// Forces the run to a terminal state during recovery.
    ///
    /// Clears open blocks, appends a synthetic end node when none is the sole
    /// head, discards the continuation, sets the completion flag and result,
    /// and persists everything durably.
    pub(crate) fn force_finalize(&mut self, outcome: RunOutcome) -> Result<(), DuraflowError> {
        self.graph.clear_open_blocks();
        let head_is_readable_end = match self.graph.heads() {
            [sole] => self.nodes.read(*sole).map(|n| n.is_end()).unwrap_or(false),
            _ => false,
        };
        if !head_is_readable_end {
            let end = self
                .graph
                .append(NodeKind::End, Some(outcome))
                .map_err(|e| self.block_error(&e))?;
            self.nodes.append(&end)?;
        }
        self.completed = true;
        self.result = Some(outcome);
        self.continuation.discard()?;
        self.nodes.flush()?;
        self.save_record()?;
        Ok(())
    }

    fn append_durable(
        &mut self,
        kind: NodeKind,
        outcome: Option<RunOutcome>,
    ) -> Result<NodeId, DuraflowError> {
        self.ensure_in_progress()?;
        let node = self
            .graph
            .append(kind, outcome)
            .map_err(|e| self.block_error(&e))?;
        self.nodes.append(&node)?;
        if self.hint.persists_record_synchronously() {
            self.save_record()?;
        }
        debug!(run_id = %self.id, node_id = node.id, kind = %kind, "Node recorded");
        Ok(node.id)
    }

    fn ensure_in_progress(&self) -> Result<(), DuraflowError> {
        if self.completed {
            return Err(DuraflowError::AlreadyCompleted(self.id));
        }
        Ok(())
    }

    fn block_error(&self, err: &crate::graph::BlockStackError) -> DuraflowError {
        DuraflowError::BlockStack {
            run_id: self.id,
            message: err.to_string(),
        }
    }

    fn save_record(&mut self) -> Result<(), StoreError> {
        self.updated_at = Utc::now().to_rfc3339();
        let file = RecordFile {
            id: self.id,
            hint: self.hint,
            completed: self.completed,
            result: self.result,
            heads: self.graph.heads().to_vec(),
            open_blocks: self.graph.open_blocks().clone(),
            next_id: self.graph.next_id(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        };
        write_atomic(&self.layout.record_path(), &file)
    }
}

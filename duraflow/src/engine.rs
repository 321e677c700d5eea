//! The persistence engine: the process-wide entry point tying together run
//! records, the in-flight registry, and restart recovery.

use crate::durability::DurabilityHint;
use crate::errors::{DuraflowError, StoreError};
use crate::events::{EventSink, NoOpEventSink, RUN_FINALIZED, RUN_RESUMED};
use crate::graph::{NodeId, RunOutcome};
use crate::recovery::{RecoveryCoordinator, RecoveryDecision, RecoveryReport};
use crate::registry::InFlightRegistry;
use crate::run::{RunRecord, StateSnapshot};
use crate::store::ContinuationState;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

type RunHandle = Arc<Mutex<RunRecord>>;

/// Process-wide persistence engine.
///
/// Owns the storage root, the in-flight registry, and a handle to every live
/// run. Steps of one run are serialized by that run's lock; different runs
/// persist independently.
pub struct Engine {
    root: PathBuf,
    registry: Arc<InFlightRegistry>,
    sink: Arc<dyn EventSink>,
    runs: Arc<Mutex<BTreeMap<Uuid, RunHandle>>>,
}

impl Engine {
    /// Opens an engine over the given storage root with no event sink.
    pub fn new(root: &Path) -> Result<Self, DuraflowError> {
        Self::with_sink(root, Arc::new(NoOpEventSink))
    }

    /// Opens an engine over the given storage root.
    ///
    /// Creates the root directory if needed and loads the in-flight registry
    /// snapshot. Call [`Engine::recover`] before starting new runs so that
    /// candidates from a previous process generation are reconciled first.
    pub fn with_sink(root: &Path, sink: Arc<dyn EventSink>) -> Result<Self, DuraflowError> {
        std::fs::create_dir_all(root).map_err(StoreError::Io)?;
        let registry = Arc::new(InFlightRegistry::open(root)?);
        Ok(Self {
            root: root.to_path_buf(),
            registry,
            sink,
            runs: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    /// Starts a new run under the given durability policy.
    ///
    /// The start node and run record are durable before this returns,
    /// whatever the policy.
    pub fn start_run(&self, hint: DurabilityHint) -> Result<Uuid, DuraflowError> {
        let run_id = Uuid::new_v4();
        let record = RunRecord::create(&self.root, run_id, hint)?;
        self.registry.register(run_id, run_id.to_string())?;
        self.runs
            .lock()
            .insert(run_id, Arc::new(Mutex::new(record)));
        Ok(run_id)
    }

    /// Records a completed step for a live run.
    pub fn step_completed(
        &self,
        run_id: Uuid,
        outcome: Option<RunOutcome>,
    ) -> Result<NodeId, DuraflowError> {
        self.handle(run_id)?.lock().record_step_completed(outcome)
    }

    /// Records entry into a nested block scope.
    pub fn block_entered(&self, run_id: Uuid) -> Result<NodeId, DuraflowError> {
        self.handle(run_id)?.lock().record_block_entered()
    }

    /// Records exit from the innermost block scope.
    pub fn block_exited(&self, run_id: Uuid) -> Result<NodeId, DuraflowError> {
        self.handle(run_id)?.lock().record_block_exited()
    }

    /// Checkpoints a suspension point, parking the run until an external
    /// event resumes it.
    pub fn step_suspended(
        &self,
        run_id: Uuid,
        state: ContinuationState,
    ) -> Result<(), DuraflowError> {
        self.handle(run_id)?.lock().record_step_suspended(state)
    }

    /// Hands a parked run's continuation back to the step executor after its
    /// awaited external event arrived.
    ///
    /// The stored snapshot is left in place; it is only replaced by the next
    /// suspension or discarded at finalization, so a crash between resume and
    /// the next checkpoint replays from the same point.
    pub fn external_event_resumed(
        &self,
        run_id: Uuid,
    ) -> Result<ContinuationState, DuraflowError> {
        let handle = self.handle(run_id)?;
        let record = handle.lock();
        let state = record.continuation_store().load()?;
        self.sink
            .try_emit(RUN_RESUMED, Some(json!({ "run_id": run_id })));
        info!(run_id = %run_id, "Parked run resumed by external event");
        Ok(state)
    }

    /// Finalizes a run with its terminal result and retires it from the
    /// engine and the registry.
    pub fn finalize_run(
        &self,
        run_id: Uuid,
        outcome: RunOutcome,
    ) -> Result<NodeId, DuraflowError> {
        let handle = self.handle(run_id)?;
        let end_id = handle.lock().finalize(outcome)?;
        self.registry.unregister(run_id)?;
        self.runs.lock().remove(&run_id);
        self.sink.try_emit(
            RUN_FINALIZED,
            Some(json!({ "run_id": run_id, "outcome": outcome })),
        );
        Ok(end_id)
    }

    /// Returns a read-only snapshot of a live run's state.
    pub fn snapshot(&self, run_id: Uuid) -> Result<StateSnapshot, DuraflowError> {
        Ok(self.handle(run_id)?.lock().snapshot())
    }

    /// Identifiers of all runs currently live in this engine.
    #[must_use]
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.runs.lock().keys().copied().collect()
    }

    /// Reconciles every recovery candidate left behind by the previous
    /// process generation.
    ///
    /// Runs decided [`RecoveryDecision::Resumed`] are adopted as live runs of
    /// this engine; their reports come back with the hand-back payload taken.
    /// Fetch the continuation to resume from via
    /// [`Engine::external_event_resumed`].
    pub fn recover(&self) -> Result<Vec<RecoveryReport>, DuraflowError> {
        let coordinator = RecoveryCoordinator::new(
            &self.root,
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
        );
        let mut reports = coordinator.recover_all()?;
        for report in &mut reports {
            if report.decision == RecoveryDecision::Resumed {
                if let Some(resumed) = report.resumed.take() {
                    self.runs
                        .lock()
                        .insert(report.run_id, Arc::new(Mutex::new(resumed.record)));
                }
            }
        }
        Ok(reports)
    }

    /// Drains every live run's buffered state to disk within the grace
    /// period, then quiesces the engine.
    ///
    /// The registry's persisted snapshot is left intact: parked runs stay
    /// listed so the next startup discovers them as recovery candidates. A
    /// drain that exceeds the grace period fails with
    /// [`DuraflowError::DrainTimeout`] and leaves the unflushed runs to be
    /// force-finalized at the next startup.
    pub async fn controlled_shutdown(&self, grace: Duration) -> Result<(), DuraflowError> {
        let runs = Arc::clone(&self.runs);
        let drain = tokio::task::spawn_blocking(move || -> Result<(), DuraflowError> {
            let handles: Vec<RunHandle> = runs.lock().values().cloned().collect();
            for handle in handles {
                handle.lock().flush()?;
            }
            Ok(())
        });
        match tokio::time::timeout(grace, drain).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(DuraflowError::Store(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    join_err.to_string(),
                ))));
            }
            Err(_elapsed) => {
                let pending = self.unflushed_runs();
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    pending, "Shutdown drain exceeded grace period"
                );
                return Err(DuraflowError::DrainTimeout {
                    grace_ms: grace.as_millis() as u64,
                    pending,
                });
            }
        }
        self.runs.lock().clear();
        self.registry.reset();
        info!("Controlled shutdown complete");
        Ok(())
    }

    /// Abandons all live runs without draining buffers.
    ///
    /// Models a hard kill: buffered node records and deferred continuation
    /// snapshots are lost, exactly what the looser durability policies trade
    /// away. Used by restart tests and last-resort teardown paths.
    pub fn hard_shutdown(&self) {
        let dropped = self.runs.lock().len();
        self.runs.lock().clear();
        self.registry.reset();
        if dropped > 0 {
            warn!(dropped, "Hard shutdown dropped live runs without draining");
        }
    }

    fn handle(&self, run_id: Uuid) -> Result<RunHandle, DuraflowError> {
        self.runs
            .lock()
            .get(&run_id)
            .cloned()
            .ok_or(DuraflowError::UnknownRun(run_id))
    }

    fn unflushed_runs(&self) -> usize {
        self.runs
            .lock()
            .values()
            .filter(|handle| {
                handle.try_lock().map_or(true, |record| {
                    record.node_store().pending() > 0
                        || record.continuation_store().has_pending()
                })
            })
            .count()
    }
}

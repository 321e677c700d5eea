//! The recovery coordinator and its decision machinery.

use crate::errors::{CorruptionKind, DuraflowError};
use crate::events::{EventSink, RECOVERY_DECISION, RUN_FINALIZED, RUN_RESUMED};
use crate::graph::{FlowNode, RunOutcome};
use crate::registry::InFlightRegistry;
use crate::run::RunRecord;
use crate::store::ContinuationState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The terminal decision reached for one recovery candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDecision {
    /// The run was already cleanly terminal; nothing to do beyond self-healing
    /// a stale registry entry.
    AlreadyTerminal,
    /// The run's graph and continuation were intact; it was handed back to the
    /// step executor.
    Resumed,
    /// The persisted state could not be trusted for resumption; the run was
    /// deterministically driven to a terminal result.
    ForceFinalized,
}

impl fmt::Display for RecoveryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyTerminal => write!(f, "already_terminal"),
            Self::Resumed => write!(f, "resumed"),
            Self::ForceFinalized => write!(f, "force_finalized"),
        }
    }
}

/// A run handed back for resumption: the reconciled record plus the loaded
/// continuation snapshot the step executor resumes from.
#[derive(Debug)]
pub struct ResumedRun {
    /// The reconciled run record, still in progress.
    pub record: RunRecord,
    /// The continuation snapshot to resume from.
    pub continuation: ContinuationState,
}

/// The outcome of recovering one candidate run.
#[derive(Debug)]
pub struct RecoveryReport {
    /// The run involved.
    pub run_id: Uuid,
    /// The decision reached.
    pub decision: RecoveryDecision,
    /// The corruption class that triggered forced finalization or
    /// self-healing, if any.
    pub corruption: Option<CorruptionKind>,
    /// The terminal result, for terminal decisions.
    pub outcome: Option<RunOutcome>,
    /// The hand-back payload, for [`RecoveryDecision::Resumed`].
    pub resumed: Option<ResumedRun>,
}

/// Reconciles on-disk run state after a process restart.
///
/// Entered once per candidate run at startup. Candidates are every run in the
/// registry's last persisted snapshot plus any run directory whose record
/// disagrees with its stored graph. Recovery of different runs is independent
/// and needs no shared locking; a decision, once made, is permanent.
pub struct RecoveryCoordinator {
    root: PathBuf,
    registry: Arc<InFlightRegistry>,
    sink: Arc<dyn EventSink>,
}

impl RecoveryCoordinator {
    /// Creates a coordinator over the given storage root.
    #[must_use]
    pub fn new(root: &Path, registry: Arc<InFlightRegistry>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            root: root.to_path_buf(),
            registry,
            sink,
        }
    }

    /// Recovers every candidate run, returning one report per candidate.
    ///
    /// A failure while recovering one run is logged and skipped; it never
    /// aborts reconciliation of the remaining candidates.
    pub fn recover_all(&self) -> Result<Vec<RecoveryReport>, DuraflowError> {
        let mut candidates: BTreeSet<Uuid> = self.registry.run_ids().into_iter().collect();
        candidates.extend(self.scan_disagreeing_runs());
        let mut reports = Vec::with_capacity(candidates.len());
        for run_id in candidates {
            match self.recover_run(run_id) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Recovery of run failed; continuing with remaining candidates");
                }
            }
        }
        Ok(reports)
    }

    /// Recovers one candidate run.
    pub fn recover_run(&self, run_id: Uuid) -> Result<RecoveryReport, DuraflowError> {
        let record = match RunRecord::load(&self.root, run_id) {
            Ok(record) => record,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Run record unreadable; rebuilding for forced finalization");
                let record = RunRecord::rebuild(&self.root, run_id)?;
                return self.force_finalize(record, CorruptionKind::GraphCorruption);
            }
        };

        if record.completed() {
            return self.reconcile_completed(record);
        }
        self.reconcile_in_progress(record)
    }

    /// Step 1: a completed run is a no-op if the graph confirms the terminal
    /// shape; a stale registry entry is self-healed without touching the
    /// result.
    fn reconcile_completed(
        &self,
        record: RunRecord,
    ) -> Result<RecoveryReport, DuraflowError> {
        if let Some(end) = self.confirmed_terminal_head(&record) {
            let mut corruption = None;
            if self.registry.contains(record.id()) {
                warn!(
                    run_id = %record.id(),
                    "Completed run still listed as in flight; self-healing registry"
                );
                corruption = Some(CorruptionKind::RegistryInconsistency);
                self.registry.unregister(record.id())?;
            }
            let report = RecoveryReport {
                run_id: record.id(),
                decision: RecoveryDecision::AlreadyTerminal,
                corruption,
                outcome: record.result().or(end.outcome),
                resumed: None,
            };
            self.emit_decision(&report);
            return Ok(report);
        }
        // Completed flag set but the graph cannot confirm it: the terminal
        // node write was lost. The recorded result is still authoritative.
        self.force_finalize(record, CorruptionKind::GraphCorruption)
    }

    /// Steps 2-4 for a run whose completion flag is false.
    fn reconcile_in_progress(
        &self,
        mut record: RunRecord,
    ) -> Result<RecoveryReport, DuraflowError> {
        if record.graph().heads().is_empty() {
            return self.force_finalize(record, CorruptionKind::GraphCorruption);
        }
        let resolved = record
            .node_store()
            .list_referenced(record.graph().heads(), record.graph().open_blocks());
        let nodes = match resolved {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(run_id = %record.id(), error = %e, "Graph resolution failed");
                return self.force_finalize(record, CorruptionKind::GraphCorruption);
            }
        };
        if let Err(e) = record.graph().open_blocks().validate(&nodes) {
            warn!(run_id = %record.id(), error = %e, "Open-block stack inconsistent with graph");
            return self.force_finalize(record, CorruptionKind::GraphCorruption);
        }
        record.install_nodes(nodes);

        if record.graph().is_structurally_terminal() {
            // The run actually finished; only the completion bookkeeping was
            // lost. Finalize from the recoverable result, never downgrade.
            return self.force_finalize(record, CorruptionKind::LateFlagMismatch);
        }

        let continuation = match record.continuation_store().load() {
            Ok(continuation) => continuation,
            Err(e) => {
                warn!(run_id = %record.id(), error = %e, "Continuation load failed");
                return self.force_finalize(record, CorruptionKind::ContinuationCorruption);
            }
        };

        // A resumable run must be listed as in flight; an entry lost with
        // the registry snapshot is restored here.
        let mut corruption = None;
        if !self.registry.contains(record.id()) {
            warn!(
                run_id = %record.id(),
                "Resumable run missing from in-flight registry; re-registering"
            );
            corruption = Some(CorruptionKind::RegistryInconsistency);
            self.registry
                .register(record.id(), record.id().to_string())?;
        }

        info!(run_id = %record.id(), heads = ?record.graph().heads(), "Run is resumable");
        let report = RecoveryReport {
            run_id: record.id(),
            decision: RecoveryDecision::Resumed,
            corruption,
            outcome: None,
            resumed: Some(ResumedRun {
                record,
                continuation,
            }),
        };
        self.sink
            .try_emit(RUN_RESUMED, Some(json!({ "run_id": report.run_id })));
        self.emit_decision(&report);
        Ok(report)
    }

    /// Step 5: deterministic completion of a run whose persisted state cannot
    /// be trusted for resumption.
    ///
    /// If an already-achieved result is recoverable (a persisted result field
    /// or a recorded end node), that result is kept; a lost completion flag
    /// never downgrades a success. Otherwise the run finalizes as a failure.
    fn force_finalize(
        &self,
        mut record: RunRecord,
        corruption: CorruptionKind,
    ) -> Result<RecoveryReport, DuraflowError> {
        let recoverable = record
            .result()
            .or_else(|| record.node_store().find_recorded_end().and_then(|n| n.outcome));
        let outcome = recoverable.unwrap_or(RunOutcome::Failure);
        record.force_finalize(outcome)?;
        self.registry.unregister(record.id())?;
        info!(
            run_id = %record.id(),
            corruption = %corruption,
            outcome = %outcome,
            "Run force-finalized"
        );
        let report = RecoveryReport {
            run_id: record.id(),
            decision: RecoveryDecision::ForceFinalized,
            corruption: Some(corruption),
            outcome: Some(outcome),
            resumed: None,
        };
        self.sink.try_emit(
            RUN_FINALIZED,
            Some(json!({ "run_id": report.run_id, "outcome": outcome })),
        );
        self.emit_decision(&report);
        Ok(report)
    }

    /// Reads the sole head from storage and returns it if it is an end node
    /// and the run's terminal invariants hold.
    fn confirmed_terminal_head(&self, record: &RunRecord) -> Option<FlowNode> {
        if !record.graph().open_blocks().is_empty() || record.result().is_none() {
            return None;
        }
        match record.graph().heads() {
            [sole] => record
                .node_store()
                .read(*sole)
                .ok()
                .filter(FlowNode::is_end),
            _ => None,
        }
    }

    /// Scans run directories for records that disagree with their graphs:
    /// in-progress records, and completed records whose terminal shape cannot
    /// be confirmed from storage.
    fn scan_disagreeing_runs(&self) -> Vec<Uuid> {
        let mut found = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return found,
        };
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let Ok(run_id) = Uuid::parse_str(&name) else {
                continue;
            };
            match RunRecord::load(&self.root, run_id) {
                Ok(record) => {
                    if !record.completed() || self.confirmed_terminal_head(&record).is_none() {
                        found.push(run_id);
                    }
                }
                Err(_) => {
                    // A directory with an unreadable record is only a
                    // candidate if the registry claims it was in flight;
                    // otherwise there is nothing asserting it ever ran.
                    if self.registry.contains(run_id) {
                        found.push(run_id);
                    }
                }
            }
        }
        found
    }

    fn emit_decision(&self, report: &RecoveryReport) {
        self.sink.try_emit(
            RECOVERY_DECISION,
            Some(json!({
                "run_id": report.run_id,
                "kind": report.decision,
                "corruption": report.corruption,
                "outcome": report.outcome,
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::DurabilityHint;
    use crate::events::CollectingEventSink;
    use crate::graph::NodeKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        tmp: tempfile::TempDir,
        registry: Arc<InFlightRegistry>,
        sink: Arc<CollectingEventSink>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let registry = Arc::new(InFlightRegistry::open(tmp.path()).unwrap());
            Self {
                tmp,
                registry,
                sink: Arc::new(CollectingEventSink::new()),
            }
        }

        fn coordinator(&self) -> RecoveryCoordinator {
            RecoveryCoordinator::new(
                self.tmp.path(),
                Arc::clone(&self.registry),
                self.sink.clone(),
            )
        }

        fn completed_run(&self) -> RunRecord {
            let mut record = RunRecord::create(
                self.tmp.path(),
                Uuid::new_v4(),
                DurabilityHint::MaxSurvivability,
            )
            .unwrap();
            record.record_step_completed(Some(RunOutcome::Success)).unwrap();
            record.finalize(RunOutcome::Success).unwrap();
            record
        }

        fn parked_run(&self, hint: DurabilityHint) -> RunRecord {
            let mut record =
                RunRecord::create(self.tmp.path(), Uuid::new_v4(), hint).unwrap();
            self.registry
                .register(record.id(), record.id().to_string())
                .unwrap();
            record.record_step_completed(None).unwrap();
            record
                .record_step_suspended(ContinuationState::new(json!({"awaiting": "approval"})))
                .unwrap();
            record
        }
    }

    #[test]
    fn test_already_terminal_is_a_noop() {
        let fx = Fixture::new();
        let record = fx.completed_run();
        let report = fx.coordinator().recover_run(record.id()).unwrap();
        assert_eq!(report.decision, RecoveryDecision::AlreadyTerminal);
        assert_eq!(report.corruption, None);
        assert_eq!(report.outcome, Some(RunOutcome::Success));
    }

    #[test]
    fn test_stale_registry_entry_is_self_healed() {
        let fx = Fixture::new();
        let record = fx.completed_run();
        fx.registry
            .register(record.id(), record.id().to_string())
            .unwrap();
        let report = fx.coordinator().recover_run(record.id()).unwrap();
        assert_eq!(report.decision, RecoveryDecision::AlreadyTerminal);
        assert_eq!(report.corruption, Some(CorruptionKind::RegistryInconsistency));
        assert!(!fx.registry.contains(record.id()));
        // Result untouched.
        let reloaded = RunRecord::load(fx.tmp.path(), record.id()).unwrap();
        assert_eq!(reloaded.result(), Some(RunOutcome::Success));
    }

    #[test]
    fn test_parked_run_resumes_with_continuation() {
        let fx = Fixture::new();
        let record = fx.parked_run(DurabilityHint::MaxSurvivability);
        let report = fx.coordinator().recover_run(record.id()).unwrap();
        assert_eq!(report.decision, RecoveryDecision::Resumed);
        let resumed = report.resumed.unwrap();
        assert_eq!(resumed.continuation.program["awaiting"], "approval");
        assert_eq!(resumed.record.graph().heads(), record.graph().heads());
        // Still in flight.
        assert!(fx.registry.contains(record.id()));
    }

    #[test]
    fn test_missing_node_forces_failure_finalization() {
        let fx = Fixture::new();
        let record = fx.parked_run(DurabilityHint::MaxSurvivability);
        let head = record.graph().heads()[0];
        std::fs::remove_file(
            fx.tmp
                .path()
                .join(record.id().to_string())
                .join(format!("nodes/{head}.json")),
        )
        .unwrap();
        let report = fx.coordinator().recover_run(record.id()).unwrap();
        assert_eq!(report.decision, RecoveryDecision::ForceFinalized);
        assert_eq!(report.corruption, Some(CorruptionKind::GraphCorruption));
        assert_eq!(report.outcome, Some(RunOutcome::Failure));
        assert!(!fx.registry.contains(record.id()));
    }

    #[test]
    fn test_missing_continuation_forces_finalization() {
        let fx = Fixture::new();
        let record = fx.parked_run(DurabilityHint::MaxSurvivability);
        std::fs::remove_file(
            fx.tmp
                .path()
                .join(record.id().to_string())
                .join("program.json"),
        )
        .unwrap();
        let report = fx.coordinator().recover_run(record.id()).unwrap();
        assert_eq!(report.decision, RecoveryDecision::ForceFinalized);
        assert_eq!(
            report.corruption,
            Some(CorruptionKind::ContinuationCorruption)
        );
    }

    #[test]
    fn test_late_flag_mismatch_recovers_success() {
        let fx = Fixture::new();
        // Finish a run, then rewrite its record as if completion was lost.
        let record = fx.completed_run();
        let run_id = record.id();
        // Forge an in-progress record by editing run.json directly.
        let path = fx.tmp.path().join(run_id.to_string()).join("run.json");
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        value["completed"] = json!(false);
        value.as_object_mut().unwrap().remove("result");
        std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();

        let report = fx.coordinator().recover_run(run_id).unwrap();
        assert_eq!(report.decision, RecoveryDecision::ForceFinalized);
        assert_eq!(report.corruption, Some(CorruptionKind::LateFlagMismatch));
        assert_eq!(report.outcome, Some(RunOutcome::Success));
        let healed = RunRecord::load(fx.tmp.path(), run_id).unwrap();
        assert!(healed.completed());
        assert_eq!(healed.result(), Some(RunOutcome::Success));
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let fx = Fixture::new();
        let record = fx.parked_run(DurabilityHint::MaxSurvivability);
        std::fs::remove_file(
            fx.tmp
                .path()
                .join(record.id().to_string())
                .join("program.json"),
        )
        .unwrap();
        let first = fx.coordinator().recover_run(record.id()).unwrap();
        assert_eq!(first.decision, RecoveryDecision::ForceFinalized);
        let second = fx.coordinator().recover_run(record.id()).unwrap();
        assert_eq!(second.decision, RecoveryDecision::AlreadyTerminal);
        assert_eq!(second.outcome, first.outcome);
    }

    #[test]
    fn test_recover_all_discovers_candidates_from_disk() {
        let fx = Fixture::new();
        // A completed run with its end node deleted, absent from the registry.
        let record = fx.completed_run();
        let head = record.graph().heads()[0];
        std::fs::remove_file(
            fx.tmp
                .path()
                .join(record.id().to_string())
                .join(format!("nodes/{head}.json")),
        )
        .unwrap();
        let reports = fx.coordinator().recover_all().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].run_id, record.id());
        assert_eq!(reports[0].decision, RecoveryDecision::ForceFinalized);
        // The recorded success survives; only the bookkeeping is repaired.
        assert_eq!(reports[0].outcome, Some(RunOutcome::Success));
    }

    #[test]
    fn test_inconsistent_block_stack_is_graph_corruption() {
        let fx = Fixture::new();
        let record = fx.parked_run(DurabilityHint::MaxSurvivability);
        let run_id = record.id();
        // Forge a dangling open block into the persisted record.
        let path = fx.tmp.path().join(run_id.to_string()).join("run.json");
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        value["open_blocks"] = json!([999]);
        std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();

        let report = fx.coordinator().recover_run(run_id).unwrap();
        assert_eq!(report.decision, RecoveryDecision::ForceFinalized);
        assert_eq!(report.corruption, Some(CorruptionKind::GraphCorruption));
    }

    #[test]
    fn test_decision_signals_are_emitted() {
        let fx = Fixture::new();
        let record = fx.parked_run(DurabilityHint::MaxSurvivability);
        fx.coordinator().recover_run(record.id()).unwrap();
        let decisions = fx.sink.payloads_of(RECOVERY_DECISION);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0]["kind"], "resumed");
        assert_eq!(fx.sink.payloads_of(RUN_RESUMED).len(), 1);
    }

    #[test]
    fn test_unreadable_record_in_registry_finalizes_as_failure() {
        let fx = Fixture::new();
        let run_id = Uuid::new_v4();
        fx.registry.register(run_id, run_id.to_string()).unwrap();
        let reports = fx.coordinator().recover_all().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].decision, RecoveryDecision::ForceFinalized);
        assert_eq!(reports[0].outcome, Some(RunOutcome::Failure));
        assert!(!fx.registry.contains(run_id));
        // The rebuilt record is durable and terminal.
        let record = RunRecord::load(fx.tmp.path(), run_id).unwrap();
        assert!(record.completed());
        assert!(record.node_store().read(record.graph().heads()[0]).unwrap().is_end());
    }

    #[test]
    fn test_runs_begin_with_start_node() {
        let fx = Fixture::new();
        let record = fx.completed_run();
        assert_eq!(
            record.node_store().read(1).unwrap().kind,
            NodeKind::Start
        );
    }
}

//! # Duraflow
//!
//! Durable persistence and crash recovery for long-running pipeline runs.
//!
//! Duraflow checkpoints a run's execution graph and suspended-program
//! continuation as it makes progress, so that a process restart converges
//! every run to exactly one of two outcomes:
//!
//! - **Resume**: the graph and continuation are intact, and the run picks up
//!   after its last completed node.
//! - **Force-finalize**: the persisted state cannot be trusted, and the run
//!   is deterministically driven to a terminal result, keeping any
//!   already-achieved result it can recover.
//!
//! Three durability policies trade write latency against what survives a
//! crash; a controlled shutdown drains every policy's buffers so that clean
//! restarts resume everything.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use duraflow::prelude::*;
//!
//! let engine = Engine::new(storage_root)?;
//! for report in engine.recover()? {
//!     // Reconciled candidates from the previous process generation.
//! }
//!
//! let run = engine.start_run(DurabilityHint::MaxSurvivability)?;
//! engine.step_completed(run, None)?;
//! engine.step_suspended(run, ContinuationState::new(snapshot))?;
//! // ... external event arrives ...
//! let state = engine.external_event_resumed(run)?;
//! engine.finalize_run(run, RunOutcome::Success)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod durability;
pub mod engine;
pub mod errors;
pub mod events;
pub mod graph;
pub mod recovery;
pub mod registry;
pub mod run;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::durability::DurabilityHint;
    pub use crate::engine::Engine;
    pub use crate::errors::{CorruptionKind, DuraflowError, StoreError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::graph::{
        BlockStack, ExecutionGraph, FlowNode, NodeId, NodeKind, RunOutcome,
    };
    pub use crate::recovery::{
        RecoveryCoordinator, RecoveryDecision, RecoveryReport, ResumedRun,
    };
    pub use crate::registry::InFlightRegistry;
    pub use crate::run::{RunRecord, StateSnapshot};
    pub use crate::store::{ContinuationState, ContinuationStore, ExecutionGraphStore};
}

//! Outbound signals produced by the persistence core.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Signal emitted when a run reaches a terminal result.
pub const RUN_FINALIZED: &str = "run.finalized";
/// Signal emitted when a run is handed back to the step executor.
pub const RUN_RESUMED: &str = "run.resumed";
/// Signal emitted for every recovery decision, for observability.
pub const RECOVERY_DECISION: &str = "recovery.decision";

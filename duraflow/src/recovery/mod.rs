//! Restart-time recovery: reconciles each run's persisted state into an
//! unambiguous resume-or-finalize decision.

mod coordinator;

pub use coordinator::{
    RecoveryCoordinator, RecoveryDecision, RecoveryReport, ResumedRun,
};

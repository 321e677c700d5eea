//! Per-run durability policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How aggressively a run's graph and continuation are flushed to disk.
///
/// Fixed for the run's lifetime, chosen before the first step executes.
/// Under [`DurabilityHint::PerformanceOptimized`] a crash before a buffered
/// flush loses everything since the last checkpoint; that is the documented
/// tradeoff of the policy, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityHint {
    /// Synchronous graph writes on every node and a synchronous continuation
    /// write at every suspension point. A failed continuation write fails the
    /// suspension.
    MaxSurvivability,
    /// Synchronous graph writes; the continuation is written at every
    /// suspension point on a best-effort basis. A failed write is tolerated
    /// and retried at the next flush.
    SurvivableNondurable,
    /// Both graph and continuation buffered in memory, flushed only at
    /// controlled shutdown.
    PerformanceOptimized,
}

impl Default for DurabilityHint {
    fn default() -> Self {
        Self::MaxSurvivability
    }
}

impl fmt::Display for DurabilityHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxSurvivability => write!(f, "max_survivability"),
            Self::SurvivableNondurable => write!(f, "survivable_nondurable"),
            Self::PerformanceOptimized => write!(f, "performance_optimized"),
        }
    }
}

impl DurabilityHint {
    /// Returns true if node appends must reach disk before the step is
    /// considered complete.
    #[must_use]
    pub fn persists_nodes_synchronously(&self) -> bool {
        !matches!(self, Self::PerformanceOptimized)
    }

    /// Returns true if the continuation snapshot is written to disk before
    /// the run is considered parked at a suspension point.
    #[must_use]
    pub fn persists_continuation_on_suspend(&self) -> bool {
        !matches!(self, Self::PerformanceOptimized)
    }

    /// Returns true if a failed continuation write at suspension is tolerated
    /// (logged, kept in memory for the next flush) rather than failing the
    /// suspension.
    #[must_use]
    pub fn tolerates_continuation_write_failure(&self) -> bool {
        matches!(self, Self::SurvivableNondurable)
    }

    /// Returns true if the run record itself is saved on every mutation
    /// rather than only at flush.
    #[must_use]
    pub fn persists_record_synchronously(&self) -> bool {
        !matches!(self, Self::PerformanceOptimized)
    }
}

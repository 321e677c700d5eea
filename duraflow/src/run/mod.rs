//! The run record: owner of one run's execution graph, continuation slot,
//! completion flag and result.

mod record;
mod snapshot;

pub use record::RunRecord;
pub use snapshot::StateSnapshot;

//! Durable storage for execution graphs and continuation snapshots.

mod continuation;
mod layout;
mod node_store;

pub use continuation::{ContinuationState, ContinuationStore};
pub use layout::{RunLayout, CONTINUATION_FILE, NODES_DIR, RUN_RECORD_FILE};
pub use node_store::ExecutionGraphStore;

use crate::errors::StoreError;
use serde::Serialize;
use std::path::Path;

/// Writes a serializable value to `path` crash-safely.
///
/// The value is serialized to a sibling temporary file which is then renamed
/// over the target, so a reader never observes a partial record.
pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, payload)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_atomic_replaces_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("record.json");
        write_atomic(&path, &json!({"v": 1})).unwrap();
        write_atomic(&path, &json!({"v": 2})).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["v"], 2);
        assert!(!path.with_extension("json.tmp").exists());
    }
}

//! On-disk layout for one run's persisted state.

use crate::graph::NodeId;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Filename of the run record inside a run directory.
pub const RUN_RECORD_FILE: &str = "run.json";
/// Name of the node storage directory inside a run directory.
pub const NODES_DIR: &str = "nodes";
/// Filename of the continuation snapshot inside a run directory.
pub const CONTINUATION_FILE: &str = "program.json";

/// Resolves the file locations for one run.
///
/// Layout under the storage root:
///
/// ```text
/// <root>/<run_id>/run.json          run record (flags, result, frontier)
/// <root>/<run_id>/nodes/<id>.json   one record per flow node
/// <root>/<run_id>/program.json      continuation snapshot
/// ```
///
/// Presence or absence of these files is itself the corruption signal the
/// recovery layer consumes; there is no separate checksum layer.
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_dir: PathBuf,
}

impl RunLayout {
    /// Creates a layout for a run under the given storage root.
    #[must_use]
    pub fn new(root: &Path, run_id: Uuid) -> Self {
        Self {
            run_dir: root.join(run_id.to_string()),
        }
    }

    /// The run's directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Path of the run record file.
    #[must_use]
    pub fn record_path(&self) -> PathBuf {
        self.run_dir.join(RUN_RECORD_FILE)
    }

    /// The node storage directory.
    #[must_use]
    pub fn nodes_dir(&self) -> PathBuf {
        self.run_dir.join(NODES_DIR)
    }

    /// Path of one node record file.
    #[must_use]
    pub fn node_path(&self, id: NodeId) -> PathBuf {
        self.nodes_dir().join(format!("{id}.json"))
    }

    /// Path of the continuation snapshot file.
    #[must_use]
    pub fn continuation_path(&self) -> PathBuf {
        self.run_dir.join(CONTINUATION_FILE)
    }

    /// Creates the run directory and node storage directory.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.nodes_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let id = Uuid::new_v4();
        let layout = RunLayout::new(Path::new("/data/runs"), id);
        assert_eq!(layout.record_path(), layout.run_dir().join("run.json"));
        assert_eq!(layout.node_path(7), layout.run_dir().join("nodes/7.json"));
        assert_eq!(
            layout.continuation_path(),
            layout.run_dir().join("program.json")
        );
        assert!(layout.run_dir().ends_with(id.to_string()));
    }

    #[test]
    fn test_ensure_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(tmp.path(), Uuid::new_v4());
        layout.ensure_dirs().unwrap();
        assert!(layout.nodes_dir().is_dir());
    }
}

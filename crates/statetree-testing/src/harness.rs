use serde_json::Value as Json;
use statetree_core::{encode_changes, OptimizedLog, RootNode};

use crate::mirror::{project, ClientMirror, MirrorError};

/// A tree and a client mirror kept in step through encoded commits.
pub struct SyncHarness {
    root: RootNode,
    mirror: ClientMirror,
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncHarness {
    pub fn new() -> Self {
        Self::with_root(RootNode::new())
    }

    /// `root` must not have committed anything yet.
    pub fn with_root(root: RootNode) -> Self {
        Self {
            root,
            mirror: ClientMirror::new(),
        }
    }

    pub fn root(&self) -> &RootNode {
        &self.root
    }

    pub fn mirror(&self) -> &ClientMirror {
        &self.mirror
    }

    /// Commits, applies the encoded changes to the mirror and returns them.
    pub fn sync(&mut self) -> Result<Json, MirrorError> {
        let log = self.root.collect_changes();
        self.apply(&log)
    }

    /// Encodes already collected `changes` and applies it to the mirror.
    pub fn apply(&mut self, changes: &OptimizedLog) -> Result<Json, MirrorError> {
        let records = encode_changes(changes, |node| self.root.id_of(node))
            .map_err(|error| MirrorError::Malformed(error.to_string()))?;
        self.mirror.apply_json(&records)?;
        log::debug!(
            "synced {} records, mirror holds {} nodes",
            records.as_array().map_or(0, Vec::len),
            self.mirror.known_nodes()
        );
        Ok(records)
    }

    pub fn in_sync(&self) -> bool {
        self.mirror.tree() == project(&self.root)
    }

    #[track_caller]
    pub fn assert_in_sync(&self) {
        assert_eq!(
            self.mirror.tree(),
            project(&self.root),
            "client mirror diverged from the server tree"
        );
    }
}

use statetree_core::{NodeChange, NodeChangeVisitor, NodeId, NodeRef, StateNode};

/// One `visit_node` call.
#[derive(Clone, Debug, PartialEq)]
pub struct Visit {
    pub node: NodeRef,
    /// Id of the node when it was visited.
    pub id: NodeId,
    pub changes: Vec<NodeChange>,
}

/// Commit visitor that keeps everything it is shown.
#[derive(Clone, Debug, Default)]
pub struct RecordingVisitor {
    visits: Vec<Visit>,
}

impl RecordingVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    /// All changes delivered for `node`, across visits.
    pub fn changes_for(&self, node: NodeRef) -> Vec<NodeChange> {
        self.visits
            .iter()
            .filter(|visit| visit.node == node)
            .flat_map(|visit| visit.changes.iter().cloned())
            .collect()
    }

    pub fn visited(&self, node: NodeRef) -> bool {
        self.visits.iter().any(|visit| visit.node == node)
    }

    pub fn take(&mut self) -> Vec<Visit> {
        std::mem::take(&mut self.visits)
    }
}

impl NodeChangeVisitor for RecordingVisitor {
    fn visit_node(&mut self, node: &StateNode, changes: &[NodeChange]) {
        self.visits.push(Visit {
            node: node.node_ref(),
            id: node.id(),
            changes: changes.to_vec(),
        });
    }
}

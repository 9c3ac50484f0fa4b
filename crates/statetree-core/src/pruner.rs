use crate::change::NodeChange;
use crate::collections::map::HashSet;
use crate::optimizer::OptimizedLog;
use crate::value::{NodeRef, Value};

/// Drops everything the client must not see: contents of server-only nodes,
/// changes under server-only keys and computed values of nodes marked with
/// [`StateNode::mark_computed_server_only`](crate::StateNode::mark_computed_server_only).
///
/// A new server-only node that a visible change refers to keeps an empty
/// group, so the client still learns its id. Groups of existing nodes left
/// without changes are dropped.
pub fn prune_server_only(mut log: OptimizedLog) -> OptimizedLog {
    let before = log.change_count();
    for entry in &mut log.nodes {
        if entry.server_only {
            entry.changes.clear();
            continue;
        }
        let hide_computed = entry.computed_server_only;
        entry
            .changes
            .retain(|change| is_visible(change) && !(hide_computed && change.is_computed()));
    }
    let referenced: HashSet<NodeRef> = log
        .nodes
        .iter()
        .filter(|entry| !entry.server_only)
        .flat_map(|entry| entry.changes.iter())
        .flat_map(|change| change.new_values().iter().filter_map(Value::as_node))
        .collect();
    log.nodes.retain(|entry| {
        if entry.server_only {
            entry.created && referenced.contains(&entry.node)
        } else {
            entry.created || !entry.changes.is_empty()
        }
    });
    log::trace!("pruned {} server-only changes", before - log.change_count());
    log
}

fn is_visible(change: &NodeChange) -> bool {
    change.key().map_or(true, |key| !key.is_server_only())
}

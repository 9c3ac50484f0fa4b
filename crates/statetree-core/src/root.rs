use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use crate::change::{NodeChange, NodeChangeVisitor};
use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::log_builder::{ChangeLog, TransactionLogBuilder};
use crate::node::{ChangeListener, StateNode};
use crate::optimizer::{OptimizedLog, TransactionLogOptimizer};
use crate::pruner::prune_server_only;
use crate::schema::Schema;
use crate::tree::{TreeInner, ROOT};
use crate::value::{NodeId, NodeRef, UNATTACHED};

/// Root of a state tree.
///
/// The root owns every node created through it, the id table of attached
/// nodes and the open transaction. It dereferences to its own [`StateNode`].
#[derive(Clone)]
pub struct RootNode {
    node: StateNode,
}

impl RootNode {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        let tree = TreeInner::new(config);
        log::trace!("created state tree {:?}", tree.tree);
        Self {
            node: tree.handle(ROOT),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.tree().config
    }

    fn tree(&self) -> &Rc<TreeInner> {
        self.node.inner()
    }

    /// Creates a fresh, unattached node owned by this tree.
    pub fn create_node(&self) -> StateNode {
        self.tree().create(None)
    }

    pub fn create_node_with_schema(&self, schema: Schema) -> StateNode {
        self.tree().create(Some(schema))
    }

    /// Attached node currently known to the client by `id`.
    pub fn node_by_id(&self, id: NodeId) -> Option<StateNode> {
        if id == UNATTACHED {
            return None;
        }
        let handle = self.tree().arena.borrow().ids.get(&id).copied()?;
        Some(self.tree().handle(handle))
    }

    pub fn node(&self, node: NodeRef) -> Option<StateNode> {
        self.node.resolve(node)
    }

    /// Current client id of `node`; `0` for detached or foreign nodes.
    pub fn id_of(&self, node: NodeRef) -> NodeId {
        match self.tree().resolve(node) {
            Some(handle) => self.tree().arena.borrow().node(handle).id,
            None => UNATTACHED,
        }
    }

    /// Whether the open transaction holds anything a commit would deliver.
    pub fn has_pending_changes(&self) -> bool {
        !self.tree().txn.borrow().is_empty() || !self.tree().lazy_pending.borrow().is_empty()
    }

    /// Registers `visitor` for every future commit until the returned
    /// registration is dropped or cancelled.
    pub fn add_commit_visitor<V>(&self, visitor: Rc<RefCell<V>>) -> CommitVisitorRegistration
    where
        V: NodeChangeVisitor + 'static,
    {
        let id = self.tree().add_visitor(visitor);
        CommitVisitorRegistration {
            tree: Rc::downgrade(self.tree()),
            id: Some(id),
        }
    }

    pub fn commit(&self) {
        self.commit_rounds(None);
    }

    /// Commits, also delivering the changes of every round to `visitor`.
    pub fn commit_with(&self, visitor: &mut dyn NodeChangeVisitor) {
        self.commit_rounds(Some(visitor));
    }

    fn commit_rounds(&self, mut extra: Option<&mut dyn NodeChangeVisitor>) {
        let tree = self.tree();
        let _guard = CommitGuard::enter(tree);
        let mut round = 0;
        loop {
            tree.send_all_pending();
            tree.flush_computed(None);
            let txn = tree.take_transaction();
            if txn.is_empty() {
                break;
            }
            round += 1;
            if round > tree.config.max_commit_rounds {
                panic!(
                    "commit did not settle after {} rounds; change listeners keep mutating the tree",
                    tree.config.max_commit_rounds
                );
            }
            let changes: Vec<(StateNode, Vec<NodeChange>)> = txn
                .changes
                .into_iter()
                .map(|(handle, changes)| (tree.handle(handle), changes))
                .collect();
            log::trace!("commit round {round}: {} touched nodes", changes.len());

            let visitors: Vec<_> = tree
                .visitors
                .borrow()
                .iter()
                .map(|(_, visitor)| Rc::clone(visitor))
                .collect();
            for visitor in visitors {
                let mut visitor = visitor.borrow_mut();
                for (node, node_changes) in &changes {
                    visitor.visit_node(node, node_changes);
                }
            }
            if let Some(visitor) = extra.as_mut() {
                for (node, node_changes) in &changes {
                    visitor.visit_node(node, node_changes);
                }
            }
            // Listeners added while this round is delivered start with the next one.
            let listeners: Vec<Vec<ChangeListener>> = {
                let registered = tree.listeners.borrow();
                changes
                    .iter()
                    .map(|(node, _)| {
                        registered
                            .get(&node.handle())
                            .map(|listeners| {
                                listeners
                                    .iter()
                                    .map(|(_, listener)| Rc::clone(listener))
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            };
            for ((node, node_changes), listeners) in changes.iter().zip(listeners) {
                for listener in listeners {
                    listener(node, node_changes);
                }
            }
        }
    }

    /// Discards every change made since the last commit.
    pub fn rollback(&self) -> Result<(), TreeError> {
        self.tree().ensure_mutable()?;
        self.tree().rollback();
        Ok(())
    }

    /// Commits and returns the raw per-node change log.
    pub fn collect_change_log(&self) -> ChangeLog {
        let mut builder = TransactionLogBuilder::new();
        self.commit_with(&mut builder);
        builder.build()
    }

    /// Commits and returns the optimized, pruned log for the client.
    pub fn collect_changes(&self) -> OptimizedLog {
        let log = self.collect_change_log();
        let config = self.config();
        let optimized = TransactionLogOptimizer::new(config.optimizer.clone()).optimize(&log);
        if config.prune_server_only {
            prune_server_only(optimized)
        } else {
            optimized
        }
    }

    /// Commits and encodes the optimized log as JSON change records.
    pub fn encode_changes(&self) -> Result<serde_json::Value, serde_json::Error> {
        let log = self.collect_changes();
        crate::wire::encode_changes(&log, |node| self.id_of(node))
    }
}

impl StateNode {
    /// Root of the tree this node belongs to.
    pub fn root(&self) -> RootNode {
        RootNode {
            node: self.inner().handle(ROOT),
        }
    }
}

impl Default for RootNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for RootNode {
    type Target = StateNode;

    fn deref(&self) -> &StateNode {
        &self.node
    }
}

impl fmt::Debug for RootNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootNode")
            .field("tree", &self.tree().tree)
            .field("nodes", &self.tree().arena.borrow().nodes.len())
            .finish()
    }
}

/// Keeps a commit visitor registered while alive.
pub struct CommitVisitorRegistration {
    tree: Weak<TreeInner>,
    id: Option<usize>,
}

impl CommitVisitorRegistration {
    pub fn cancel(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if let (Some(id), Some(tree)) = (self.id.take(), self.tree.upgrade()) {
            tree.remove_visitor(id);
        }
    }
}

impl Drop for CommitVisitorRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

struct CommitGuard<'a> {
    tree: &'a TreeInner,
}

impl<'a> CommitGuard<'a> {
    fn enter(tree: &'a TreeInner) -> Self {
        let depth = tree.commit_depth.get();
        assert!(depth == 0, "commit called while a commit is in progress");
        assert!(
            tree.eval_stack.borrow().is_empty(),
            "commit called from inside a computed property"
        );
        tree.commit_depth.set(depth + 1);
        Self { tree }
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        let depth = self.tree.commit_depth.get();
        debug_assert!(depth > 0, "commit depth underflow");
        self.tree.commit_depth.set(depth.saturating_sub(1));
    }
}

#[cfg(test)]
#[path = "tests/root_tests.rs"]
mod tests;

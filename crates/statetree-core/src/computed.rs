//! Computed properties with automatic dependency capture.
//!
//! While a supplier runs, its frame sits on the tree's evaluation stack and
//! every `get`/`contains_key` records a `(node, key)` read into that frame.
//! Once the supplier returns, the reads become edges of the dependency index
//! (source → dependents). A write to a source drops the memoized value of
//! every transitive dependent and queues it for flushing, so the next read or
//! the next commit re-evaluates it.
//!
//! The whole [`ComputedState`] is snapshotted the first time a transaction
//! touches it, which makes definitions, memos and edges roll back together
//! with the stored values they were derived from.

use std::rc::Rc;

use crate::change::{NodeChange, PutChange, RemoveChange};
use crate::collections::map::{HashMap, HashSet};
use crate::collections::ordered::IndexMap;
use crate::key::Key;
use crate::node::StateNode;
use crate::tree::TreeInner;
use crate::value::{SlotValue, Value, UNATTACHED};

pub(crate) type Supplier = Rc<dyn Fn(&StateNode) -> Option<Value>>;

/// A computed property or a stored slot, addressed by node handle and key.
pub(crate) type Target = (u32, Key);

#[derive(Clone, Debug)]
pub(crate) enum Pending {
    /// Defined but never evaluated.
    Initial,
    /// Invalidated; holds the value the client last saw.
    Stale(Option<Value>),
}

#[derive(Clone, Default)]
pub(crate) struct ComputedState {
    definitions: HashMap<Target, Supplier>,
    by_node: HashMap<u32, Vec<Key>>,
    memo: HashMap<Target, Option<Value>>,
    dependents: HashMap<Target, HashSet<Target>>,
    sources: HashMap<Target, HashSet<Target>>,
    pending: IndexMap<Target, Pending>,
}

impl ComputedState {
    pub(crate) fn define(&mut self, target: Target, supplier: Supplier) {
        self.by_node
            .entry(target.0)
            .or_default()
            .push(target.1.clone());
        self.pending.insert(target.clone(), Pending::Initial);
        self.definitions.insert(target, supplier);
    }

    pub(crate) fn is_computed(&self, target: &Target) -> bool {
        self.definitions.contains_key(target)
    }

    pub(crate) fn keys_of(&self, handle: u32) -> &[Key] {
        self.by_node.get(&handle).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn memo(&self, target: &Target) -> Option<&Option<Value>> {
        self.memo.get(target)
    }

    fn supplier(&self, target: &Target) -> Option<Supplier> {
        self.definitions.get(target).cloned()
    }

    pub(crate) fn has_dependents(&self, source: &Target) -> bool {
        self.dependents
            .get(source)
            .is_some_and(|dependents| !dependents.is_empty())
    }

    pub(crate) fn pending_for(&self, handle: Option<u32>) -> Vec<Target> {
        self.pending
            .keys()
            .filter(|(node, _)| handle.map_or(true, |handle| handle == *node))
            .cloned()
            .collect()
    }

    /// Memoizes `value` for `target`, replacing its recorded sources.
    /// Returns the flush state the target was in, if any.
    fn store(
        &mut self,
        target: Target,
        value: Option<Value>,
        reads: HashSet<Target>,
    ) -> Option<Pending> {
        if let Some(previous) = self.sources.remove(&target) {
            for source in previous {
                if let Some(dependents) = self.dependents.get_mut(&source) {
                    dependents.remove(&target);
                }
            }
        }
        for source in &reads {
            self.dependents
                .entry(source.clone())
                .or_default()
                .insert(target.clone());
        }
        self.sources.insert(target.clone(), reads);
        self.memo.insert(target.clone(), value);
        self.pending.shift_remove(&target)
    }

    /// Drops memos of everything depending on `source`, transitively.
    fn invalidate(&mut self, source: &Target) -> usize {
        let mut queue: Vec<Target> = self
            .dependents
            .get(source)
            .map(|dependents| dependents.iter().cloned().collect())
            .unwrap_or_default();
        let mut invalidated = 0;
        while let Some(target) = queue.pop() {
            let Some(old) = self.memo.remove(&target) else {
                continue;
            };
            invalidated += 1;
            self.pending
                .entry(target.clone())
                .or_insert(Pending::Stale(old));
            if let Some(dependents) = self.dependents.get(&target) {
                queue.extend(dependents.iter().cloned());
            }
        }
        invalidated
    }
}

/// Reads captured while one supplier runs.
pub(crate) struct Frame {
    target: Target,
    reads: HashSet<Target>,
}

impl TreeInner {
    /// Runs `f` on the computed state, snapshotting it for rollback first.
    fn with_computed<R>(&self, f: impl FnOnce(&mut ComputedState) -> R) -> R {
        {
            let mut txn = self.txn.borrow_mut();
            if txn.computed.is_none() {
                txn.computed = Some(self.computed.borrow().clone());
            }
        }
        f(&mut self.computed.borrow_mut())
    }

    pub(crate) fn is_computed(&self, handle: u32, key: &Key) -> bool {
        self.computed
            .borrow()
            .is_computed(&(handle, key.clone()))
    }

    pub(crate) fn define_computed(&self, handle: u32, key: Key, supplier: Supplier) {
        self.with_computed(|state| state.define((handle, key), supplier));
    }

    pub(crate) fn record_read(&self, handle: u32, key: &Key) {
        if let Some(frame) = self.eval_stack.borrow_mut().last_mut() {
            frame.reads.insert((handle, key.clone()));
        }
    }

    /// Invalidates computed properties that read `(handle, key)`.
    pub(crate) fn invalidate(&self, handle: u32, key: &Key) {
        let source = (handle, key.clone());
        if !self.computed.borrow().has_dependents(&source) {
            return;
        }
        let invalidated = self.with_computed(|state| state.invalidate(&source));
        if invalidated > 0 {
            log::trace!("write to {key} on node {handle} invalidated {invalidated} computed values");
        }
    }

    /// Returns the memoized value of a computed property, evaluating it when
    /// needed.
    pub(crate) fn evaluate(self: &Rc<Self>, handle: u32, key: &Key) -> Option<Value> {
        let target = (handle, key.clone());
        let supplier = {
            let state = self.computed.borrow();
            if let Some(value) = state.memo(&target) {
                return value.clone();
            }
            state.supplier(&target)?
        };
        if self
            .eval_stack
            .borrow()
            .iter()
            .any(|frame| frame.target == target)
        {
            log::warn!("computed property {key} on node {handle} depends on itself");
            return None;
        }

        self.eval_stack.borrow_mut().push(Frame {
            target: target.clone(),
            reads: HashSet::default(),
        });
        let node = self.handle(handle);
        let value = supplier(&node);
        let frame = self.eval_stack.borrow_mut().pop();
        let reads = frame.map(|frame| frame.reads).unwrap_or_default();

        let previous = self.with_computed(|state| state.store(target, value.clone(), reads));
        if let Some(Pending::Stale(old)) = &previous {
            if *old == value {
                return value;
            }
        }
        let mut txn = self.txn.borrow_mut();
        if let Some(Pending::Stale(Some(old))) = previous {
            txn.log(
                handle,
                NodeChange::Remove(RemoveChange::computed(key.clone(), SlotValue::Value(old))),
            );
        }
        if let Some(value) = &value {
            txn.log(
                handle,
                NodeChange::Put(PutChange {
                    key: key.clone(),
                    value: SlotValue::Value(value.clone()),
                    computed: true,
                }),
            );
        }
        value
    }

    /// Re-evaluates invalidated computed properties of `handle`, or of every
    /// attached node when `None`.
    pub(crate) fn flush_computed(self: &Rc<Self>, handle: Option<u32>) {
        let pending = self.computed.borrow().pending_for(handle);
        for (node, key) in pending {
            if handle.is_none() && self.arena.borrow().node(node).id == UNATTACHED {
                continue;
            }
            self.evaluate(node, &key);
        }
    }

    /// Current memo for `(handle, key)` without evaluating.
    pub(crate) fn peek_computed(&self, handle: u32, key: &Key) -> Option<Value> {
        self.computed
            .borrow()
            .memo(&(handle, key.clone()))
            .cloned()
            .flatten()
    }
}

#![forbid(unsafe_code)]

//! The transaction manager.
//!
//! A [`Container`] owns every observable value, every observer and the
//! dependency graph between them. All mutation happens inside
//! [`Container::transaction`]; the root transaction of a nested stack is the
//! atomicity boundary.
//!
//! # Design
//!
//! State lives behind one `RefCell`. The borrow is never held while user
//! code runs: observer functions are taken out of their slot before the
//! call and put back after it, and listeners are handled the same way. User
//! functions receive `&Container` explicitly, so handles never capture the
//! container and no reference cycles form.
//!
//! Commit order for a root transaction:
//!
//! 1. close the transaction and drop the rollback journal,
//! 2. deliver each root's migration to its listeners,
//! 3. propagate: re-run stale computations that have an active reader in
//!    topological order, then run stale reactions.
//!
//! The transaction is closed before delivery and propagation, so listeners
//! and reactions may open new root transactions of their own.
//!
//! # Invariants
//!
//! 1. Writes succeed only inside a transaction and outside computation
//!    runs.
//! 2. After a rolled-back transaction every value reads back its
//!    pre-transaction snapshot with the same UIDs, and no reaction has run.
//! 3. A computation runs before any reader that depends on it within one
//!    propagation, and at most once per propagation pass.
//! 4. A memoized computation with no eager reader downstream is not run by
//!    propagation; it recomputes on its next `get`.
//!
//! # Failure Modes
//!
//! - An error inside the root transaction rolls everything back and is
//!   returned unchanged.
//! - An observer failing during propagation is disposed. The remaining
//!   observers still run; the first failure is returned as
//!   [`Error::ObserverFailed`]. The committed data is kept.
//! - Propagation that does not settle within
//!   [`ContainerConfig::max_propagation_passes`] fails with
//!   [`Error::PropagationLimit`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use canopy_core::{
    DependencyGraph, Error, Migration, Operation, Path, PathTracker, ReadPath, Result, TxId, Uid,
};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::{debug, debug_span, trace, warn};

use crate::config::ContainerConfig;
use crate::observer::{Body, Computed, JobOutput, ObserverKind, ObserverSlot, Reaction, When};
use crate::store::{Applied, Store};
use crate::value_ref::ValueRef;

/// Handle of a registered migration listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

type ListenerFn = Box<dyn FnMut(&Migration)>;

struct Listener {
    root: Uid,
    callback: Option<ListenerFn>,
}

/// Paths changed under one source: a root value, a computed tree or a
/// boxed computation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Change {
    pub(crate) source: Uid,
    pub(crate) paths: Vec<Path>,
}

/// Effect of one observer run on downstream readers.
pub(crate) struct Output {
    change: Change,
    migration: Option<(Uid, Migration)>,
}

pub(crate) enum RunOutcome {
    /// Not stale, or a reaction already on the stack.
    Fresh,
    Ran(Option<Output>),
    /// A `when` predicate came true.
    Fired,
}

#[derive(Debug, Default)]
struct ChangeSet {
    changes: IndexMap<Uid, Vec<Path>>,
    migrations: IndexMap<Uid, Migration>,
}

impl ChangeSet {
    fn touch(&mut self, source: Uid, paths: impl IntoIterator<Item = Path>) {
        let known = self.changes.entry(source).or_default();
        for path in paths {
            if !known.contains(&path) {
                known.push(path);
            }
        }
    }

    fn record(&mut self, root: Uid, applied: Applied) {
        self.touch(root, applied.affected);
        let migration = self.migrations.entry(root).or_default();
        for (forward, backward) in applied.pairs {
            migration.push(forward, backward);
        }
    }

    fn change_count(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }
}

/// What a memoized computation looked like before its first run inside a
/// transaction.
struct RunBackup {
    dependencies: Vec<ReadPath>,
    sources: Vec<Uid>,
    value: Option<Value>,
}

struct Transaction {
    id: TxId,
    pending: ChangeSet,
    /// Memoized computations re-run while the transaction was open, keyed
    /// by observer.
    ran: HashMap<Uid, RunBackup>,
    /// Roots removed by the transaction; their graph nodes go at commit.
    dropped_roots: Vec<Uid>,
    roots_backup: IndexSet<Uid>,
    references_backup: HashMap<String, Uid>,
}

struct State {
    store: Store,
    graph: DependencyGraph,
    spy: PathTracker,
    observers: HashMap<Uid, ObserverSlot>,
    roots: IndexSet<Uid>,
    references: HashMap<String, Uid>,
    listeners: IndexMap<ListenerId, Listener>,
    tx: Option<Transaction>,
    next_tx: u64,
    next_listener: u64,
    computing: usize,
}

impl State {
    fn new() -> Self {
        Self {
            store: Store::new(),
            graph: DependencyGraph::new(),
            spy: PathTracker::new(),
            observers: HashMap::new(),
            roots: IndexSet::new(),
            references: HashMap::new(),
            listeners: IndexMap::new(),
            tx: None,
            next_tx: 0,
            next_listener: 0,
            computing: 0,
        }
    }

    fn is_writable(&self) -> bool {
        self.tx.is_some() && self.computing == 0
    }

    /// Log applied operations against `root` and invalidate memoized
    /// readers right away, so a `get` later in the same transaction sees
    /// fresh data.
    fn record(&mut self, root: Uid, applied: Applied) {
        if applied.is_empty() {
            return;
        }
        self.invalidate_memoized(root, &applied.affected);
        if let Some(tx) = self.tx.as_mut() {
            tx.pending.record(root, applied);
        }
    }

    /// Mark memoized readers of `paths` stale, following computation
    /// outputs transitively. Eager observers are left for propagation.
    fn invalidate_memoized(&mut self, source: Uid, paths: &[Path]) {
        let mut queue = VecDeque::from([(source, paths.to_vec())]);
        let mut seen = HashSet::new();
        while let Some((source, paths)) = queue.pop_front() {
            let readers: Vec<Uid> = self.graph.successors(source).collect();
            for reader in readers {
                let Some(slot) = self.observers.get_mut(&reader) else {
                    continue;
                };
                if !slot.kind().is_memoized() || !slot.reads_affected(source, &paths) {
                    continue;
                }
                slot.stale = true;
                if seen.insert(reader) {
                    queue.push_back((slot.output(reader), vec![Path::root()]));
                }
            }
        }
    }

    /// Mark every reader of `paths` stale, queueing eager ones.
    fn mark_dependents(&mut self, source: Uid, paths: &[Path], eager: &mut IndexSet<Uid>) {
        let readers: Vec<Uid> = self.graph.successors(source).collect();
        for reader in readers {
            let Some(slot) = self.observers.get_mut(&reader) else {
                continue;
            };
            if !slot.reads_affected(source, paths) {
                continue;
            }
            slot.stale = true;
            if slot.kind().is_eager() {
                eager.insert(reader);
            }
        }
    }

    /// Whether an eager observer sits anywhere downstream of `node`.
    fn is_observed(&self, node: Uid) -> bool {
        let mut seen = HashSet::from([node]);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            for reader in self.graph.successors(current) {
                if self
                    .observers
                    .get(&reader)
                    .is_some_and(|slot| slot.kind().is_eager())
                {
                    return true;
                }
                if seen.insert(reader) {
                    stack.push(reader);
                }
            }
        }
        false
    }

    fn rebuild_edges(&mut self, observer: Uid, reads: &[ReadPath]) -> Result<()> {
        self.graph.remove_edges_to(observer);
        for read in reads {
            if read.source != observer && self.graph.contains_node(read.source) {
                self.graph.insert_edge(read.source, observer)?;
            }
        }
        Ok(())
    }

    /// Adopt or reconcile the value produced by a computation.
    fn commit_value(&mut self, id: Uid, value: Value) -> Result<RunOutcome> {
        let slot = self.observers.get_mut(&id).ok_or(Error::Disposed(id))?;
        let change = match &mut slot.body {
            Body::Computed { value: current, .. } => {
                let changed = current.as_ref().is_some_and(|old| *old != value);
                *current = Some(value);
                if !changed {
                    return Ok(RunOutcome::Ran(None));
                }
                Output {
                    change: Change {
                        source: id,
                        paths: vec![Path::root()],
                    },
                    migration: None,
                }
            }
            Body::Observable { tree, .. } => match *tree {
                None => {
                    let root = self.store.build(&value, None);
                    self.store.set_owner(root, id);
                    *tree = Some(root);
                    self.roots.insert(root);
                    self.graph.insert_node(root);
                    self.graph.insert_edge(id, root)?;
                    return Ok(RunOutcome::Ran(None));
                }
                Some(root) => {
                    let mut applied = Applied::default();
                    self.store
                        .reconcile(root, &Path::root(), &value, &mut applied)?;
                    if applied.is_empty() {
                        return Ok(RunOutcome::Ran(None));
                    }
                    let mut migration = Migration::new();
                    for (forward, backward) in &applied.pairs {
                        migration.push(forward.clone(), backward.clone());
                    }
                    if self.tx.is_some() {
                        self.record(root, applied);
                        return Ok(RunOutcome::Ran(None));
                    }
                    Output {
                        change: Change {
                            source: root,
                            paths: applied.affected,
                        },
                        migration: Some((root, migration)),
                    }
                }
            },
            Body::Reaction(_) | Body::When { .. } => return Ok(RunOutcome::Ran(None)),
        };
        if let Some(tx) = self.tx.as_mut() {
            tx.pending.touch(change.change.source, change.change.paths.clone());
            self.invalidate_memoized(change.change.source, &change.change.paths);
            return Ok(RunOutcome::Ran(None));
        }
        Ok(RunOutcome::Ran(Some(change)))
    }

    /// Remove an observer and everything it owns. Returns the slot so the
    /// caller can drop user closures after releasing the borrow.
    fn remove_observer(&mut self, id: Uid) -> Option<ObserverSlot> {
        let mut slot = self.observers.remove(&id)?;
        slot.stale = true;
        self.spy.detach(id);
        self.graph.remove_node(id);
        if let Some(tree) = slot.body.tree() {
            self.store.kill(tree);
            self.roots.shift_remove(&tree);
            self.graph.remove_node(tree);
        }
        self.store.uids_mut().remove_uid(id);
        Some(slot)
    }
}

/// Reactive-state container: values, observers, graph and transactions.
pub struct Container {
    state: RefCell<State>,
    config: ContainerConfig,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Container");
        out.field("label", &self.config.label);
        if let Ok(state) = self.state.try_borrow() {
            out.field("roots", &state.roots.len())
                .field("observers", &state.observers.len())
                .field("in_transaction", &state.tx.is_some());
        }
        out.finish_non_exhaustive()
    }
}

impl Container {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ContainerConfig) -> Self {
        Self {
            state: RefCell::new(State::new()),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Drop every value, observer, listener and reference. UIDs handed out
    /// before the clear are never reused.
    pub fn clear(&self) {
        let (observers, listeners) = {
            let mut st = self.state.borrow_mut();
            st.store.clear();
            st.graph.clear();
            st.spy.clear();
            st.roots.clear();
            st.references.clear();
            st.tx = None;
            st.computing = 0;
            (
                std::mem::take(&mut st.observers),
                std::mem::take(&mut st.listeners),
            )
        };
        debug!(
            message = "container.cleared",
            container = %self.config.label,
            observers = observers.len(),
            listeners = listeners.len()
        );
    }

    // ─── Values ─────────────────────────────────────────────────────────

    /// Build a new root value tree.
    pub fn create_root(&self, value: Value) -> ValueRef {
        let mut st = self.state.borrow_mut();
        let root = st.store.build(&value, None);
        st.roots.insert(root);
        st.graph.insert_node(root);
        ValueRef::new(root)
    }

    /// Remove a root value tree inside the open transaction. Its readers
    /// are re-run after the commit; the graph node goes once they have.
    ///
    /// # Errors
    ///
    /// [`Error::ComputationInProgress`] from inside a computation,
    /// [`Error::NotWritable`] outside a transaction, [`Error::ReadOnly`] for
    /// a computed tree, [`Error::UnknownUid`] if the value is not a live
    /// root.
    pub fn remove_root(&self, root: ValueRef) -> Result<()> {
        let uid = root.uid();
        let mut st = self.state.borrow_mut();
        if st.computing > 0 {
            return Err(Error::ComputationInProgress);
        }
        if st.tx.is_none() {
            return Err(Error::NotWritable(uid));
        }
        if !st.roots.contains(&uid) {
            return Err(Error::UnknownUid(uid));
        }
        if st.store.owner(uid).is_some() {
            return Err(Error::ReadOnly(uid));
        }
        st.invalidate_memoized(uid, &[Path::root()]);
        st.store.kill(uid);
        st.roots.shift_remove(&uid);
        if let Some(tx) = st.tx.as_mut() {
            tx.pending.touch(uid, [Path::root()]);
            tx.dropped_roots.push(uid);
        }
        Ok(())
    }

    /// Live root values, in creation order.
    #[must_use]
    pub fn roots(&self) -> Vec<ValueRef> {
        self.state
            .borrow()
            .roots
            .iter()
            .copied()
            .map(ValueRef::new)
            .collect()
    }

    pub(crate) fn inspect<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        f(&self.state.borrow().store)
    }

    pub(crate) fn read_value(&self, uid: Uid) -> Result<Value> {
        let mut st = self.state.borrow_mut();
        let (root, path) = st.store.path_of(uid)?;
        st.spy.notify_read(ReadPath::new(root, path));
        st.store.snapshot(uid)
    }

    /// Read the shape of a container, recording only its size path.
    pub(crate) fn read_shape<T>(
        &self,
        uid: Uid,
        f: impl FnOnce(&Store, Uid, &Path) -> Result<T>,
    ) -> Result<T> {
        let mut st = self.state.borrow_mut();
        let (root, path) = st.store.path_of(uid)?;
        let value = f(&st.store, uid, &path)?;
        st.spy.notify_read(ReadPath::new(root, path.size()));
        Ok(value)
    }

    /// Apply operations relative to `target` inside the open transaction.
    pub(crate) fn apply_operations(
        &self,
        target: Uid,
        operations: &[Operation],
    ) -> Result<Vec<(Operation, Operation)>> {
        let mut st = self.state.borrow_mut();
        if !st.is_writable() {
            return Err(Error::NotWritable(target));
        }
        let (root, prefix) = st.store.path_of(target)?;
        if st.store.owner(root).is_some() {
            return Err(Error::ReadOnly(target));
        }
        let mut pairs = Vec::new();
        for operation in operations {
            let applied = st.store.apply(root, &operation.rebased(&prefix))?;
            pairs.extend(applied.pairs.iter().cloned());
            st.record(root, applied);
        }
        Ok(pairs)
    }

    // ─── Collaborator hooks ─────────────────────────────────────────────

    /// Register that paths under `root` changed without going through
    /// [`ValueRef`] writes.
    ///
    /// # Errors
    ///
    /// [`Error::NotWritable`] outside a transaction.
    pub fn add_updated_observable(&self, root: Uid, paths: Vec<Path>) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if !st.is_writable() {
            return Err(Error::NotWritable(root));
        }
        st.invalidate_memoized(root, &paths);
        if let Some(tx) = st.tx.as_mut() {
            tx.pending.touch(root, paths);
        }
        Ok(())
    }

    /// Record a read for the running observer.
    pub fn notify_read(&self, source: Uid, path: Path) {
        self.state
            .borrow_mut()
            .spy
            .notify_read(ReadPath::new(source, path));
    }

    /// Allocate a fresh UID from the container's registry.
    pub fn next_uid(&self) -> Uid {
        self.state.borrow_mut().store.uids_mut().next_uid()
    }

    /// Claim a caller-chosen UID.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateUid`] if the UID is live.
    pub fn use_uid(&self, uid: Uid) -> Result<()> {
        self.state.borrow_mut().store.uids_mut().use_uid(uid)
    }

    /// Release a UID. Returns `false` if it was not live.
    pub fn remove_uid(&self, uid: Uid) -> bool {
        self.state.borrow_mut().store.uids_mut().remove_uid(uid)
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.state.borrow().is_writable()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.borrow().tx.is_some()
    }

    // ─── Referencables ──────────────────────────────────────────────────

    /// Make a value resolvable by a string identifier. Re-registering an
    /// identifier replaces the previous value.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownUid`] if the value is gone.
    pub fn register_referencable(&self, identifier: impl Into<String>, value: ValueRef) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if !st.store.contains(value.uid()) {
            return Err(Error::UnknownUid(value.uid()));
        }
        st.references.insert(identifier.into(), value.uid());
        Ok(())
    }

    pub fn unregister_referencable(&self, identifier: &str) -> Option<ValueRef> {
        self.state
            .borrow_mut()
            .references
            .remove(identifier)
            .map(ValueRef::new)
    }

    /// The live value registered under `identifier`.
    #[must_use]
    pub fn resolve_reference(&self, identifier: &str) -> Option<ValueRef> {
        let st = self.state.borrow();
        st.references
            .get(identifier)
            .copied()
            .filter(|uid| st.store.contains(*uid))
            .map(ValueRef::new)
    }

    // ─── Migration listeners ────────────────────────────────────────────

    /// Call `listener` with the migration of every committed transaction
    /// that changed `root`.
    pub fn on_migration(
        &self,
        root: ValueRef,
        listener: impl FnMut(&Migration) + 'static,
    ) -> ListenerId {
        let mut st = self.state.borrow_mut();
        st.next_listener += 1;
        let id = ListenerId(st.next_listener);
        st.listeners.insert(
            id,
            Listener {
                root: root.uid(),
                callback: Some(Box::new(listener)),
            },
        );
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn off_migration(&self, id: ListenerId) -> bool {
        let removed = self.state.borrow_mut().listeners.shift_remove(&id);
        removed.is_some()
    }

    fn deliver(&self, migrations: IndexMap<Uid, Migration>) {
        for (root, migration) in migrations {
            if migration.is_empty() {
                continue;
            }
            let ids: Vec<ListenerId> = self
                .state
                .borrow()
                .listeners
                .iter()
                .filter(|(_, listener)| listener.root == root)
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                let callback = self
                    .state
                    .borrow_mut()
                    .listeners
                    .get_mut(&id)
                    .and_then(|listener| listener.callback.take());
                let Some(mut callback) = callback else {
                    continue;
                };
                callback(&migration);
                let mut st = self.state.borrow_mut();
                if let Some(listener) = st.listeners.get_mut(&id) {
                    listener.callback = Some(callback);
                }
            }
        }
    }

    // ─── Transactions ───────────────────────────────────────────────────

    /// Run `f` as a transaction.
    ///
    /// Nested calls join the outermost transaction. The outermost call
    /// commits, delivers migrations and propagates on success, and rolls
    /// every change back on error.
    ///
    /// # Errors
    ///
    /// - [`Error::ComputationInProgress`] when called from a computation.
    /// - The error returned by `f`, after rollback.
    /// - Propagation failures, after the commit.
    pub fn transaction<T>(&self, f: impl FnOnce(&Container) -> Result<T>) -> Result<T> {
        let (root_tx, token) = {
            let mut st = self.state.borrow_mut();
            if st.computing > 0 {
                return Err(Error::ComputationInProgress);
            }
            let token = st.spy.pause();
            let root_tx = if st.tx.is_some() {
                None
            } else {
                st.next_tx += 1;
                let id = TxId::new(st.next_tx);
                st.store.begin_journal();
                let tx = Transaction {
                    id,
                    pending: ChangeSet::default(),
                    ran: HashMap::new(),
                    dropped_roots: Vec::new(),
                    roots_backup: st.roots.clone(),
                    references_backup: st.references.clone(),
                };
                st.tx = Some(tx);
                Some(id)
            };
            (root_tx, token)
        };

        let Some(tx_id) = root_tx else {
            let result = f(self);
            self.state.borrow_mut().spy.resume(token);
            return result;
        };

        let span = debug_span!("transaction", tx_id = %tx_id, container = %self.config.label);
        let _guard = span.enter();
        let result = f(self);
        self.state.borrow_mut().spy.resume(token);
        match result {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback(&err)?;
                Err(err)
            }
        }
    }

    fn commit(&self) -> Result<()> {
        let (pending, dropped_roots) = {
            let mut st = self.state.borrow_mut();
            let Some(tx) = st.tx.take() else {
                return Ok(());
            };
            st.store.commit_journal();
            let State {
                references, store, ..
            } = &mut *st;
            references.retain(|_, uid| store.contains(*uid));
            debug!(
                message = "tx.commit",
                tx_id = %tx.id,
                roots = tx.pending.migrations.len(),
                changes = tx.pending.change_count(),
                dropped_roots = tx.dropped_roots.len()
            );
            (tx.pending, tx.dropped_roots)
        };
        self.deliver(pending.migrations);
        // Dropped roots keep their graph node until their readers re-ran.
        let propagated = self.propagate(pending.changes);
        let mut st = self.state.borrow_mut();
        for root in dropped_roots {
            if !st.roots.contains(&root) {
                st.graph.remove_node(root);
            }
        }
        propagated
    }

    fn rollback(&self, err: &Error) -> Result<()> {
        let discarded = {
            let mut st = self.state.borrow_mut();
            let Some(tx) = st.tx.take() else {
                return Ok(());
            };
            let removed = st.store.rollback_journal()?;
            for uid in &removed {
                st.graph.remove_node(*uid);
            }
            st.roots = tx.roots_backup;
            st.references = tx.references_backup;

            let State {
                store,
                graph,
                observers,
                roots,
                ..
            } = &mut *st;
            for &root in roots.iter() {
                graph.insert_node(root);
            }
            // Computations that re-ran go back to the dependencies and
            // value of their last committed run.
            for (id, backup) in tx.ran {
                let Some(slot) = observers.get_mut(&id) else {
                    continue;
                };
                graph.remove_edges_to(id);
                for source in backup.sources {
                    if graph.contains_node(source) {
                        graph.insert_edge(source, id)?;
                    }
                }
                slot.dependencies = backup.dependencies;
                if let Body::Computed { value, .. } = &mut slot.body {
                    *value = backup.value;
                }
                slot.stale = true;
            }
            // Trees built during the transaction are gone; their
            // computations rebuild them on the next run.
            for slot in observers.values_mut() {
                if let Body::Observable { tree, .. } = &mut slot.body
                    && tree.is_some_and(|root| !store.contains(root))
                {
                    *tree = None;
                    slot.stale = true;
                }
            }
            // Trees restored for computations disposed during the
            // transaction have no owner left.
            let orphans: Vec<Uid> = roots
                .iter()
                .copied()
                .filter(|root| {
                    store
                        .owner(*root)
                        .is_some_and(|owner| !observers.contains_key(&owner))
                })
                .collect();
            for orphan in &orphans {
                store.kill(*orphan);
                roots.shift_remove(orphan);
                graph.remove_node(*orphan);
            }

            warn!(
                message = "tx.rollback",
                tx_id = %tx.id,
                error = %err,
                discarded_changes = tx.pending.change_count(),
                removed_values = removed.len()
            );
            tx.pending
        };
        drop(discarded);
        Ok(())
    }

    /// Apply operations that originated in another container.
    ///
    /// With a transaction open the patch joins it. Otherwise it is applied
    /// on its own: either every operation lands and the change is
    /// propagated at once, or the patch is undone and nothing runs.
    /// Computed trees are not writable this way either.
    ///
    /// # Errors
    ///
    /// [`Error::ComputationInProgress`] from inside a computation,
    /// [`Error::ReadOnly`] for a computed tree, operation errors, and
    /// propagation failures.
    pub fn present_patch(&self, target: ValueRef, operations: &[Operation]) -> Result<()> {
        let (root, changes) = {
            let mut st = self.state.borrow_mut();
            if st.computing > 0 {
                return Err(Error::ComputationInProgress);
            }
            let (root, prefix) = st.store.path_of(target.uid())?;
            if st.store.owner(root).is_some() {
                return Err(Error::ReadOnly(target.uid()));
            }
            if st.tx.is_some() {
                for operation in operations {
                    let applied = st.store.apply(root, &operation.rebased(&prefix))?;
                    st.record(root, applied);
                }
                return Ok(());
            }
            st.store.begin_journal();
            let mut changes = Applied::default();
            let mut failure = None;
            for operation in operations {
                match st.store.apply(root, &operation.rebased(&prefix)) {
                    Ok(applied) => changes.extend(applied),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            if let Some(err) = failure {
                st.store.rollback_journal()?;
                debug!(
                    message = "patch.rejected",
                    container = %self.config.label,
                    root = %root,
                    error = %err
                );
                return Err(err);
            }
            st.store.commit_journal();
            st.invalidate_memoized(root, &changes.affected);
            (root, changes)
        };
        debug!(
            message = "patch.presented",
            container = %self.config.label,
            root = %root,
            operations = operations.len(),
            applied = changes.pairs.len()
        );
        if changes.is_empty() {
            return Ok(());
        }
        if self.config.deliver_presented_patches {
            let mut migration = Migration::new();
            for (forward, backward) in &changes.pairs {
                migration.push(forward.clone(), backward.clone());
            }
            self.deliver(IndexMap::from([(root, migration)]));
        }
        self.propagate(IndexMap::from([(root, changes.affected)]))
    }

    // ─── Observers ──────────────────────────────────────────────────────

    /// Create an eager reaction and run it once.
    ///
    /// # Errors
    ///
    /// The first run's error. The reaction is discarded in that case.
    pub fn reaction<F>(&self, f: F) -> Result<Reaction>
    where
        F: FnMut(&Container) -> Result<()> + 'static,
    {
        let id = self.register(Body::Reaction(Some(Box::new(f))));
        self.first_run(id)?;
        Ok(Reaction::new(id))
    }

    /// Create a memoized computation holding a boxed value.
    ///
    /// # Errors
    ///
    /// As [`reaction`](Self::reaction).
    pub fn computed<F>(&self, f: F) -> Result<Computed>
    where
        F: FnMut(&Container) -> Result<Value> + 'static,
    {
        let id = self.register(Body::Computed {
            compute: Some(Box::new(f)),
            value: None,
        });
        self.first_run(id)?;
        Ok(Computed::new(id))
    }

    /// Create a memoized computation whose value is an observable tree,
    /// reconciled in place on every re-run.
    ///
    /// # Errors
    ///
    /// As [`reaction`](Self::reaction).
    pub fn observable_computed<F>(&self, f: F) -> Result<Computed>
    where
        F: FnMut(&Container) -> Result<Value> + 'static,
    {
        let id = self.register(Body::Observable {
            compute: Some(Box::new(f)),
            tree: None,
        });
        self.first_run(id)?;
        Ok(Computed::new(id))
    }

    /// Run `effect` once, the first time `predicate` holds, then dispose.
    ///
    /// # Errors
    ///
    /// As [`reaction`](Self::reaction), plus the effect's error if it fires
    /// on the first run.
    pub fn when<P, E>(&self, predicate: P, effect: E) -> Result<When>
    where
        P: FnMut(&Container) -> Result<bool> + 'static,
        E: FnOnce(&Container) -> Result<()> + 'static,
    {
        let id = self.register(Body::When {
            predicate: Some(Box::new(predicate)),
            effect: Some(Box::new(effect)),
        });
        self.first_run(id)?;
        Ok(When::new(id))
    }

    /// Dispose an observer: remove it from the graph, kill its produced tree
    /// and release its UID.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] if it is already gone.
    pub fn dispose(&self, id: Uid) -> Result<()> {
        if self.dispose_observer(id) {
            Ok(())
        } else {
            Err(Error::Disposed(id))
        }
    }

    #[must_use]
    pub fn observer_kind(&self, id: Uid) -> Option<ObserverKind> {
        self.state.borrow().observers.get(&id).map(ObserverSlot::kind)
    }

    /// # Errors
    ///
    /// [`Error::Disposed`] if the observer is gone.
    pub fn is_stale(&self, id: Uid) -> Result<bool> {
        self.state
            .borrow()
            .observers
            .get(&id)
            .map(|slot| slot.stale)
            .ok_or(Error::Disposed(id))
    }

    /// # Errors
    ///
    /// [`Error::Disposed`] if the observer is gone.
    pub fn dependencies(&self, id: Uid) -> Result<Vec<ReadPath>> {
        self.state
            .borrow()
            .observers
            .get(&id)
            .map(|slot| slot.dependencies.clone())
            .ok_or(Error::Disposed(id))
    }

    /// Every dependency chain ending at `observer`, source first.
    #[must_use]
    pub fn explain(&self, observer: Uid) -> Vec<Vec<Uid>> {
        self.state.borrow().graph.all_paths_to(observer)
    }

    fn register(&self, body: Body) -> Uid {
        let mut st = self.state.borrow_mut();
        let id = st.store.uids_mut().next_uid();
        st.graph.insert_node(id);
        st.observers.insert(id, ObserverSlot::new(body));
        id
    }

    fn first_run(&self, id: Uid) -> Result<()> {
        match self.run_observer(id) {
            Ok(RunOutcome::Fired) => self.fire(id),
            Ok(_) => Ok(()),
            Err(err) => {
                self.dispose_observer(id);
                debug!(message = "observer.discarded", observer = %id, error = %err);
                Err(err)
            }
        }
    }

    fn dispose_observer(&self, id: Uid) -> bool {
        let slot = self.state.borrow_mut().remove_observer(id);
        let Some(slot) = slot else {
            return false;
        };
        debug!(message = "observer.disposed", observer = %id, kind = ?slot.kind());
        drop(slot);
        true
    }

    /// Run a `when` effect whose predicate came true, then dispose it.
    fn fire(&self, id: Uid) -> Result<()> {
        let effect = {
            let mut st = self.state.borrow_mut();
            match st.observers.get_mut(&id).map(|slot| &mut slot.body) {
                Some(Body::When { effect, .. }) => effect.take(),
                _ => None,
            }
        };
        let result = match effect {
            Some(effect) => effect(self),
            None => Ok(()),
        };
        self.dispose_observer(id);
        result.map_err(|err| Error::observer_failed(id, err))
    }

    /// Run one observer if stale.
    pub(crate) fn run_observer(&self, id: Uid) -> Result<RunOutcome> {
        let job = {
            let mut st = self.state.borrow_mut();
            let st = &mut *st;
            let slot = st.observers.get_mut(&id).ok_or(Error::Disposed(id))?;
            if slot.running {
                return match slot.kind() {
                    ObserverKind::Reaction => Ok(RunOutcome::Fresh),
                    _ => Err(Error::CircularRead(id)),
                };
            }
            if !slot.stale {
                return Ok(RunOutcome::Fresh);
            }
            let kind = slot.kind();
            if kind.is_memoized()
                && let Some(tx) = st.tx.as_mut()
                && !tx.ran.contains_key(&id)
            {
                let value = match &slot.body {
                    Body::Computed { value, .. } => value.clone(),
                    _ => None,
                };
                let backup = RunBackup {
                    dependencies: slot.dependencies.clone(),
                    sources: st.graph.predecessors(id).collect(),
                    value,
                };
                tx.ran.insert(id, backup);
            }
            let job = slot.body.take_job().ok_or(Error::Disposed(id))?;
            slot.running = true;
            if job.is_computation() {
                st.computing += 1;
            }
            st.spy.start_spy(id);
            trace!(message = "observer.run", observer = %id, kind = ?kind);
            job
        };

        let (job, output) = job.call(self);

        let mut st = self.state.borrow_mut();
        if job.is_computation() {
            st.computing = st.computing.saturating_sub(1);
        }
        let Some(slot) = st.observers.get_mut(&id) else {
            // Disposed from inside its own run.
            return output.map(|_| RunOutcome::Fresh);
        };
        slot.body.restore(job);
        slot.running = false;
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                st.spy.detach(id);
                return Err(err);
            }
        };

        let token = st.spy.pause();
        let committed = match output {
            JobOutput::Done | JobOutput::Predicate(false) => Ok(RunOutcome::Ran(None)),
            JobOutput::Predicate(true) => Ok(RunOutcome::Fired),
            JobOutput::Value(value) => st.commit_value(id, value),
        };
        st.spy.resume(token);
        let outcome = match committed {
            Ok(outcome) => outcome,
            Err(err) => {
                st.spy.detach(id);
                return Err(err);
            }
        };

        let reads = st.spy.stop_spy(id)?;
        st.rebuild_edges(id, &reads)?;
        if let Some(slot) = st.observers.get_mut(&id) {
            slot.dependencies = reads;
            slot.stale = false;
        }
        Ok(outcome)
    }

    /// Apply a run's output outside propagation: deliver the migration of a
    /// reconciled tree and invalidate memoized readers.
    fn absorb(&self, output: Output) {
        self.state
            .borrow_mut()
            .invalidate_memoized(output.change.source, &output.change.paths);
        if let Some((root, migration)) = output.migration {
            self.deliver(IndexMap::from([(root, migration)]));
        }
    }

    /// Bring a computation up to date, disposing it if the run fails.
    fn refresh(&self, id: Uid) -> Result<()> {
        match self.run_observer(id) {
            Ok(RunOutcome::Ran(Some(output))) => {
                self.absorb(output);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(Error::CircularRead(culprit)) if culprit == id => Err(Error::CircularRead(id)),
            Err(Error::Disposed(gone)) if gone == id => Err(Error::Disposed(id)),
            Err(err) => {
                self.dispose_observer(id);
                Err(Error::observer_failed(id, err))
            }
        }
    }

    pub(crate) fn computed_get(&self, id: Uid) -> Result<Value> {
        self.refresh(id)?;
        let mut st = self.state.borrow_mut();
        let slot = st.observers.get(&id).ok_or(Error::Disposed(id))?;
        match &slot.body {
            Body::Computed { value, .. } => {
                let value = value.clone().unwrap_or(Value::Null);
                st.spy.notify_read(ReadPath::new(id, Path::root()));
                Ok(value)
            }
            Body::Observable {
                tree: Some(tree), ..
            } => {
                let tree = *tree;
                st.spy.notify_read(ReadPath::new(tree, Path::root()));
                st.store.snapshot(tree)
            }
            _ => Err(Error::NotObservable(id)),
        }
    }

    pub(crate) fn computed_tree(&self, id: Uid) -> Result<ValueRef> {
        self.refresh(id)?;
        let st = self.state.borrow();
        let slot = st.observers.get(&id).ok_or(Error::Disposed(id))?;
        slot.body
            .tree()
            .map(ValueRef::new)
            .ok_or(Error::NotObservable(id))
    }

    // ─── Propagation ────────────────────────────────────────────────────

    /// Re-run what the committed changes invalidated.
    fn propagate(&self, changes: IndexMap<Uid, Vec<Path>>) -> Result<()> {
        let mut pending = changes;
        let mut eager: IndexSet<Uid> = IndexSet::new();
        let mut failures: Vec<Error> = Vec::new();
        let mut pass = 0;

        while !pending.is_empty() {
            if pass >= self.config.max_propagation_passes {
                warn!(message = "propagation.limit", container = %self.config.label, passes = pass);
                return Err(Error::PropagationLimit { passes: pass });
            }
            pass += 1;

            let order = {
                let mut st = self.state.borrow_mut();
                for (source, paths) in &pending {
                    st.mark_dependents(*source, paths, &mut eager);
                }
                let reachable = st.graph.reachable_from(pending.keys().copied());
                st.graph.topological_sort_of(&reachable)?
            };
            debug!(
                message = "propagation.pass",
                container = %self.config.label,
                pass,
                sources = pending.len(),
                nodes = order.len()
            );
            let position: HashMap<Uid, usize> =
                order.iter().enumerate().map(|(i, &node)| (node, i)).collect();

            let mut next: IndexMap<Uid, Vec<Path>> = IndexMap::new();
            for (index, &node) in order.iter().enumerate() {
                let due = {
                    let st = self.state.borrow();
                    st.observers.get(&node).is_some_and(|slot| {
                        slot.kind().is_memoized() && slot.stale && !slot.running
                    }) && st.is_observed(node)
                };
                if !due {
                    continue;
                }
                match self.run_observer(node) {
                    Ok(RunOutcome::Ran(Some(output))) => {
                        let Output { change, migration } = output;
                        if let Some((root, migration)) = migration {
                            self.deliver(IndexMap::from([(root, migration)]));
                        }
                        let mut st = self.state.borrow_mut();
                        st.mark_dependents(change.source, &change.paths, &mut eager);
                        let behind = st.graph.successors(change.source).any(|reader| {
                            st.observers
                                .get(&reader)
                                .is_some_and(|slot| slot.kind().is_memoized())
                                && position.get(&reader).is_none_or(|&at| at <= index)
                        });
                        if behind {
                            next.entry(change.source)
                                .or_default()
                                .extend(change.paths);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => failures.push(self.fail(node, err)),
                }
            }
            pending = next;
        }

        let ordered = {
            let st = self.state.borrow();
            let alive: IndexSet<Uid> = eager
                .into_iter()
                .filter(|id| st.observers.contains_key(id))
                .collect();
            st.graph.topological_sort_of(&alive)?
        };
        for id in ordered {
            let stale = self
                .state
                .borrow()
                .observers
                .get(&id)
                .is_some_and(|slot| slot.stale);
            if !stale {
                continue;
            }
            match self.run_observer(id) {
                Ok(RunOutcome::Fired) => {
                    if let Err(err) = self.fire(id) {
                        failures.push(err);
                    }
                }
                Ok(_) => {}
                Err(err) => failures.push(self.fail(id, err)),
            }
        }

        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    fn fail(&self, id: Uid, err: Error) -> Error {
        warn!(message = "observer.failed", observer = %id, error = %err);
        self.dispose_observer(id);
        Error::observer_failed(id, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};
    use tracing::Subscriber;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    fn counter() -> Rc<Cell<u32>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn reaction_runs_on_construction_and_after_commit() {
        let cx = Container::new();
        let root = cx.create_root(json!({"a": 1}));
        let runs = counter();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (r, s) = (Rc::clone(&runs), Rc::clone(&seen));
        cx.reaction(move |cx| {
            r.set(r.get() + 1);
            s.borrow_mut().push(root.child(cx, "a")?.get(cx)?);
            Ok(())
        })
        .unwrap();
        assert_eq!(runs.get(), 1);

        cx.transaction(|cx| root.set_key(cx, "a", json!(2))).unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(*seen.borrow(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn nested_transaction_defers_propagation_to_root() {
        let cx = Container::new();
        let root = cx.create_root(json!({"a": 1, "b": 1}));
        let runs = counter();
        let r = Rc::clone(&runs);
        cx.reaction(move |cx| {
            r.set(r.get() + 1);
            root.get(cx).map(drop)
        })
        .unwrap();

        cx.transaction(|cx| {
            root.set_key(cx, "a", json!(2))?;
            cx.transaction(|cx| root.set_key(cx, "b", json!(2)))?;
            assert_eq!(runs.get(), 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn transaction_inside_computation_is_refused() {
        let cx = Container::new();
        let root = cx.create_root(json!(1));
        let attempt = cx.computed(move |cx| {
            cx.transaction(|cx| root.set(cx, json!(2)))?;
            Ok(Value::Null)
        });
        assert_eq!(attempt.unwrap_err(), Error::ComputationInProgress);
        assert!(!cx.in_transaction());
    }

    #[test]
    fn write_inside_computation_run_is_refused() {
        let cx = Container::new();
        let root = cx.create_root(json!(1));
        let source = cx.create_root(json!(0));
        let c = cx
            .computed(move |cx| {
                let v = source.get(cx)?;
                if v == json!(1) {
                    root.set(cx, json!(5))?;
                }
                Ok(v)
            })
            .unwrap();
        let err = cx
            .transaction(|cx| {
                source.set(cx, json!(1))?;
                c.get(cx)
            })
            .unwrap_err();
        assert_eq!(
            err,
            Error::observer_failed(c.id(), Error::NotWritable(root.uid()))
        );
        assert_eq!(root.get(&cx).unwrap(), json!(1));
        assert_eq!(source.get(&cx).unwrap(), json!(0));
    }

    #[test]
    fn computed_read_in_transaction_sees_fresh_input() {
        let cx = Container::new();
        let root = cx.create_root(json!({"n": 2}));
        let double = cx
            .computed(move |cx| {
                let n = root.child(cx, "n")?.get(cx)?.as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            })
            .unwrap();
        let inside = cx
            .transaction(|cx| {
                root.set_key(cx, "n", json!(5))?;
                double.get(cx)
            })
            .unwrap();
        assert_eq!(inside, json!(10));
        assert!(!double.is_stale(&cx).unwrap());
    }

    #[test]
    fn rollback_marks_computations_that_ran_stale() {
        let cx = Container::new();
        let root = cx.create_root(json!(1));
        let c = cx.computed(move |cx| root.get(cx)).unwrap();
        let err = cx
            .transaction(|cx| {
                root.set(cx, json!(2))?;
                assert_eq!(c.get(cx)?, json!(2));
                Err::<(), _>(Error::user("abort"))
            })
            .unwrap_err();
        assert_eq!(err, Error::user("abort"));
        assert!(c.is_stale(&cx).unwrap());
        assert_eq!(c.get(&cx).unwrap(), json!(1));
    }

    #[test]
    fn circular_read_is_reported() {
        let cx = Container::new();
        let slot: Rc<Cell<Option<Computed>>> = Rc::new(Cell::new(None));
        let inner = Rc::clone(&slot);
        let root = cx.create_root(json!(0));
        let c = cx
            .computed(move |cx| {
                let v = root.get(cx)?;
                if let Some(me) = inner.get() {
                    me.get(cx)?;
                }
                Ok(v)
            })
            .unwrap();
        slot.set(Some(c));
        cx.transaction(|cx| root.set(cx, json!(1))).unwrap();
        assert_eq!(c.get(&cx), Err(Error::CircularRead(c.id())));
        assert!(c.is_alive(&cx));
    }

    #[test]
    fn dispose_releases_graph_node_and_tree() {
        let cx = Container::new();
        let root = cx.create_root(json!([1, 2]));
        let c = cx
            .observable_computed(move |cx| Ok(json!({"items": root.get(cx)?})))
            .unwrap();
        let tree = c.value(&cx).unwrap();
        assert!(tree.is_alive(&cx));
        c.dispose(&cx).unwrap();
        assert!(!tree.is_alive(&cx));
        assert!(!c.is_alive(&cx));
        assert_eq!(c.dispose(&cx), Err(Error::Disposed(c.id())));
        assert!(cx.explain(c.id()).is_empty());
    }

    #[test]
    fn computed_tree_is_read_only() {
        let cx = Container::new();
        let c = cx.observable_computed(|_| Ok(json!({"x": 1}))).unwrap();
        let tree = c.value(&cx).unwrap();
        let err = cx
            .transaction(|cx| tree.set_key(cx, "x", json!(2)))
            .unwrap_err();
        assert_eq!(err, Error::ReadOnly(tree.uid()));
    }

    #[test]
    fn boxed_computed_has_no_tree() {
        let cx = Container::new();
        let c = cx.computed(|_| Ok(json!(3))).unwrap();
        assert_eq!(c.value(&cx), Err(Error::NotObservable(c.id())));
        assert_eq!(c.kind(&cx).unwrap(), ObserverKind::Computed);
    }

    #[test]
    fn explain_lists_chains_into_observer() {
        let cx = Container::new();
        let root = cx.create_root(json!(1));
        let c = cx.computed(move |cx| root.get(cx)).unwrap();
        let r = cx.reaction(move |cx| c.get(cx).map(drop)).unwrap();
        assert_eq!(cx.explain(r.id()), vec![vec![root.uid(), c.id(), r.id()]]);
    }

    #[test]
    fn removed_root_is_restored_by_rollback() {
        let cx = Container::new();
        let root = cx.create_root(json!({"a": 1}));
        let runs = counter();
        let r = Rc::clone(&runs);
        cx.reaction(move |cx| {
            r.set(r.get() + 1);
            root.get(cx).map(drop)
        })
        .unwrap();
        let err = cx
            .transaction(|cx| {
                cx.remove_root(root)?;
                Err::<(), _>(Error::user("undo"))
            })
            .unwrap_err();
        assert_eq!(err, Error::user("undo"));
        assert_eq!(cx.roots(), vec![root]);
        cx.transaction(|cx| root.set_key(cx, "a", json!(2))).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn listener_removed_during_delivery_is_dropped() {
        let cx = Rc::new(Container::new());
        let root = cx.create_root(json!(0));
        let calls = counter();
        let id_cell: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
        let (c, ids, weak) = (Rc::clone(&calls), Rc::clone(&id_cell), Rc::downgrade(&cx));
        let id = cx.on_migration(root, move |_| {
            c.set(c.get() + 1);
            if let (Some(cx), Some(id)) = (weak.upgrade(), ids.get()) {
                cx.off_migration(id);
            }
        });
        id_cell.set(Some(id));
        cx.transaction(|cx| root.set(cx, json!(1))).unwrap();
        cx.transaction(|cx| root.set(cx, json!(2))).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(!cx.off_migration(id));
    }

    #[test]
    fn clear_drops_everything_but_keeps_uids_unique() {
        let cx = Container::new();
        let old = cx.create_root(json!({"a": 1}));
        cx.reaction(move |cx| old.get(cx).map(drop)).unwrap();
        cx.clear();
        assert!(cx.roots().is_empty());
        assert!(!old.is_alive(&cx));
        let fresh = cx.create_root(json!(1));
        assert!(fresh.uid() > old.uid());
    }

    #[test]
    fn uid_hooks_share_the_registry() {
        let cx = Container::new();
        let uid = cx.next_uid();
        assert_eq!(cx.use_uid(uid), Err(Error::DuplicateUid(uid)));
        assert!(cx.remove_uid(uid));
        cx.use_uid(Uid::new(100)).unwrap();
        assert!(cx.create_root(json!(null)).uid() > Uid::new(100));
    }

    #[test]
    fn add_updated_observable_reaches_readers() {
        let cx = Container::new();
        let root = cx.create_root(json!({"a": 1}));
        let runs = counter();
        let r = Rc::clone(&runs);
        cx.reaction(move |cx| {
            r.set(r.get() + 1);
            root.child(cx, "a")?.get(cx).map(drop)
        })
        .unwrap();
        assert_eq!(
            cx.add_updated_observable(root.uid(), vec![Path::parse("/a").unwrap()]),
            Err(Error::NotWritable(root.uid()))
        );
        cx.transaction(|cx| {
            cx.add_updated_observable(root.uid(), vec![Path::parse("/a").unwrap()])
        })
        .unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn propagation_limit_is_configurable() {
        let config = ContainerConfig::default().with_max_propagation_passes(1);
        let cx = Container::with_config(config);
        assert_eq!(cx.config().max_propagation_passes, 1);
        let root = cx.create_root(json!(1));
        let runs = counter();
        let r = Rc::clone(&runs);
        cx.reaction(move |cx| {
            r.set(r.get() + 1);
            root.get(cx).map(drop)
        })
        .unwrap();
        cx.transaction(|cx| root.set(cx, json!(2))).unwrap();
        assert_eq!(runs.get(), 2);
    }

    // ─── Tracing ────────────────────────────────────────────────────────

    #[derive(Default)]
    struct TraceState {
        saw_transaction_span: bool,
        messages: Vec<String>,
    }

    struct TraceCapture {
        state: Arc<Mutex<TraceState>>,
    }

    impl<S> Layer<S> for TraceCapture
    where
        S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::Id,
            _ctx: Context<'_, S>,
        ) {
            if attrs.metadata().name() == "transaction" {
                self.state.lock().expect("trace lock").saw_transaction_span = true;
            }
        }

        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct Msg {
                message: Option<String>,
            }
            impl tracing::field::Visit for Msg {
                fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                    if field.name() == "message" {
                        self.message = Some(value.to_string());
                    }
                }

                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                    }
                }
            }
            let mut msg = Msg { message: None };
            event.record(&mut msg);
            if let Some(message) = msg.message {
                self.state.lock().expect("trace lock").messages.push(message);
            }
        }
    }

    #[test]
    fn commit_and_rollback_emit_events() {
        let state = Arc::new(Mutex::new(TraceState::default()));
        let subscriber = tracing_subscriber::registry().with(TraceCapture {
            state: Arc::clone(&state),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let cx = Container::new();
        let root = cx.create_root(json!(1));
        let r = cx.reaction(move |cx| root.get(cx).map(drop)).unwrap();
        cx.transaction(|cx| root.set(cx, json!(2))).unwrap();
        let _ = cx.transaction(|cx| {
            root.set(cx, json!(3))?;
            Err::<(), _>(Error::user("no"))
        });
        r.dispose(&cx).unwrap();

        let snapshot = state.lock().expect("trace lock");
        assert!(snapshot.saw_transaction_span, "expected transaction span");
        for expected in ["tx.commit", "propagation.pass", "tx.rollback", "observer.disposed"] {
            assert!(
                snapshot.messages.iter().any(|m| m == expected),
                "missing {expected} in {:?}",
                snapshot.messages
            );
        }
    }
}

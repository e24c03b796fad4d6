#![forbid(unsafe_code)]

//! Arena of JSON value nodes.
//!
//! Every observable value is a [`Node`] in one flat table keyed by [`Uid`].
//! Parents own their children by UID; a child knows its parent by UID, so
//! detaching is a table update and there are no reference cycles.
//!
//! # Design
//!
//! Mutations go through [`Store::apply`], which returns the applied
//! `(forward, backward)` operation pairs and the paths whose readers may
//! be affected. A structural `replace` is reconciled in place: unchanged
//! nodes keep their UID and emit nothing, so the forward list is the
//! minimal set of leaf and shape operations.
//!
//! While a transaction is open the store keeps a journal holding the
//! pre-image of every node the first time it is touched. Rolling back
//! reinserts those pre-images, which restores both data and identity.
//!
//! # Invariants
//!
//! 1. Every child UID referenced by an object or array node is in the table
//!    and names that node as its parent.
//! 2. A cached snapshot equals the snapshot computed from the children.
//!    Mutating a node clears the cache of the node and all its ancestors.
//! 3. A node in the table holds a live UID.
//!
//! # Failure Modes
//!
//! Bad paths fail before anything is modified. Errors raised half way
//! through a reconciliation leave the journal able to undo the partial
//! work; outside a transaction the partial work stays.

use std::collections::HashMap;

use canopy_core::{Error, Operation, Path, Result, Uid, UidAllocator};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Payload of a node.
#[derive(Debug, Clone)]
pub(crate) enum NodeData {
    Leaf(Value),
    Object(IndexMap<String, Uid>),
    Array(Vec<Uid>),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) data: NodeData,
    pub(crate) parent: Option<Uid>,
    /// Computation that produced this tree. Set on roots only.
    pub(crate) owner: Option<Uid>,
    snapshot: Option<Value>,
}

impl Node {
    fn pre_image(&self) -> Node {
        Node {
            snapshot: None,
            ..self.clone()
        }
    }
}

/// Result of applying one operation.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub(crate) pairs: Vec<(Operation, Operation)>,
    pub(crate) affected: Vec<Path>,
}

impl Applied {
    fn record(
        &mut self,
        forward: Operation,
        backward: Operation,
        affected: impl IntoIterator<Item = Path>,
    ) {
        self.pairs.push((forward, backward));
        for path in affected {
            if !self.affected.contains(&path) {
                self.affected.push(path);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub(crate) fn extend(&mut self, other: Applied) {
        self.pairs.extend(other.pairs);
        for path in other.affected {
            if !self.affected.contains(&path) {
                self.affected.push(path);
            }
        }
    }
}

enum Shape<'v> {
    Leaf(Value),
    Object(IndexMap<String, Uid>, &'v Map<String, Value>),
    Array(Vec<Uid>, &'v [Value]),
    Rebuild,
}

enum Children {
    Leaf(Value),
    Object(Vec<(String, Uid)>),
    Array(Vec<Uid>),
}

#[derive(Debug, Default)]
pub(crate) struct Store {
    nodes: HashMap<Uid, Node>,
    uids: UidAllocator,
    journal: Option<HashMap<Uid, Option<Node>>>,
}

impl Store {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn uids(&self) -> &UidAllocator {
        &self.uids
    }

    pub(crate) fn uids_mut(&mut self) -> &mut UidAllocator {
        &mut self.uids
    }

    pub(crate) fn contains(&self, uid: Uid) -> bool {
        self.nodes.contains_key(&uid)
    }

    pub(crate) fn node(&self, uid: Uid) -> Result<&Node> {
        self.nodes.get(&uid).ok_or(Error::UnknownUid(uid))
    }

    // ─── Journal ────────────────────────────────────────────────────────

    pub(crate) fn begin_journal(&mut self) {
        self.journal = Some(HashMap::new());
    }

    pub(crate) fn commit_journal(&mut self) {
        self.journal = None;
    }

    /// Restore every journaled node and close the journal.
    ///
    /// Returns the UIDs of nodes that did not exist before the journal was
    /// opened and are gone again.
    pub(crate) fn rollback_journal(&mut self) -> Result<Vec<Uid>> {
        let Some(journal) = self.journal.take() else {
            return Ok(Vec::new());
        };
        let mut removed = Vec::new();
        for (uid, pre_image) in journal {
            match pre_image {
                Some(node) => {
                    self.nodes.insert(uid, node);
                    if !self.uids.contains(uid) {
                        self.uids.use_uid(uid)?;
                    }
                }
                None => {
                    self.nodes.remove(&uid);
                    self.uids.remove_uid(uid);
                    removed.push(uid);
                }
            }
        }
        // Caches filled mid-transaction may describe aborted data.
        for node in self.nodes.values_mut() {
            node.snapshot = None;
        }
        Ok(removed)
    }

    fn touch(&mut self, uid: Uid) {
        if let Some(journal) = self.journal.as_mut() {
            journal
                .entry(uid)
                .or_insert_with(|| self.nodes.get(&uid).map(Node::pre_image));
        }
    }

    fn invalidate(&mut self, uid: Uid) {
        let mut current = Some(uid);
        while let Some(id) = current {
            let Some(node) = self.nodes.get_mut(&id) else {
                break;
            };
            node.snapshot = None;
            current = node.parent;
        }
    }

    fn node_mut(&mut self, uid: Uid) -> Result<&mut Node> {
        if !self.nodes.contains_key(&uid) {
            return Err(Error::UnknownUid(uid));
        }
        self.touch(uid);
        self.invalidate(uid);
        self.nodes.get_mut(&uid).ok_or(Error::UnknownUid(uid))
    }

    // ─── Construction and teardown ──────────────────────────────────────

    /// Build a subtree for `value` and return its root UID.
    pub(crate) fn build(&mut self, value: &Value, parent: Option<Uid>) -> Uid {
        let uid = self.uids.next_uid();
        self.touch(uid);
        let data = self.build_data(value, uid);
        self.nodes.insert(
            uid,
            Node {
                data,
                parent,
                owner: None,
                snapshot: None,
            },
        );
        uid
    }

    fn build_data(&mut self, value: &Value, uid: Uid) -> NodeData {
        match value {
            Value::Object(map) => NodeData::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), self.build(child, Some(uid))))
                    .collect(),
            ),
            Value::Array(items) => NodeData::Array(
                items
                    .iter()
                    .map(|child| self.build(child, Some(uid)))
                    .collect(),
            ),
            scalar => NodeData::Leaf(scalar.clone()),
        }
    }

    pub(crate) fn set_owner(&mut self, uid: Uid, owner: Uid) {
        if let Some(node) = self.nodes.get_mut(&uid) {
            node.owner = Some(owner);
        }
    }

    pub(crate) fn owner(&self, uid: Uid) -> Option<Uid> {
        self.nodes.get(&uid).and_then(|node| node.owner)
    }

    /// Remove a subtree and release its UIDs. The parent's link to it is
    /// the caller's business.
    pub(crate) fn kill(&mut self, uid: Uid) -> Vec<Uid> {
        let mut stack = vec![uid];
        let mut killed = Vec::new();
        while let Some(id) = stack.pop() {
            self.touch(id);
            let Some(node) = self.nodes.remove(&id) else {
                continue;
            };
            match node.data {
                NodeData::Object(map) => stack.extend(map.values().copied()),
                NodeData::Array(items) => stack.extend(items),
                NodeData::Leaf(_) => {}
            }
            self.uids.remove_uid(id);
            killed.push(id);
        }
        killed
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.uids.clear();
        self.journal = None;
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    /// Snapshot of a subtree, served from the per-node cache when valid.
    pub(crate) fn snapshot(&mut self, uid: Uid) -> Result<Value> {
        let node = self.node(uid)?;
        if let Some(cached) = &node.snapshot {
            return Ok(cached.clone());
        }
        let children = match &node.data {
            NodeData::Leaf(value) => Children::Leaf(value.clone()),
            NodeData::Object(map) => {
                Children::Object(map.iter().map(|(key, &child)| (key.clone(), child)).collect())
            }
            NodeData::Array(items) => Children::Array(items.clone()),
        };
        let value = match children {
            Children::Leaf(value) => return Ok(value),
            Children::Object(entries) => {
                let mut out = Map::new();
                for (key, child) in entries {
                    out.insert(key, self.snapshot(child)?);
                }
                Value::Object(out)
            }
            Children::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|child| self.snapshot(child))
                    .collect::<Result<_>>()?,
            ),
        };
        if let Some(node) = self.nodes.get_mut(&uid) {
            node.snapshot = Some(value.clone());
        }
        Ok(value)
    }

    /// Root of the tree holding `uid` and the path from that root.
    pub(crate) fn path_of(&self, uid: Uid) -> Result<(Uid, Path)> {
        let mut segments = Vec::new();
        let mut current = uid;
        while let Some(parent) = self.node(current)?.parent {
            let segment = match &self.node(parent)?.data {
                NodeData::Object(map) => map
                    .iter()
                    .find(|(_, child)| **child == current)
                    .map(|(key, _)| key.clone()),
                NodeData::Array(items) => items
                    .iter()
                    .position(|child| *child == current)
                    .map(|index| index.to_string()),
                NodeData::Leaf(_) => None,
            };
            segments.push(segment.ok_or(Error::UnknownUid(current))?);
            current = parent;
        }
        segments.reverse();
        Ok((current, Path::from_segments(segments)))
    }

    /// Resolve a path relative to `base`.
    pub(crate) fn resolve(&self, base: Uid, path: &Path) -> Result<Uid> {
        let mut current = base;
        for (depth, segment) in path.segments().iter().enumerate() {
            let here = || Path::from_segments(path.segments()[..depth].iter().cloned());
            current = match &self.node(current)?.data {
                NodeData::Object(map) => *map.get(segment).ok_or_else(|| Error::InvalidKey {
                    path: here(),
                    key: segment.clone(),
                })?,
                NodeData::Array(items) => {
                    let index = parse_index(segment, &here())?;
                    *items.get(index).ok_or_else(|| Error::InvalidIndex {
                        path: here(),
                        index,
                        len: items.len(),
                    })?
                }
                NodeData::Leaf(_) => {
                    return Err(Error::KindMismatch {
                        path: here(),
                        expected: "an object or array",
                    });
                }
            };
        }
        Ok(current)
    }

    /// Key count of an object or length of an array.
    pub(crate) fn len(&self, uid: Uid, path: &Path) -> Result<usize> {
        match &self.node(uid)?.data {
            NodeData::Object(map) => Ok(map.len()),
            NodeData::Array(items) => Ok(items.len()),
            NodeData::Leaf(_) => Err(Error::KindMismatch {
                path: path.clone(),
                expected: "an object or array",
            }),
        }
    }

    pub(crate) fn keys(&self, uid: Uid, path: &Path) -> Result<Vec<String>> {
        match &self.node(uid)?.data {
            NodeData::Object(map) => Ok(map.keys().cloned().collect()),
            _ => Err(Error::KindMismatch {
                path: path.clone(),
                expected: "an object",
            }),
        }
    }

    fn items(&self, uid: Uid, path: &Path) -> Result<&Vec<Uid>> {
        match &self.node(uid)?.data {
            NodeData::Array(items) => Ok(items),
            _ => Err(Error::KindMismatch {
                path: path.clone(),
                expected: "an array",
            }),
        }
    }

    fn entries(&self, uid: Uid, path: &Path) -> Result<&IndexMap<String, Uid>> {
        match &self.node(uid)?.data {
            NodeData::Object(map) => Ok(map),
            _ => Err(Error::KindMismatch {
                path: path.clone(),
                expected: "an object",
            }),
        }
    }

    fn items_mut(&mut self, uid: Uid, path: &Path) -> Result<&mut Vec<Uid>> {
        match &mut self.node_mut(uid)?.data {
            NodeData::Array(items) => Ok(items),
            _ => Err(Error::KindMismatch {
                path: path.clone(),
                expected: "an array",
            }),
        }
    }

    fn entries_mut(&mut self, uid: Uid, path: &Path) -> Result<&mut IndexMap<String, Uid>> {
        match &mut self.node_mut(uid)?.data {
            NodeData::Object(map) => Ok(map),
            _ => Err(Error::KindMismatch {
                path: path.clone(),
                expected: "an object",
            }),
        }
    }

    // ─── Mutation ───────────────────────────────────────────────────────

    /// Apply one root-relative operation to the tree rooted at `root`.
    pub(crate) fn apply(&mut self, root: Uid, op: &Operation) -> Result<Applied> {
        let mut applied = Applied::default();
        match op {
            Operation::Replace { path, value } => {
                let target = self.resolve(root, path)?;
                self.reconcile(target, path, value, &mut applied)?;
            }
            Operation::Add { path, value } => self.add(root, path, value, &mut applied)?,
            Operation::Remove { path } => self.remove(root, path, &mut applied)?,
            Operation::Move { from, path } => self.move_entry(root, from, path, &mut applied)?,
            Operation::Push { path, value } => {
                let array = self.resolve(root, path)?;
                let len = self.items(array, path)?.len();
                if !value.is_empty() {
                    self.splice_items(array, path, len, 0, value)?;
                    applied.record(
                        Operation::push(path.clone(), value.clone()),
                        Operation::splice(path.clone(), len, value.len(), Vec::new()),
                        index_range(path, len, len + value.len(), true),
                    );
                }
            }
            Operation::Pop { path } => {
                let array = self.resolve(root, path)?;
                let len = self.items(array, path)?.len();
                if len > 0 {
                    let removed = self.splice_items(array, path, len - 1, 1, &[])?;
                    applied.record(
                        Operation::Pop { path: path.clone() },
                        Operation::push(path.clone(), removed),
                        index_range(path, len - 1, len, true),
                    );
                }
            }
            Operation::Shift { path } => {
                let array = self.resolve(root, path)?;
                let len = self.items(array, path)?.len();
                if len > 0 {
                    let removed = self.splice_items(array, path, 0, 1, &[])?;
                    applied.record(
                        Operation::Shift { path: path.clone() },
                        Operation::Unshift {
                            path: path.clone(),
                            value: removed,
                        },
                        index_range(path, 0, len, true),
                    );
                }
            }
            Operation::Unshift { path, value } => {
                let array = self.resolve(root, path)?;
                let len = self.items(array, path)?.len();
                if !value.is_empty() {
                    self.splice_items(array, path, 0, 0, value)?;
                    applied.record(
                        Operation::Unshift {
                            path: path.clone(),
                            value: value.clone(),
                        },
                        Operation::splice(path.clone(), 0, value.len(), Vec::new()),
                        index_range(path, 0, len + value.len(), true),
                    );
                }
            }
            Operation::Splice {
                path,
                start,
                delete_count,
                value,
            } => {
                let array = self.resolve(root, path)?;
                let len = self.items(array, path)?.len();
                let removed = self.splice_items(array, path, *start, *delete_count, value)?;
                if !removed.is_empty() || !value.is_empty() {
                    let new_len = len - removed.len() + value.len();
                    let affected = if new_len == len {
                        index_range(path, *start, start + value.len(), false)
                    } else {
                        index_range(path, *start, len.max(new_len), true)
                    };
                    applied.record(
                        Operation::splice(path.clone(), *start, removed.len(), value.clone()),
                        Operation::splice(path.clone(), *start, value.len(), removed),
                        affected,
                    );
                }
            }
        }
        Ok(applied)
    }

    /// Replace `delete_count` items at `start` with new nodes for `values`,
    /// returning the snapshots of the removed items.
    fn splice_items(
        &mut self,
        array: Uid,
        path: &Path,
        start: usize,
        delete_count: usize,
        values: &[Value],
    ) -> Result<Vec<Value>> {
        let len = self.items(array, path)?.len();
        if start > len {
            return Err(Error::InvalidIndex {
                path: path.clone(),
                index: start,
                len,
            });
        }
        let end = start + delete_count.min(len - start);
        let doomed = self.items(array, path)?[start..end].to_vec();
        let removed = doomed
            .iter()
            .map(|&child| self.snapshot(child))
            .collect::<Result<Vec<_>>>()?;
        for child in doomed {
            self.kill(child);
        }
        let inserted: Vec<Uid> = values
            .iter()
            .map(|value| self.build(value, Some(array)))
            .collect();
        self.items_mut(array, path)?.splice(start..end, inserted);
        Ok(removed)
    }

    fn add(&mut self, root: Uid, path: &Path, value: &Value, applied: &mut Applied) -> Result<()> {
        let (parent_path, key) = split_last(path)?;
        let parent = self.resolve(root, &parent_path)?;
        match &self.node(parent)?.data {
            NodeData::Object(map) => {
                if let Some(&existing) = map.get(&key) {
                    return self.reconcile(existing, path, value, applied);
                }
                let child = self.build(value, Some(parent));
                self.entries_mut(parent, &parent_path)?.insert(key, child);
                applied.record(
                    Operation::add(path.clone(), value.clone()),
                    Operation::remove(path.clone()),
                    [path.clone(), parent_path.size()],
                );
            }
            NodeData::Array(items) => {
                let len = items.len();
                let index = if key == "-" {
                    len
                } else {
                    parse_index(&key, &parent_path)?
                };
                if index > len {
                    return Err(Error::InvalidIndex {
                        path: parent_path,
                        index,
                        len,
                    });
                }
                self.splice_items(parent, &parent_path, index, 0, std::slice::from_ref(value))?;
                let at = parent_path.join_index(index);
                applied.record(
                    Operation::add(at.clone(), value.clone()),
                    Operation::remove(at),
                    index_range(&parent_path, index, len + 1, true),
                );
            }
            NodeData::Leaf(_) => {
                return Err(Error::KindMismatch {
                    path: parent_path,
                    expected: "an object or array",
                });
            }
        }
        Ok(())
    }

    fn remove(&mut self, root: Uid, path: &Path, applied: &mut Applied) -> Result<()> {
        let (parent_path, key) = split_last(path)?;
        let parent = self.resolve(root, &parent_path)?;
        match &self.node(parent)?.data {
            NodeData::Object(map) => {
                let Some(&child) = map.get(&key) else {
                    return Err(Error::InvalidKey {
                        path: parent_path,
                        key,
                    });
                };
                let old = self.snapshot(child)?;
                self.kill(child);
                self.entries_mut(parent, &parent_path)?.shift_remove(&key);
                applied.record(
                    Operation::remove(path.clone()),
                    Operation::add(path.clone(), old),
                    [path.clone(), parent_path.size()],
                );
            }
            NodeData::Array(items) => {
                let len = items.len();
                let index = parse_index(&key, &parent_path)?;
                if index >= len {
                    return Err(Error::InvalidIndex {
                        path: parent_path,
                        index,
                        len,
                    });
                }
                let mut removed = self.splice_items(parent, &parent_path, index, 1, &[])?;
                let at = parent_path.join_index(index);
                applied.record(
                    Operation::remove(at.clone()),
                    Operation::add(at, removed.pop().unwrap_or(Value::Null)),
                    index_range(&parent_path, index, len, true),
                );
            }
            NodeData::Leaf(_) => {
                return Err(Error::KindMismatch {
                    path: parent_path,
                    expected: "an object or array",
                });
            }
        }
        Ok(())
    }

    fn move_entry(&mut self, root: Uid, from: &Path, to: &Path, applied: &mut Applied) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if to.starts_with(from) {
            return Err(Error::invalid_path(
                to.to_string(),
                format!("cannot move '{from}' into itself"),
            ));
        }
        let (from_parent_path, from_key) = split_last(from)?;
        let (to_parent_path, to_key) = split_last(to)?;
        let from_parent = self.resolve(root, &from_parent_path)?;
        let to_parent = self.resolve(root, &to_parent_path)?;
        let Some(&child) = self.entries(from_parent, &from_parent_path)?.get(&from_key) else {
            return Err(Error::InvalidKey {
                path: from_parent_path,
                key: from_key,
            });
        };
        if self.entries(to_parent, &to_parent_path)?.contains_key(&to_key) {
            return Err(Error::KeyExists {
                path: to_parent_path,
                key: to_key,
            });
        }

        self.entries_mut(from_parent, &from_parent_path)?
            .shift_remove(&from_key);
        self.entries_mut(to_parent, &to_parent_path)?
            .insert(to_key, child);
        self.node_mut(child)?.parent = Some(to_parent);

        let mut affected = vec![from.clone(), to.clone(), from_parent_path.size()];
        if to_parent_path != from_parent_path {
            affected.push(to_parent_path.size());
        }
        applied.record(
            Operation::Move {
                from: from.clone(),
                path: to.clone(),
            },
            Operation::Move {
                from: to.clone(),
                path: from.clone(),
            },
            affected,
        );
        Ok(())
    }

    /// Bring the subtree at `uid` in line with `value`, keeping the UIDs of
    /// every node that survives.
    pub(crate) fn reconcile(
        &mut self,
        uid: Uid,
        path: &Path,
        value: &Value,
        applied: &mut Applied,
    ) -> Result<()> {
        let shape = match (&self.node(uid)?.data, value) {
            (NodeData::Leaf(old), next) if !next.is_object() && !next.is_array() => {
                Shape::Leaf(old.clone())
            }
            (NodeData::Object(map), Value::Object(next)) => Shape::Object(map.clone(), next),
            (NodeData::Array(items), Value::Array(next)) => Shape::Array(items.clone(), next),
            _ => Shape::Rebuild,
        };

        match shape {
            Shape::Leaf(old) => {
                if &old != value {
                    self.node_mut(uid)?.data = NodeData::Leaf(value.clone());
                    applied.record(
                        Operation::replace(path.clone(), value.clone()),
                        Operation::replace(path.clone(), old),
                        [path.clone()],
                    );
                }
            }
            Shape::Object(current, next) => {
                for (key, &child) in &current {
                    if next.contains_key(key) {
                        continue;
                    }
                    let at = path.join(key.clone());
                    let old = self.snapshot(child)?;
                    self.kill(child);
                    self.entries_mut(uid, path)?.shift_remove(key);
                    applied.record(
                        Operation::remove(at.clone()),
                        Operation::add(at.clone(), old),
                        [at, path.size()],
                    );
                }
                for (key, child_value) in next {
                    let at = path.join(key.clone());
                    match current.get(key) {
                        Some(&child) => self.reconcile(child, &at, child_value, applied)?,
                        None => {
                            let child = self.build(child_value, Some(uid));
                            self.entries_mut(uid, path)?.insert(key.clone(), child);
                            applied.record(
                                Operation::add(at.clone(), child_value.clone()),
                                Operation::remove(at.clone()),
                                [at, path.size()],
                            );
                        }
                    }
                }
            }
            Shape::Array(current, next) => {
                let common = current.len().min(next.len());
                for (index, (&child, child_value)) in current.iter().zip(next).enumerate() {
                    self.reconcile(child, &path.join_index(index), child_value, applied)?;
                }
                if next.len() > current.len() {
                    let extra = next[common..].to_vec();
                    self.splice_items(uid, path, common, 0, &extra)?;
                    applied.record(
                        Operation::push(path.clone(), extra.clone()),
                        Operation::splice(path.clone(), common, extra.len(), Vec::new()),
                        index_range(path, common, next.len(), true),
                    );
                } else if next.len() < current.len() {
                    let removed =
                        self.splice_items(uid, path, common, current.len() - common, &[])?;
                    applied.record(
                        Operation::splice(path.clone(), common, removed.len(), Vec::new()),
                        Operation::push(path.clone(), removed),
                        index_range(path, common, current.len(), true),
                    );
                }
            }
            Shape::Rebuild => {
                let old = self.snapshot(uid)?;
                let children: Vec<Uid> = match &self.node(uid)?.data {
                    NodeData::Object(map) => map.values().copied().collect(),
                    NodeData::Array(items) => items.clone(),
                    NodeData::Leaf(_) => Vec::new(),
                };
                for child in children {
                    self.kill(child);
                }
                let data = self.build_data(value, uid);
                self.node_mut(uid)?.data = data;
                applied.record(
                    Operation::replace(path.clone(), value.clone()),
                    Operation::replace(path.clone(), old),
                    [path.clone()],
                );
            }
        }
        Ok(())
    }
}

fn split_last(path: &Path) -> Result<(Path, String)> {
    match (path.parent(), path.last()) {
        (Some(parent), Some(last)) => Ok((parent, last.to_owned())),
        _ => Err(Error::invalid_path(
            path.to_string(),
            "operation needs a parent container",
        )),
    }
}

fn parse_index(segment: &str, path: &Path) -> Result<usize> {
    segment.parse().map_err(|_| Error::InvalidKey {
        path: path.clone(),
        key: segment.to_owned(),
    })
}

/// Element paths `start..end` below `path`, plus its size path when the
/// length changed.
fn index_range(path: &Path, start: usize, end: usize, resized: bool) -> Vec<Path> {
    let mut paths: Vec<Path> = (start..end).map(|index| path.join_index(index)).collect();
    if resized {
        paths.push(path.size());
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn store_with(value: Value) -> (Store, Uid) {
        let mut store = Store::new();
        let root = store.build(&value, None);
        (store, root)
    }

    fn undo(store: &mut Store, root: Uid, applied: &Applied) {
        for (_, backward) in applied.pairs.iter().rev() {
            store.apply(root, backward).unwrap();
        }
    }

    #[test]
    fn replace_emits_only_changed_leaves() {
        let (mut store, root) = store_with(json!({"stats": {"health": 1, "force": 1}}));
        let applied = store
            .apply(
                root,
                &Operation::replace(p("/stats"), json!({"health": 10, "force": 1})),
            )
            .unwrap();
        assert_eq!(
            applied.pairs,
            vec![(
                Operation::replace(p("/stats/health"), json!(10)),
                Operation::replace(p("/stats/health"), json!(1)),
            )]
        );
        assert_eq!(applied.affected, vec![p("/stats/health")]);
        assert_eq!(
            store.snapshot(root).unwrap(),
            json!({"stats": {"health": 10, "force": 1}})
        );
    }

    #[test]
    fn push_inverts_to_splice_of_pushed_range() {
        let (mut store, root) = store_with(json!(["Fraktar", "Elwein"]));
        let applied = store
            .apply(root, &Operation::push(Path::root(), vec![json!("Ghost")]))
            .unwrap();
        assert_eq!(
            applied.pairs[0].1,
            Operation::splice(Path::root(), 2, 1, vec![])
        );
        assert_eq!(applied.affected, vec![p("/2"), Path::root().size()]);
        undo(&mut store, root, &applied);
        assert_eq!(store.snapshot(root).unwrap(), json!(["Fraktar", "Elwein"]));
    }

    #[test]
    fn pop_and_shift_invert_with_removed_element() {
        let (mut store, root) = store_with(json!([1, 2, 3]));
        let popped = store.apply(root, &Operation::Pop { path: Path::root() }).unwrap();
        assert_eq!(popped.pairs[0].1, Operation::push(Path::root(), vec![json!(3)]));
        let shifted = store
            .apply(root, &Operation::Shift { path: Path::root() })
            .unwrap();
        assert_eq!(
            shifted.pairs[0].1,
            Operation::Unshift {
                path: Path::root(),
                value: vec![json!(1)]
            }
        );
        assert_eq!(store.snapshot(root).unwrap(), json!([2]));
        undo(&mut store, root, &shifted);
        undo(&mut store, root, &popped);
        assert_eq!(store.snapshot(root).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn pop_on_empty_array_is_a_no_op() {
        let (mut store, root) = store_with(json!([]));
        let applied = store.apply(root, &Operation::Pop { path: Path::root() }).unwrap();
        assert!(applied.is_empty());
    }

    #[test]
    fn splice_clamps_delete_count_and_inverts() {
        let (mut store, root) = store_with(json!({"l": [1, 2, 3]}));
        let applied = store
            .apply(root, &Operation::splice(p("/l"), 1, 10, vec![json!("x")]))
            .unwrap();
        assert_eq!(
            applied.pairs[0],
            (
                Operation::splice(p("/l"), 1, 2, vec![json!("x")]),
                Operation::splice(p("/l"), 1, 1, vec![json!(2), json!(3)]),
            )
        );
        assert_eq!(store.snapshot(root).unwrap(), json!({"l": [1, "x"]}));
        undo(&mut store, root, &applied);
        assert_eq!(store.snapshot(root).unwrap(), json!({"l": [1, 2, 3]}));
    }

    #[test]
    fn splice_past_end_is_invalid_index() {
        let (mut store, root) = store_with(json!([1]));
        let err = store
            .apply(root, &Operation::splice(Path::root(), 3, 0, vec![]))
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidIndex {
                path: Path::root(),
                index: 3,
                len: 1
            }
        );
    }

    #[test]
    fn add_and_remove_object_keys() {
        let (mut store, root) = store_with(json!({"a": 1}));
        let added = store
            .apply(root, &Operation::add(p("/b"), json!({"c": 2})))
            .unwrap();
        assert_eq!(added.affected, vec![p("/b"), Path::root().size()]);
        let removed = store.apply(root, &Operation::remove(p("/a"))).unwrap();
        assert_eq!(removed.pairs[0].1, Operation::add(p("/a"), json!(1)));
        assert_eq!(store.snapshot(root).unwrap(), json!({"b": {"c": 2}}));
        undo(&mut store, root, &removed);
        undo(&mut store, root, &added);
        assert_eq!(store.snapshot(root).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn add_to_array_supports_dash() {
        let (mut store, root) = store_with(json!([1, 3]));
        store.apply(root, &Operation::add(p("/1"), json!(2))).unwrap();
        store.apply(root, &Operation::add(p("/-"), json!(4))).unwrap();
        assert_eq!(store.snapshot(root).unwrap(), json!([1, 2, 3, 4]));
    }

    #[test]
    fn remove_missing_key_fails_without_change() {
        let (mut store, root) = store_with(json!({"a": 1}));
        let err = store.apply(root, &Operation::remove(p("/zz"))).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidKey {
                path: Path::root(),
                key: "zz".into()
            }
        );
        assert_eq!(store.snapshot(root).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn move_keeps_identity_and_rejects_existing_target() {
        let (mut store, root) = store_with(json!({"a": {"x": 1}, "b": {}}));
        let moved = store.resolve(root, &p("/a")).unwrap();
        let applied = store
            .apply(
                root,
                &Operation::Move {
                    from: p("/a"),
                    path: p("/b/a"),
                },
            )
            .unwrap();
        assert_eq!(store.resolve(root, &p("/b/a")).unwrap(), moved);
        assert_eq!(store.path_of(moved).unwrap(), (root, p("/b/a")));
        undo(&mut store, root, &applied);
        assert_eq!(store.snapshot(root).unwrap(), json!({"a": {"x": 1}, "b": {}}));

        let err = store
            .apply(
                root,
                &Operation::Move {
                    from: p("/a"),
                    path: p("/b"),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::KeyExists { .. }));
    }

    #[test]
    fn kind_change_rebuilds_in_place() {
        let (mut store, root) = store_with(json!({"v": [1, 2]}));
        let target = store.resolve(root, &p("/v")).unwrap();
        let applied = store
            .apply(root, &Operation::replace(p("/v"), json!({"k": true})))
            .unwrap();
        assert_eq!(store.resolve(root, &p("/v")).unwrap(), target);
        assert_eq!(
            applied.pairs[0].1,
            Operation::replace(p("/v"), json!([1, 2]))
        );
        undo(&mut store, root, &applied);
        assert_eq!(store.snapshot(root).unwrap(), json!({"v": [1, 2]}));
    }

    #[test]
    fn array_reconcile_shrinks_and_grows() {
        let (mut store, root) = store_with(json!([1, 2, 3]));
        let first = store.resolve(root, &p("/0")).unwrap();
        let applied = store
            .apply(root, &Operation::replace(Path::root(), json!([1, 5])))
            .unwrap();
        assert_eq!(store.resolve(root, &p("/0")).unwrap(), first);
        assert_eq!(applied.pairs.len(), 2);
        undo(&mut store, root, &applied);
        assert_eq!(store.snapshot(root).unwrap(), json!([1, 2, 3]));

        let grown = store
            .apply(root, &Operation::replace(Path::root(), json!([1, 2, 3, 4])))
            .unwrap();
        assert_eq!(
            grown.pairs,
            vec![(
                Operation::push(Path::root(), vec![json!(4)]),
                Operation::splice(Path::root(), 3, 1, vec![]),
            )]
        );
    }

    #[test]
    fn snapshot_cache_is_invalidated_up_the_chain() {
        let (mut store, root) = store_with(json!({"a": {"b": 1}}));
        assert_eq!(store.snapshot(root).unwrap(), json!({"a": {"b": 1}}));
        store
            .apply(root, &Operation::replace(p("/a/b"), json!(2)))
            .unwrap();
        assert_eq!(store.snapshot(root).unwrap(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn journal_rollback_restores_data_and_identity() {
        let (mut store, root) = store_with(json!(["Fraktar", "Elwein"]));
        let elwein = store.resolve(root, &p("/1")).unwrap();
        assert_eq!(store.snapshot(root).unwrap(), json!(["Fraktar", "Elwein"]));

        store.begin_journal();
        store
            .apply(root, &Operation::push(Path::root(), vec![json!("Ghost")]))
            .unwrap();
        store.apply(root, &Operation::Shift { path: Path::root() }).unwrap();
        let ghost = store.resolve(root, &p("/1")).unwrap();
        assert_eq!(store.snapshot(root).unwrap(), json!(["Elwein", "Ghost"]));
        let removed = store.rollback_journal().unwrap();

        assert_eq!(removed, vec![ghost]);
        assert!(!store.uids().contains(ghost));
        assert_eq!(store.snapshot(root).unwrap(), json!(["Fraktar", "Elwein"]));
        assert_eq!(store.resolve(root, &p("/1")).unwrap(), elwein);
        assert!(store.uids().contains(store.resolve(root, &p("/0")).unwrap()));
    }

    #[test]
    fn resolve_reports_where_it_failed() {
        let (store, root) = store_with(json!({"a": [1], "s": "x"}));
        assert!(matches!(
            store.resolve(root, &p("/a/4")),
            Err(Error::InvalidIndex { index: 4, len: 1, .. })
        ));
        assert!(matches!(
            store.resolve(root, &p("/a/x")),
            Err(Error::InvalidKey { .. })
        ));
        assert_eq!(
            store.resolve(root, &p("/s/t")),
            Err(Error::KindMismatch {
                path: p("/s"),
                expected: "an object or array"
            })
        );
    }

    #[test]
    fn path_of_nested_value() {
        let (store, root) = store_with(json!({"party": [{"name": "Elwein"}]}));
        let name = store.resolve(root, &p("/party/0/name")).unwrap();
        assert_eq!(store.path_of(name).unwrap(), (root, p("/party/0/name")));
        assert_eq!(store.path_of(root).unwrap(), (root, Path::root()));
    }
}

#![forbid(unsafe_code)]

//! Handles on observable values.
//!
//! A [`ValueRef`] is a copyable UID. Reads record what they touched with the
//! running observer; writes become operations applied to the value's root
//! and logged in the open transaction.

use canopy_core::{Error, Operation, Path, Result, Uid};
use serde_json::Value;

use crate::container::Container;
use crate::store::NodeData;

/// Handle on one node of an observable value tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef {
    uid: Uid,
}

impl ValueRef {
    pub(crate) fn new(uid: Uid) -> Self {
        Self { uid }
    }

    #[must_use]
    pub fn uid(self) -> Uid {
        self.uid
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    /// Snapshot of the value. Records a read of its path.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownUid`] if the value has been removed.
    pub fn get(self, cx: &Container) -> Result<Value> {
        cx.read_value(self.uid)
    }

    /// Number of array elements or object keys. Records a read of the
    /// container's size only, so element writes do not reach the reader.
    ///
    /// # Errors
    ///
    /// [`Error::KindMismatch`] on a leaf.
    pub fn len(self, cx: &Container) -> Result<usize> {
        cx.read_shape(self.uid, |store, uid, path| store.len(uid, path))
    }

    /// # Errors
    ///
    /// As [`len`](Self::len).
    pub fn is_empty(self, cx: &Container) -> Result<bool> {
        self.len(cx).map(|len| len == 0)
    }

    /// Keys of an object, in insertion order. Records a read of the key set.
    ///
    /// # Errors
    ///
    /// [`Error::KindMismatch`] unless the value is an object.
    pub fn keys(self, cx: &Container) -> Result<Vec<String>> {
        cx.read_shape(self.uid, |store, uid, path| store.keys(uid, path))
    }

    /// Path from the root, or `None` once the value is gone.
    #[must_use]
    pub fn path(self, cx: &Container) -> Option<Path> {
        cx.inspect(|store| store.path_of(self.uid).ok().map(|(_, path)| path))
    }

    /// # Errors
    ///
    /// [`Error::UnknownUid`] if the value has been removed.
    pub fn root(self, cx: &Container) -> Result<ValueRef> {
        cx.inspect(|store| store.path_of(self.uid).map(|(root, _)| ValueRef::new(root)))
    }

    #[must_use]
    pub fn parent(self, cx: &Container) -> Option<ValueRef> {
        cx.inspect(|store| store.node(self.uid).ok()?.parent.map(ValueRef::new))
    }

    /// Position in the parent array, if the parent is an array.
    #[must_use]
    pub fn index(self, cx: &Container) -> Option<usize> {
        cx.inspect(|store| {
            let parent = store.node(self.uid).ok()?.parent?;
            match &store.node(parent).ok()?.data {
                NodeData::Array(items) => items.iter().position(|child| *child == self.uid),
                _ => None,
            }
        })
    }

    /// Direct child by object key or array index. Navigation only, no read
    /// is recorded.
    ///
    /// # Errors
    ///
    /// Path errors from resolving `key`.
    pub fn child(self, cx: &Container, key: &str) -> Result<ValueRef> {
        self.at(cx, &Path::root().join(key))
    }

    /// Descendant at a relative path. Navigation only.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`], [`Error::InvalidIndex`] or
    /// [`Error::KindMismatch`] at the first segment that does not resolve.
    pub fn at(self, cx: &Container, path: &Path) -> Result<ValueRef> {
        cx.inspect(|store| store.resolve(self.uid, path).map(ValueRef::new))
    }

    #[must_use]
    pub fn is_alive(self, cx: &Container) -> bool {
        cx.inspect(|store| store.contains(self.uid))
    }

    // ─── Writes ─────────────────────────────────────────────────────────

    /// Apply operations whose paths are relative to this value.
    ///
    /// # Errors
    ///
    /// [`Error::NotWritable`] outside a transaction, [`Error::ReadOnly`] on
    /// a computed tree, or the first operation error.
    pub fn apply(self, cx: &Container, operations: &[Operation]) -> Result<()> {
        cx.apply_operations(self.uid, operations).map(drop)
    }

    /// Replace the value, reconciling containers in place.
    ///
    /// # Errors
    ///
    /// As [`apply`](Self::apply).
    pub fn set(self, cx: &Container, value: Value) -> Result<()> {
        self.apply(cx, &[Operation::replace(Path::root(), value)])
    }

    /// Insert or replace an object key.
    ///
    /// # Errors
    ///
    /// As [`apply`](Self::apply).
    pub fn set_key(self, cx: &Container, key: &str, value: Value) -> Result<()> {
        self.apply(cx, &[Operation::add(Path::root().join(key), value)])
    }

    /// # Errors
    ///
    /// [`Error::InvalidKey`] if the key is missing, otherwise as
    /// [`apply`](Self::apply).
    pub fn remove_key(self, cx: &Container, key: &str) -> Result<()> {
        self.apply(cx, &[Operation::remove(Path::root().join(key))])
    }

    /// Rename an object key, keeping the entry's identity.
    ///
    /// # Errors
    ///
    /// [`Error::KeyExists`] if `to` is taken, otherwise as
    /// [`apply`](Self::apply).
    pub fn move_key(self, cx: &Container, from: &str, to: &str) -> Result<()> {
        self.apply(
            cx,
            &[Operation::Move {
                from: Path::root().join(from),
                path: Path::root().join(to),
            }],
        )
    }

    /// # Errors
    ///
    /// [`Error::KindMismatch`] unless the value is an array, otherwise as
    /// [`apply`](Self::apply).
    pub fn push(self, cx: &Container, values: impl IntoIterator<Item = Value>) -> Result<()> {
        self.apply(
            cx,
            &[Operation::push(Path::root(), values.into_iter().collect())],
        )
    }

    /// Remove and return the last element.
    ///
    /// # Errors
    ///
    /// As [`push`](Self::push).
    pub fn pop(self, cx: &Container) -> Result<Option<Value>> {
        let pairs = cx.apply_operations(self.uid, &[Operation::Pop { path: Path::root() }])?;
        Ok(pairs.into_iter().find_map(|(_, backward)| match backward {
            Operation::Push { value, .. } => value.into_iter().next(),
            _ => None,
        }))
    }

    /// Remove and return the first element.
    ///
    /// # Errors
    ///
    /// As [`push`](Self::push).
    pub fn shift(self, cx: &Container) -> Result<Option<Value>> {
        let pairs = cx.apply_operations(self.uid, &[Operation::Shift { path: Path::root() }])?;
        Ok(pairs.into_iter().find_map(|(_, backward)| match backward {
            Operation::Unshift { value, .. } => value.into_iter().next(),
            _ => None,
        }))
    }

    /// # Errors
    ///
    /// As [`push`](Self::push).
    pub fn unshift(self, cx: &Container, values: impl IntoIterator<Item = Value>) -> Result<()> {
        self.apply(
            cx,
            &[Operation::Unshift {
                path: Path::root(),
                value: values.into_iter().collect(),
            }],
        )
    }

    /// Remove `delete_count` elements at `start`, insert `values` there and
    /// return the removed elements.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidIndex`] if `start` is past the end, otherwise as
    /// [`push`](Self::push).
    pub fn splice(
        self,
        cx: &Container,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>> {
        let pairs = cx.apply_operations(
            self.uid,
            &[Operation::splice(
                Path::root(),
                start,
                delete_count,
                values.into_iter().collect(),
            )],
        )?;
        Ok(pairs
            .into_iter()
            .find_map(|(_, backward)| match backward {
                Operation::Splice { value, .. } => Some(value),
                _ => None,
            })
            .unwrap_or_default())
    }
}

impl std::fmt::Display for ValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "value {}", self.uid)
    }
}

/// Convenience for tests and collaborators that only hold a UID.
impl From<ValueRef> for Uid {
    fn from(value: ValueRef) -> Self {
        value.uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn navigation_and_shape_reads() {
        let cx = Container::new();
        let root = cx.create_root(json!({"party": ["Fraktar", "Elwein"], "gold": 3}));
        let party = root.child(&cx, "party").unwrap();
        let elwein = party.child(&cx, "1").unwrap();
        assert_eq!(elwein.get(&cx).unwrap(), json!("Elwein"));
        assert_eq!(elwein.index(&cx), Some(1));
        assert_eq!(elwein.parent(&cx), Some(party));
        assert_eq!(elwein.root(&cx).unwrap(), root);
        assert_eq!(elwein.path(&cx).unwrap().to_string(), "/party/1");
        assert_eq!(party.len(&cx).unwrap(), 2);
        assert_eq!(root.keys(&cx).unwrap(), vec!["party", "gold"]);
        assert!(matches!(
            root.child(&cx, "gold").unwrap().len(&cx),
            Err(Error::KindMismatch { .. })
        ));
        assert_eq!(root.index(&cx), None);
    }

    #[test]
    fn writes_need_a_transaction() {
        let cx = Container::new();
        let root = cx.create_root(json!({"a": 1}));
        assert_eq!(
            root.set_key(&cx, "a", json!(2)),
            Err(Error::NotWritable(root.uid()))
        );
        assert_eq!(root.get(&cx).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn array_helpers_return_removed_elements() {
        let cx = Container::new();
        let list = cx.create_root(json!([1, 2, 3, 4]));
        let (popped, shifted, spliced) = cx
            .transaction(|cx| {
                let popped = list.pop(cx)?;
                let shifted = list.shift(cx)?;
                list.unshift(cx, [json!(0)])?;
                let spliced = list.splice(cx, 1, 1, [json!("x"), json!("y")])?;
                list.push(cx, [json!(9)])?;
                Ok((popped, shifted, spliced))
            })
            .unwrap();
        assert_eq!(popped, Some(json!(4)));
        assert_eq!(shifted, Some(json!(1)));
        assert_eq!(spliced, vec![json!(2)]);
        assert_eq!(list.get(&cx).unwrap(), json!([0, "x", "y", 3, 9]));
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let cx = Container::new();
        let list = cx.create_root(json!([]));
        assert_eq!(cx.transaction(|cx| list.pop(cx)).unwrap(), None);
    }

    #[test]
    fn object_helpers() {
        let cx = Container::new();
        let root = cx.create_root(json!({"a": {"x": 1}}));
        let a = root.child(&cx, "a").unwrap();
        cx.transaction(|cx| {
            root.move_key(cx, "a", "b")?;
            root.set_key(cx, "c", json!(true))?;
            root.remove_key(cx, "c")
        })
        .unwrap();
        assert_eq!(root.get(&cx).unwrap(), json!({"b": {"x": 1}}));
        assert_eq!(root.child(&cx, "b").unwrap(), a);
        assert!(a.is_alive(&cx));
    }
}

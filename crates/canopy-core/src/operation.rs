#![forbid(unsafe_code)]

//! Mutation proposals.
//!
//! An [`Operation`] is the one artifact that crosses the runtime boundary:
//! value collaborators accept them, transactions log them as migrations, and
//! other containers replay them. The JSON shape is
//! `{"op": "...", "path": "/ptr", "value"?, "from"?, "start"?, "deleteCount"?}`.
//!
//! Paths are relative to the root of the tree the operation is applied to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;

/// A single mutation of a value tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    /// Replace the value at `path`. Containers are reconciled in place.
    Replace { path: Path, value: Value },
    /// Insert an object key, or an array element at an index.
    Add { path: Path, value: Value },
    /// Delete an object key or an array element.
    Remove { path: Path },
    /// Move an object entry to a new key.
    Move { from: Path, path: Path },
    /// Append elements to the array at `path`.
    Push {
        path: Path,
        #[serde(default)]
        value: Vec<Value>,
    },
    /// Remove the last element of the array at `path`.
    Pop { path: Path },
    /// Remove the first element of the array at `path`.
    Shift { path: Path },
    /// Prepend elements to the array at `path`.
    Unshift {
        path: Path,
        #[serde(default)]
        value: Vec<Value>,
    },
    /// Remove `delete_count` elements at `start` and insert `value` there.
    Splice {
        path: Path,
        start: usize,
        #[serde(rename = "deleteCount")]
        delete_count: usize,
        #[serde(default)]
        value: Vec<Value>,
    },
}

impl Operation {
    #[must_use]
    pub fn replace(path: Path, value: Value) -> Self {
        Self::Replace { path, value }
    }

    #[must_use]
    pub fn add(path: Path, value: Value) -> Self {
        Self::Add { path, value }
    }

    #[must_use]
    pub fn remove(path: Path) -> Self {
        Self::Remove { path }
    }

    #[must_use]
    pub fn push(path: Path, value: Vec<Value>) -> Self {
        Self::Push { path, value }
    }

    #[must_use]
    pub fn splice(path: Path, start: usize, delete_count: usize, value: Vec<Value>) -> Self {
        Self::Splice {
            path,
            start,
            delete_count,
            value,
        }
    }

    /// The `op` tag as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Replace { .. } => "replace",
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Move { .. } => "move",
            Self::Push { .. } => "push",
            Self::Pop { .. } => "pop",
            Self::Shift { .. } => "shift",
            Self::Unshift { .. } => "unshift",
            Self::Splice { .. } => "splice",
        }
    }

    /// The target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Replace { path, .. }
            | Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Move { path, .. }
            | Self::Push { path, .. }
            | Self::Pop { path }
            | Self::Shift { path }
            | Self::Unshift { path, .. }
            | Self::Splice { path, .. } => path,
        }
    }

    /// Prefix every path of the operation, turning an operation relative to
    /// a subtree into one relative to the subtree's root.
    #[must_use]
    pub fn rebased(&self, prefix: &Path) -> Self {
        if prefix.is_root() {
            return self.clone();
        }
        let mut op = self.clone();
        match &mut op {
            Self::Move { from, path } => {
                *from = prefix.concat(from);
                *path = prefix.concat(path);
            }
            Self::Replace { path, .. }
            | Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Push { path, .. }
            | Self::Pop { path }
            | Self::Shift { path }
            | Self::Unshift { path, .. }
            | Self::Splice { path, .. } => *path = prefix.concat(path),
        }
        op
    }
}

#![forbid(unsafe_code)]

//! Forward/backward change logs.
//!
//! A [`Migration`] records one transaction's effect on one root as pairs of
//! operations: `forward[i]` is what was applied, `backward[i]` undoes it.
//!
//! # Invariants
//!
//! 1. `forward.len() == backward.len()`; pairs are appended together.
//! 2. Applying `forward` in order, then `backward` in *reverse* order,
//!    restores the original snapshot (see [`undo_operations`]).
//! 3. `inverted().inverted() == self`.
//!
//! [`undo_operations`]: Migration::undo_operations

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// Forward and backward operation lists, in call order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Operations as applied.
    pub forward: Vec<Operation>,
    /// Inverse of each forward operation, same index.
    pub backward: Vec<Operation>,
}

impl Migration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one forward/backward pair.
    pub fn push(&mut self, forward: Operation, backward: Operation) {
        self.forward.push(forward);
        self.backward.push(backward);
    }

    /// Number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Append every pair of `other` after the pairs of `self`.
    pub fn merge(&mut self, other: Migration) {
        self.forward.extend(other.forward);
        self.backward.extend(other.backward);
    }

    /// The migration that undoes this one.
    #[must_use]
    pub fn inverted(&self) -> Migration {
        Migration {
            forward: self.backward.iter().rev().cloned().collect(),
            backward: self.forward.iter().rev().cloned().collect(),
        }
    }

    /// Backward operations in the order they must be applied.
    #[must_use]
    pub fn undo_operations(&self) -> Vec<Operation> {
        self.backward.iter().rev().cloned().collect()
    }

    /// Iterate `(forward, backward)` pairs in call order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Operation, &Operation)> {
        self.forward.iter().zip(self.backward.iter())
    }

    /// Take the recorded pairs, leaving this migration empty.
    pub fn take(&mut self) -> Migration {
        std::mem::take(self)
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
    }
}

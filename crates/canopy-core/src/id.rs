#![forbid(unsafe_code)]

//! Identifiers and the UID registry.
//!
//! Values and observers share one UID space so the dependency graph can hold
//! both kinds of node without a tagged key. Transactions use a separate,
//! monotonically increasing [`TxId`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unique identifier of an observable value or an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(u64);

impl Uid {
    /// Create a UID from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw UID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a transaction, unique within one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(u64);

impl TxId {
    /// Create a transaction id from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Registry of live UIDs.
///
/// # Invariants
///
/// 1. `next_uid` never returns a UID that is currently live.
/// 2. A UID passed to `use_uid` is live afterwards, and the counter has moved
///    past it so later allocations cannot collide.
#[derive(Debug, Clone)]
pub struct UidAllocator {
    next: u64,
    live: HashSet<Uid>,
}

impl UidAllocator {
    /// Create an empty registry. The first allocated UID is `#1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 1,
            live: HashSet::new(),
        }
    }

    /// Allocate a fresh UID and mark it live.
    pub fn next_uid(&mut self) -> Uid {
        loop {
            let uid = Uid(self.next);
            self.next += 1;
            if self.live.insert(uid) {
                return uid;
            }
        }
    }

    /// Claim a UID chosen by the caller (for example one carried by a
    /// snapshot being restored).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateUid`] if the UID is already live.
    pub fn use_uid(&mut self, uid: Uid) -> Result<()> {
        if !self.live.insert(uid) {
            return Err(Error::DuplicateUid(uid));
        }
        if uid.0 >= self.next {
            self.next = uid.0 + 1;
        }
        Ok(())
    }

    /// Release a UID. Returns `false` if it was not live.
    pub fn remove_uid(&mut self, uid: Uid) -> bool {
        self.live.remove(&uid)
    }

    /// Whether the UID is currently live.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.live.contains(&uid)
    }

    /// Number of live UIDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no UID is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Release every UID. The counter is not rewound, so UIDs handed out
    /// before the clear stay unique.
    pub fn clear(&mut self) {
        self.live.clear();
    }
}

impl Default for UidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_sequential() {
        let mut uids = UidAllocator::new();
        assert_eq!(uids.next_uid(), Uid::new(1));
        assert_eq!(uids.next_uid(), Uid::new(2));
        assert_eq!(uids.len(), 2);
    }

    #[test]
    fn use_uid_moves_counter_past_claimed_value() {
        let mut uids = UidAllocator::new();
        uids.use_uid(Uid::new(10)).unwrap();
        assert_eq!(uids.next_uid(), Uid::new(11));
    }

    #[test]
    fn use_uid_rejects_live_uid() {
        let mut uids = UidAllocator::new();
        let uid = uids.next_uid();
        assert_eq!(uids.use_uid(uid), Err(Error::DuplicateUid(uid)));
    }

    #[test]
    fn removed_uid_can_be_claimed_again() {
        let mut uids = UidAllocator::new();
        let uid = uids.next_uid();
        assert!(uids.remove_uid(uid));
        assert!(!uids.remove_uid(uid));
        uids.use_uid(uid).unwrap();
        assert!(uids.contains(uid));
    }

    #[test]
    fn clear_keeps_counter() {
        let mut uids = UidAllocator::new();
        uids.next_uid();
        uids.clear();
        assert!(uids.is_empty());
        assert_eq!(uids.next_uid(), Uid::new(2));
    }

    #[test]
    fn display_formats() {
        assert_eq!(Uid::new(7).to_string(), "#7");
        assert_eq!(TxId::new(3).to_string(), "tx3");
    }
}

#![forbid(unsafe_code)]

//! Core data structures for the Canopy reactive-state runtime.
//!
//! Everything in this crate is plain data plus algorithms over it; nothing
//! here runs user code. The runtime crate wires these pieces together:
//!
//! - [`id`]: process-unique identifiers for values, observers and transactions.
//! - [`path`]: JSON-pointer paths and the `(source, path)` pairs observers read.
//! - [`operation`]: the mutation proposal format shared with value collaborators.
//! - [`migration`]: forward/backward operation logs produced by transactions.
//! - [`graph`]: the dependency graph between values and observers.
//! - [`spy`]: the per-run read tracker ("spy") used to rebuild dependencies.

pub mod error;
pub mod graph;
pub mod id;
pub mod migration;
pub mod operation;
pub mod path;
pub mod spy;

pub use error::{Error, Result};
pub use graph::{DependencyGraph, GraphError};
pub use id::{TxId, Uid, UidAllocator};
pub use migration::Migration;
pub use operation::Operation;
pub use path::{Path, ReadPath};
pub use spy::{PathTracker, PauseToken};

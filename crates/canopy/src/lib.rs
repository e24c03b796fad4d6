#![forbid(unsafe_code)]

//! Canopy public facade crate.
//!
//! Re-exports the container, handles and data types that applications use,
//! plus `serde_json`'s `Value` and `json!` so callers need no extra import.

pub use canopy_core::{
    DependencyGraph, Error, GraphError, Migration, Operation, Path, ReadPath, Result, TxId, Uid,
};
pub use canopy_runtime::{
    Computed, Container, ContainerConfig, ListenerId, ObserverKind, Reaction, ValueRef, When,
};
pub use serde_json::{Value, json};

pub mod prelude {
    pub use canopy_core as core;
    pub use canopy_runtime as runtime;

    pub use crate::{Container, ContainerConfig, Error, Operation, Path, Result, ValueRef, json};
}

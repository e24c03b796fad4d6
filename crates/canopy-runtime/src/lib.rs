#![forbid(unsafe_code)]

//! Reactive-state runtime for Canopy.
//!
//! A [`Container`] holds JSON-shaped observable values, the observers that
//! read them and the dependency graph between the two. Writes happen inside
//! [`Container::transaction`]; a successful root transaction delivers its
//! [`Migration`]s to listeners and re-runs what the writes invalidated, a
//! failed one restores every value exactly.
//!
//! ```
//! use canopy_runtime::Container;
//! use serde_json::json;
//!
//! let cx = Container::new();
//! let player = cx.create_root(json!({"stats": {"health": 1}}));
//! let health = cx
//!     .computed(move |cx| player.at(cx, &"/stats/health".parse()?)?.get(cx))
//!     .unwrap();
//!
//! cx.transaction(|cx| player.child(cx, "stats")?.set_key(cx, "health", json!(10)))
//!     .unwrap();
//! assert_eq!(health.get(&cx).unwrap(), json!(10));
//! ```

pub mod config;
pub mod container;
pub mod observer;
mod store;
pub mod value_ref;

pub use canopy_core::{Error, Migration, Operation, Path, ReadPath, Result, TxId, Uid};
pub use config::ContainerConfig;
pub use container::{Container, ListenerId};
pub use observer::{Computed, ObserverKind, Reaction, When};
pub use value_ref::ValueRef;

#![forbid(unsafe_code)]

//! Observers: eager reactions, memoized computations and one-shot effects.
//!
//! All four kinds share one slot layout in the container: a staleness flag,
//! the read paths recorded during the last successful run, and a body that
//! holds the user functions. The handles returned to callers ([`Reaction`],
//! [`Computed`], [`When`]) are plain ids; every operation goes through the
//! [`Container`] that owns the slot.
//!
//! # State machine
//!
//! ```text
//! UNINITIALIZED ──construct──▶ ALIVE(stale) ──run──▶ ALIVE(fresh)
//!                                  ▲                      │
//!                                  └──input changed───────┘
//! any ALIVE state ──dispose──▶ DISPOSED
//! ```
//!
//! While a user function runs it is taken out of its slot, so the container
//! can be re-entered from inside the function without holding a borrow.

use canopy_core::{Error, ReadPath, Result, Uid};
use serde_json::Value;

use crate::container::Container;
use crate::value_ref::ValueRef;

pub(crate) type ReactionFn = Box<dyn FnMut(&Container) -> Result<()>>;
pub(crate) type ComputeFn = Box<dyn FnMut(&Container) -> Result<Value>>;
pub(crate) type PredicateFn = Box<dyn FnMut(&Container) -> Result<bool>>;
pub(crate) type EffectFn = Box<dyn FnOnce(&Container) -> Result<()>>;

/// The four observer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    /// Eager side effect re-run after every relevant commit.
    Reaction,
    /// Memoized computation whose value is held boxed in the observer.
    Computed,
    /// Memoized computation whose value is an observable tree.
    ObservableComputed,
    /// Predicate that fires an effect once, then disposes itself.
    When,
}

impl ObserverKind {
    /// Memoized kinds only run when read or when they have an active reader.
    #[must_use]
    pub fn is_memoized(self) -> bool {
        matches!(self, Self::Computed | Self::ObservableComputed)
    }

    /// Eager kinds run at the end of every propagation that marks them.
    #[must_use]
    pub fn is_eager(self) -> bool {
        matches!(self, Self::Reaction | Self::When)
    }
}

pub(crate) enum Body {
    Reaction(Option<ReactionFn>),
    Computed {
        compute: Option<ComputeFn>,
        value: Option<Value>,
    },
    Observable {
        compute: Option<ComputeFn>,
        tree: Option<Uid>,
    },
    When {
        predicate: Option<PredicateFn>,
        effect: Option<EffectFn>,
    },
}

/// A user function taken out of its slot for the duration of a run.
pub(crate) enum Job {
    Reaction(ReactionFn),
    Compute(ComputeFn),
    Predicate(PredicateFn),
}

pub(crate) enum JobOutput {
    Done,
    Value(Value),
    Predicate(bool),
}

impl Job {
    /// Whether writes must be refused while this job runs.
    pub(crate) fn is_computation(&self) -> bool {
        !matches!(self, Self::Reaction(_))
    }

    pub(crate) fn call(mut self, cx: &Container) -> (Self, Result<JobOutput>) {
        let output = match &mut self {
            Self::Reaction(f) => f(cx).map(|()| JobOutput::Done),
            Self::Compute(f) => f(cx).map(JobOutput::Value),
            Self::Predicate(f) => f(cx).map(JobOutput::Predicate),
        };
        (self, output)
    }
}

impl Body {
    pub(crate) fn kind(&self) -> ObserverKind {
        match self {
            Self::Reaction(_) => ObserverKind::Reaction,
            Self::Computed { .. } => ObserverKind::Computed,
            Self::Observable { .. } => ObserverKind::ObservableComputed,
            Self::When { .. } => ObserverKind::When,
        }
    }

    pub(crate) fn take_job(&mut self) -> Option<Job> {
        match self {
            Self::Reaction(f) => f.take().map(Job::Reaction),
            Self::Computed { compute, .. } | Self::Observable { compute, .. } => {
                compute.take().map(Job::Compute)
            }
            Self::When { predicate, .. } => predicate.take().map(Job::Predicate),
        }
    }

    pub(crate) fn restore(&mut self, job: Job) {
        match (self, job) {
            (Self::Reaction(slot), Job::Reaction(f)) => *slot = Some(f),
            (Self::Computed { compute, .. }, Job::Compute(f))
            | (Self::Observable { compute, .. }, Job::Compute(f)) => *compute = Some(f),
            (Self::When { predicate, .. }, Job::Predicate(f)) => *predicate = Some(f),
            _ => {}
        }
    }

    /// Root of the produced tree, for observable computations.
    pub(crate) fn tree(&self) -> Option<Uid> {
        match self {
            Self::Observable { tree, .. } => *tree,
            _ => None,
        }
    }
}

pub(crate) struct ObserverSlot {
    pub(crate) stale: bool,
    pub(crate) running: bool,
    pub(crate) dependencies: Vec<ReadPath>,
    pub(crate) body: Body,
}

impl ObserverSlot {
    pub(crate) fn new(body: Body) -> Self {
        Self {
            stale: true,
            running: false,
            dependencies: Vec::new(),
            body,
        }
    }

    pub(crate) fn kind(&self) -> ObserverKind {
        self.body.kind()
    }

    /// Whether a write to any of `paths` under `source` may change what the
    /// last run read.
    pub(crate) fn reads_affected(&self, source: Uid, paths: &[canopy_core::Path]) -> bool {
        self.dependencies
            .iter()
            .any(|read| paths.iter().any(|path| read.is_affected_by(source, path)))
    }

    /// The graph node downstream readers depend on.
    pub(crate) fn output(&self, id: Uid) -> Uid {
        self.body.tree().unwrap_or(id)
    }
}

macro_rules! observer_handle {
    ($name:ident) => {
        impl $name {
            pub(crate) fn new(id: Uid) -> Self {
                Self { id }
            }

            /// Observer id, shared with the dependency graph.
            #[must_use]
            pub fn id(self) -> Uid {
                self.id
            }

            /// Remove the observer from its container.
            ///
            /// # Errors
            ///
            /// [`Error::Disposed`] if it was already disposed.
            pub fn dispose(self, cx: &Container) -> Result<()> {
                cx.dispose(self.id)
            }

            #[must_use]
            pub fn is_alive(self, cx: &Container) -> bool {
                cx.observer_kind(self.id).is_some()
            }

            /// # Errors
            ///
            /// [`Error::Disposed`] if the observer is gone.
            pub fn is_stale(self, cx: &Container) -> Result<bool> {
                cx.is_stale(self.id)
            }

            /// Paths read by the last successful run.
            ///
            /// # Errors
            ///
            /// [`Error::Disposed`] if the observer is gone.
            pub fn dependencies(self, cx: &Container) -> Result<Vec<ReadPath>> {
                cx.dependencies(self.id)
            }
        }
    };
}

/// Handle of an eager reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reaction {
    id: Uid,
}

/// Handle of a memoized computation, boxed or observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Computed {
    id: Uid,
}

/// Handle of a one-shot predicate/effect pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct When {
    id: Uid,
}

observer_handle!(Reaction);
observer_handle!(Computed);
observer_handle!(When);

impl Computed {
    /// Current value, recomputed first if stale. Records a read of the
    /// computation for whoever is running.
    ///
    /// # Errors
    ///
    /// - [`Error::CircularRead`] when called from the computation's own run.
    /// - [`Error::ObserverFailed`] when the recomputation fails; the
    ///   computation is disposed.
    /// - [`Error::Disposed`] if it was disposed earlier.
    pub fn get(self, cx: &Container) -> Result<Value> {
        cx.computed_get(self.id)
    }

    /// Handle on the produced tree of an observable computation, refreshed
    /// first if stale.
    ///
    /// # Errors
    ///
    /// [`Error::NotObservable`] for boxed computations, otherwise as
    /// [`get`](Self::get).
    pub fn value(self, cx: &Container) -> Result<ValueRef> {
        cx.computed_tree(self.id)
    }

    /// # Errors
    ///
    /// [`Error::Disposed`] if the computation is gone.
    pub fn kind(self, cx: &Container) -> Result<ObserverKind> {
        cx.observer_kind(self.id).ok_or(Error::Disposed(self.id))
    }
}

#![forbid(unsafe_code)]

use thiserror::Error;

use crate::graph::GraphError;
use crate::id::Uid;
use crate::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the runtime and its collaborators.
///
/// Three groups, by how the runtime treats them:
///
/// - Write outside a transaction (`NotWritable`, `ComputationInProgress`,
///   `ReadOnly`): raised before anything changes.
/// - Invariant violations (`UnknownUid`, `DuplicateUid`, `Graph`, index, key
///   and kind errors, `SpyMismatch`): structural problems, never recovered
///   silently. Inside a transaction they trigger rollback like any error.
/// - Failures of user code (`User`, `ObserverFailed`): returned to the
///   transaction boundary after rollback or observer disposal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{0} cannot be modified outside a transaction")]
    NotWritable(Uid),

    #[error("transactions cannot be opened while a computation is running")]
    ComputationInProgress,

    #[error("{0} is produced by a computation and cannot be modified directly")]
    ReadOnly(Uid),

    #[error("unknown uid {0}")]
    UnknownUid(Uid),

    #[error("uid {0} is already in use")]
    DuplicateUid(Uid),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("index {index} out of bounds at '{path}' (length {len})")]
    InvalidIndex { path: Path, index: usize, len: usize },

    #[error("no key '{key}' at '{path}'")]
    InvalidKey { path: Path, key: String },

    #[error("key '{key}' already exists at '{path}'")]
    KeyExists { path: Path, key: String },

    #[error("value at '{path}' is not {expected}")]
    KindMismatch { path: Path, expected: &'static str },

    #[error("observer {0} has been disposed")]
    Disposed(Uid),

    #[error("observer {0} produces a boxed value, not an observable tree")]
    NotObservable(Uid),

    #[error("observer {0} read its own value while running")]
    CircularRead(Uid),

    #[error("spy stack mismatch: expected {expected}, found {found:?}")]
    SpyMismatch { expected: Uid, found: Option<Uid> },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("propagation did not settle after {passes} passes")]
    PropagationLimit { passes: usize },

    #[error("observer {observer} failed: {source}")]
    ObserverFailed { observer: Uid, source: Box<Error> },

    #[error("{message}")]
    User { message: String },
}

impl Error {
    /// An error raised by user code inside a transaction or observer.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn observer_failed(observer: Uid, source: Error) -> Self {
        Self::ObserverFailed {
            observer,
            source: Box::new(source),
        }
    }

    /// Whether the error reports structural corruption rather than a
    /// rejected request or a user failure.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownUid(_) | Self::DuplicateUid(_) | Self::Graph(_) | Self::SpyMismatch { .. }
        )
    }

    /// The innermost error, looking through `ObserverFailed` wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::ObserverFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

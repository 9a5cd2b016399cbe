//! Error types for the scheduling core.
//!
//! Every failure the core can report is a variant of [`Error`]. Each variant
//! belongs to exactly one [`ErrorKind`] (how the caller should treat it) and
//! carries one stable [`ErrorCode`] (what the transport puts on the wire).
//!
//! ## Error Kinds
//! - `Configuration`: malformed ranges, schemas or project settings. Fatal,
//!   surfaced at setup.
//! - `Validation`: a submission or combination was rejected. The task has
//!   already been re-queued when this is returned.
//! - `NotFound`: unknown client token or node id. Nothing was mutated.
//! - `StateConflict`: the node is not in the status the operation requires.
//! - `Storage`: the result store failed or returned inconsistent data.
//! - `Exhausted`: no work remains. Expected terminal condition.
//! - `Internal`: the shared scheduler lock was poisoned by a panic.

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Validation,
    NotFound,
    StateConflict,
    Storage,
    Exhausted,
    Internal,
}

/// Stable numeric codes exchanged with worker fleets.
///
/// The discriminants are part of the wire contract and must never be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    None = 0,
    AuthFailed = 1,
    UnknownToken = 2,
    KeepAliveTimeout = 3,
    MissingRequestField = 4,
    WrongNodeStatus = 5,
    InvalidValue = 6,
    NoMoreWork = 7,
    MissingResultVariable = 8,
    ValidationFailed = 9,
    UnknownNode = 10,
    TaskSuperseded = 11,
    StorageFailure = 12,
    Configuration = 13,
    Internal = 14,
}

impl ErrorCode {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Unified error type for the scheduling core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A value range, schema or project setting is malformed.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// The registration key did not match the project password.
    #[error("Authentication failed")]
    AuthFailed,

    /// No client is registered under the supplied token.
    #[error("No matching client token found in keyring")]
    UnknownToken,

    /// The client has not been heard from within the keep-alive window.
    #[error("Timed out. Please re-register")]
    KeepAliveTimeout,

    /// The client does not own a node with this id.
    #[error("No matching node found: {node}")]
    UnknownNode { node: String },

    /// The node is not in the status the operation requires.
    #[error("Node {node} is {actual}, expected {expected}")]
    WrongNodeStatus {
        node: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A submitted payload does not carry every output variable.
    #[error("Missing variable '{name}' in payload")]
    MissingResultVariable { name: String },

    /// A submitted value cannot be converted to its declared kind.
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    /// The project's output validator rejected the merged record.
    #[error("Submission validation failed")]
    ValidationFailed,

    /// Another node already delivered the result for this task.
    #[error("Task was already completed by another node")]
    TaskSuperseded,

    /// The result store failed or returned inconsistent data.
    #[error("Storage error: {context}")]
    Storage { context: String },

    /// The parameter space and every densification pass are exhausted.
    #[error("No more work to allocate")]
    Exhausted,

    /// A thread panicked while holding the scheduler lock.
    ///
    /// `parking_lot` mutexes do not poison, so this variant only exists
    /// without the `parking-lot` feature.
    #[cfg_attr(docsrs, doc(cfg(not(feature = "parking-lot"))))]
    #[cfg(not(feature = "parking-lot"))]
    #[error("Scheduler state is poisoned")]
    LockPoisoned,
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(context: impl Into<String>) -> Self {
        Self::Storage {
            context: context.into(),
        }
    }

    /// Returns the broad classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::MissingResultVariable { .. }
            | Self::InvalidValue { .. }
            | Self::ValidationFailed => ErrorKind::Validation,
            Self::AuthFailed
            | Self::UnknownToken
            | Self::KeepAliveTimeout
            | Self::UnknownNode { .. } => ErrorKind::NotFound,
            Self::WrongNodeStatus { .. } | Self::TaskSuperseded => ErrorKind::StateConflict,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Exhausted => ErrorKind::Exhausted,
            #[cfg(not(feature = "parking-lot"))]
            Self::LockPoisoned => ErrorKind::Internal,
        }
    }

    /// Returns the stable wire code for this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { .. } => ErrorCode::Configuration,
            Self::AuthFailed => ErrorCode::AuthFailed,
            Self::UnknownToken => ErrorCode::UnknownToken,
            Self::KeepAliveTimeout => ErrorCode::KeepAliveTimeout,
            Self::UnknownNode { .. } => ErrorCode::UnknownNode,
            Self::WrongNodeStatus { .. } => ErrorCode::WrongNodeStatus,
            Self::MissingResultVariable { .. } => ErrorCode::MissingResultVariable,
            Self::InvalidValue { .. } => ErrorCode::InvalidValue,
            Self::ValidationFailed => ErrorCode::ValidationFailed,
            Self::TaskSuperseded => ErrorCode::TaskSuperseded,
            Self::Storage { .. } => ErrorCode::StorageFailure,
            Self::Exhausted => ErrorCode::NoMoreWork,
            #[cfg(not(feature = "parking-lot"))]
            Self::LockPoisoned => ErrorCode::Internal,
        }
    }

    /// Message safe to hand to remote callers.
    ///
    /// Storage errors are reduced to a generic sentence so that store
    /// implementation details never leave the process.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage { .. } => "Result store unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage(err.to_string())
    }
}

#[cfg(not(feature = "parking-lot"))]
use std::sync::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}

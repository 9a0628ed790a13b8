//! Error types for ID generation and node ID coordination.
//!
//! Errors fall into four groups:
//! - configuration errors (`InvalidPattern`, `NodeIdOutOfRange`,
//!   `InvalidConfig`), raised at construction and never retried;
//! - coordination errors (`Store`, `NodeIdExhausted`, `DeadlineExceeded`,
//!   `Cancelled`, `TaskFailed`), retried by the allocator according to its
//!   backoff policy;
//! - runtime faults inside guarded operations (`Panicked`), surfaced as
//!   ordinary errors;
//! - terminal conditions (`TimeOverflow`, `RetriesExhausted`).

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `leaseflake` can emit.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The bit layout or tick of a [`Pattern`](crate::Pattern) is unusable.
    #[error("invalid pattern: {reason}")]
    InvalidPattern { reason: String },

    /// A manually supplied node ID does not fit the node field.
    #[error("node id {node_id} is out of range (max = {max})")]
    NodeIdOutOfRange { node_id: u64, max: u64 },

    /// A coordination setting is unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The elapsed tick count no longer fits the time field.
    #[error("tick {tick} exceeds the time field (max = {max})")]
    TimeOverflow { tick: u64, max: u64 },

    /// A coordination store call failed.
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    /// Every node ID under the prefix is already registered.
    #[error("no free node id under prefix {prefix:?} (max = {max})")]
    NodeIdExhausted { prefix: String, max: u64 },

    /// A guarded operation did not finish before its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A guarded operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// A guarded operation panicked.
    #[error("operation panicked: {message}")]
    Panicked { message: String },

    /// A spawned task ended without producing a result.
    #[error("task failed: {reason}")]
    TaskFailed { reason: String },

    /// The node ID claim gave up after its configured number of attempts.
    #[error("gave up claiming a node id after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },
}

impl Error {
    pub(crate) fn invalid_pattern(reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Failure reported by a [`CoordinationStore`](crate::CoordinationStore)
/// implementation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed a request.
    #[error("request failed: {0}")]
    Request(String),

    /// The lease referenced by a request is unknown or expired.
    #[error("lease {0} not found")]
    LeaseNotFound(i64),
}

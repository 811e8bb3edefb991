//! Synchronization error types.

use thiserror::Error;

/// Errors returned by timeline, fence, and session operations.
///
/// Stale or out-of-order progress reports are not errors: they are absorbed
/// silently by [`Timeline::advance`](crate::Timeline::advance).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Unknown timeline id, fence handle, or context id.
    #[error("not found: {0}")]
    NotFound(String),
    /// The timeline or context is being destroyed or already is.
    #[error("timeline gone")]
    Gone,
    /// A malformed argument, such as a target that was never queued or a
    /// fence presented to the wrong timeline.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A wait exceeded its deadline.
    #[error("wait timed out")]
    TimedOut,
    /// A wait was abandoned through its cancel token.
    #[error("wait cancelled")]
    Cancelled,
}

pub type SyncResult<T> = Result<T, SyncError>;

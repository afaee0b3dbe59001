//! Error types for the SiteSync engine.

use crate::{EntityId, MutationId, MutationStatus};
use thiserror::Error;

/// All possible errors from the SiteSync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Producer-side errors
    #[error("queue capacity exceeded: {limit} pending mutations")]
    CapacityExceeded { limit: usize },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("no attendance marked for {0}")]
    MissingAttendance(String),

    // Queue errors
    #[error("mutation not found: {0}")]
    MutationNotFound(MutationId),

    #[error("mutation already queued: {0}")]
    DuplicateMutation(MutationId),

    #[error("mutation {id} is older than the queue tail")]
    OutOfOrder { id: MutationId },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: MutationId,
        from: MutationStatus,
        to: MutationStatus,
    },

    // State errors
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

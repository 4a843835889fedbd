//! Error types for the object store

use thiserror::Error;

use crate::object::{ObjectId, ObjectKind};

/// Result type for store operations
pub type Result<T> = core::result::Result<T, StoreError>;

/// Errors raised by the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object with this id exists
    #[error("object {0} not found")]
    NotFound(ObjectId),

    /// A different object already lives at this path
    #[error("path `{0}` is already occupied")]
    PathOccupied(String),

    /// The object exists but holds a different payload kind
    #[error("object {id} is a {actual}, expected {expected}")]
    KindMismatch {
        id: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },
}

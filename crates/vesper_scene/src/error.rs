//! Error types for scene descriptions

use thiserror::Error;

/// Result type for scene operations
pub type Result<T> = core::result::Result<T, SceneError>;

/// Errors raised while building or validating a scene description
#[derive(Debug, Error)]
pub enum SceneError {
    /// Two elements share the same source id
    #[error("duplicate element id `{0}`")]
    DuplicateId(String),

    /// An element links to a child index past the end of the element table
    #[error("element {index}: child link {child} is out of bounds")]
    ChildOutOfBounds { index: u32, child: u32 },

    /// Parent and child links disagree
    #[error("element {index}: parent/child links disagree")]
    BrokenLink { index: u32 },

    /// A resource index points past the end of its table
    #[error("element {index}: {table} resource index {resource} is out of bounds")]
    ResourceOutOfBounds {
        index: u32,
        table: &'static str,
        resource: u32,
    },

    /// A root element carries the attach-as-component flag
    #[error("root element {index} is flagged as a component")]
    ComponentRoot { index: u32 },

    /// Scene JSON could not be parsed
    #[error("scene JSON: {0}")]
    Json(#[from] serde_json::Error),
}

//! Error and issue types for the import pipeline
//!
//! Two tiers: [`ImportError`] aborts a run (contract violations, store
//! corruption) and is propagated with `?`; [`ImportIssue`] records a
//! recoverable per-resource failure (payload fetch error, unresolved
//! reference) and lets the run continue.

use thiserror::Error;

use vesper_scene::SceneError;
use vesper_store::StoreError;

/// Result type for import operations
pub type Result<T> = core::result::Result<T, ImportError>;

/// Fatal errors that abort an import run
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    /// An element names a resource slot its description does not have
    #[error("element references missing {kind} resource {index}")]
    MissingResource { kind: &'static str, index: u32 },
}

/// How bad a recorded issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Something was skipped or substituted; the run is still usable
    Warning,
    /// A resource failed outright and is absent from the result
    Error,
}

/// One recoverable failure, attached to the run result
#[derive(Debug, Clone)]
pub struct ImportIssue {
    pub severity: IssueSeverity,
    /// Element id or resource name the issue concerns
    pub subject: String,
    pub message: String,
}

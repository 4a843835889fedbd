//! Staged scene import pipeline.
//!
//! Takes a translated [`SceneDescription`](vesper_scene::SceneDescription)
//! and materializes it into a [`vesper_store::ObjectStore`]: textures,
//! materials, meshes and animations become addressable assets, the element
//! tree becomes actors grouped under a scene container. Every run stages
//! its objects under a transient folder first and moves them to their
//! destination in a single finalization pass, so a failed or cancelled run
//! never leaves half-imported objects at final paths.
//!
//! Reimports go through the same pipeline; per-asset content hashes decide
//! what is rebuilt, conflict policies decide what happens when content
//! changed, and persisted actors keep their identity when their source
//! element still exists.

pub mod error;
pub mod fetch;
pub mod naming;
pub mod options;
pub mod progress;

mod actors;
mod context;
mod finalize;
mod gate;
mod importer;
mod resources;

pub use error::{ImportError, ImportIssue, IssueSeverity, Result};
pub use fetch::{GeometryPayload, PayloadSource, SourceCapabilities, TexturePayload};
pub use importer::{discard_run_transients, ImportResult, Importer};
pub use options::{ConflictPolicy, ImportOptions, ReimportOptions};
pub use progress::{CancelFlag, LogProgress, NullProgress, ProgressSink};

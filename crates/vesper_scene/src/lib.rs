//! Scene description IR - the hand-off format between source translators
//! and the import pipeline.
//!
//! A [`SceneDescription`] is an element tree plus flat per-kind resource
//! tables (geometries, textures, materials, lights, cameras, media,
//! animation tracks). Translators for the individual source formats produce
//! it; the import pipeline consumes it. Descriptions are immutable once
//! sealed. Heavy payloads (pixel data, vertex buffers) are deliberately not
//! part of the IR - they are fetched on demand during import.

pub mod element;
pub mod error;
pub mod format;
pub mod hash;
pub mod params;
pub mod resources;

pub use element::{ElementKind, SceneDescription, SceneElement};
pub use error::SceneError;
pub use format::SourceFormat;
pub use hash::{ContentHash, StableHash};
pub use params::{ParamBlock, ParamValue};
pub use resources::{
    AnimationRecord, CameraRecord, GeometryRecord, GeometryTopology, LightKind, LightRecord,
    MaterialParameter, MaterialRecord, MediumRecord, ParamCategory, TextureKind, TextureMode,
    TextureRecord, TransformTrack,
};

//! Persisted object store - the host side of the import pipeline.
//!
//! Models the services a host application exposes to the importer: object
//! creation and lookup, path-addressed storage, relocation, deletion,
//! store-wide hard-reference remapping and soft-path renaming, and a
//! derived-data rebuild hook. The store is single-writer by construction
//! (`&mut self` everywhere); the import pipeline serializes all mutation
//! through one orchestrator, so no locking is involved.

pub mod error;
pub mod object;
pub mod store;

pub use error::StoreError;
pub use object::{
    ActorData, ActorPayload, AnimationCurve, AnimationData, CompiledParameter, ImportMetadata,
    MaterialData, MeshBuildFlags, MeshData, ObjectData, ObjectId, ObjectKind, ObjectRecord,
    SceneContainerData, TextureData,
};
pub use store::ObjectStore;

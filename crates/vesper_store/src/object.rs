//! Stored object model
//!
//! Every persisted thing - texture, material, mesh, animation, actor,
//! component, scene container - is an [`ObjectRecord`] addressed by id and
//! by path. Payloads are one [`ObjectData`] variant each. Hard references
//! between objects are plain [`ObjectId`]s (never back-pointers, so no
//! reference cycles); soft references are path strings. Both are
//! enumerable through the visit hooks, which is what makes the importer's
//! project-wide fix passes possible.

use std::collections::BTreeMap;
use std::fmt;

use glam::Mat4;
use serde::{Deserialize, Serialize};

use vesper_scene::{ContentHash, LightKind, ParamBlock, ParamValue, SourceFormat, TextureMode};

/// Store-allocated object identity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Sentinel id that never names an object
    pub const fn invalid() -> Self {
        ObjectId(u64::MAX)
    }

    pub(crate) fn new(raw: u64) -> Self {
        ObjectId(raw)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != u64::MAX && self.0 != 0
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind tag of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Texture,
    Material,
    MaterialFunction,
    Mesh,
    Animation,
    Actor,
    Component,
    SceneContainer,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Texture => "texture",
            ObjectKind::Material => "material",
            ObjectKind::MaterialFunction => "material function",
            ObjectKind::Mesh => "mesh",
            ObjectKind::Animation => "animation",
            ObjectKind::Actor => "actor",
            ObjectKind::Component => "component",
            ObjectKind::SceneContainer => "scene container",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance written at finalization, read by the reimport gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportMetadata {
    pub source_uri: String,
    pub source_format: SourceFormat,
    pub content_hash: ContentHash,
}

/// Pixel payload of a texture object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextureData {
    pub mode: TextureMode,
    pub srgb: bool,
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub pixels: Vec<u8>,
}

/// One flattened material parameter with its final (collision-free) name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledParameter {
    pub name: String,
    pub category: vesper_scene::ParamCategory,
    pub value: ParamValue,
}

/// Payload of a material or material-function object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialData {
    pub model: String,
    pub parameters: Vec<CompiledParameter>,
    /// Referenced texture objects
    pub textures: Vec<ObjectId>,
    /// Referenced material-function objects
    pub functions: Vec<ObjectId>,
    /// Parent material when this object is an instance
    pub parent: Option<ObjectId>,
}

/// Derived-data requirements a material imposes on meshes that use it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshBuildFlags {
    pub tangents: bool,
    pub extra_uvs: bool,
    pub adjacency: bool,
}

impl MeshBuildFlags {
    pub fn union(self, other: Self) -> Self {
        Self {
            tangents: self.tangents || other.tangents,
            extra_uvs: self.extra_uvs || other.extra_uvs,
            adjacency: self.adjacency || other.adjacency,
        }
    }
}

/// Geometry payload of a mesh object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshData {
    #[serde(skip)]
    pub positions: Vec<[f32; 3]>,
    #[serde(skip)]
    pub normals: Vec<[f32; 3]>,
    #[serde(skip)]
    pub uvs: Vec<[f32; 2]>,
    #[serde(skip)]
    pub indices: Vec<u32>,
    /// Material per slot, index-aligned with the payload's slot ids
    pub materials: Vec<ObjectId>,
    pub build_flags: MeshBuildFlags,
}

/// Transform keys bound to one actor by path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationCurve {
    /// Soft reference; follows the actor when it is renamed
    pub bound_path: String,
    pub times: Vec<f32>,
    pub transforms: Vec<Mat4>,
}

/// Payload of an animation object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnimationData {
    pub frame_rate: f32,
    pub curves: Vec<AnimationCurve>,
}

/// Kind-specific part of an actor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorPayload {
    #[default]
    Empty,
    MeshInstance {
        mesh: ObjectId,
        override_materials: Vec<ObjectId>,
    },
    InstancedMesh {
        mesh: ObjectId,
        instances: Vec<Mat4>,
    },
    Light {
        kind: LightKind,
        intensity: f32,
        color: [f32; 3],
    },
    Camera {
        focal_length: f32,
        sensor_width: f32,
        look_at: Option<ObjectId>,
    },
    Decal {
        material: Option<ObjectId>,
        size: [f32; 3],
    },
    PostProcessVolume {
        params: ParamBlock,
        unbound: bool,
    },
    Landscape {
        material: Option<ObjectId>,
    },
    Custom {
        class: String,
        params: ParamBlock,
    },
}

/// Payload of an actor or component object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorData {
    pub label: String,
    pub transform: Mat4,
    pub payload: ActorPayload,
    /// Owned component objects, deleted with the actor
    pub components: Vec<ObjectId>,
}

/// Payload of a scene container: per-kind name tables for everything one
/// imported scene contributed. Keys are resource names (assets) or source
/// element ids (actors).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneContainerData {
    pub scene_name: String,
    pub textures: BTreeMap<String, ObjectId>,
    pub materials: BTreeMap<String, ObjectId>,
    pub meshes: BTreeMap<String, ObjectId>,
    pub animations: BTreeMap<String, ObjectId>,
    pub actors: BTreeMap<String, ObjectId>,
}

impl SceneContainerData {
    pub fn new(scene_name: impl Into<String>) -> Self {
        Self {
            scene_name: scene_name.into(),
            ..Default::default()
        }
    }
}

/// Typed payload of a stored object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectData {
    #[default]
    Empty,
    Texture(TextureData),
    Material(MaterialData),
    Mesh(MeshData),
    Animation(AnimationData),
    Actor(ActorData),
    SceneContainer(SceneContainerData),
}

impl ObjectData {
    /// Call `f` on every hard-reference slot
    pub fn visit_refs(&mut self, f: &mut dyn FnMut(&mut ObjectId)) {
        match self {
            ObjectData::Empty | ObjectData::Texture(_) | ObjectData::Animation(_) => {}
            ObjectData::Material(material) => {
                for texture in &mut material.textures {
                    f(texture);
                }
                for function in &mut material.functions {
                    f(function);
                }
                if let Some(parent) = &mut material.parent {
                    f(parent);
                }
            }
            ObjectData::Mesh(mesh) => {
                for slot in &mut mesh.materials {
                    f(slot);
                }
            }
            ObjectData::Actor(actor) => {
                match &mut actor.payload {
                    ActorPayload::MeshInstance {
                        mesh,
                        override_materials,
                    } => {
                        f(mesh);
                        for material in override_materials {
                            f(material);
                        }
                    }
                    ActorPayload::InstancedMesh { mesh, .. } => f(mesh),
                    ActorPayload::Camera {
                        look_at: Some(target),
                        ..
                    } => f(target),
                    ActorPayload::Decal {
                        material: Some(material),
                        ..
                    } => f(material),
                    ActorPayload::Landscape {
                        material: Some(material),
                    } => f(material),
                    _ => {}
                }
                for component in &mut actor.components {
                    f(component);
                }
            }
            ObjectData::SceneContainer(container) => {
                for id in container.textures.values_mut() {
                    f(id);
                }
                for id in container.materials.values_mut() {
                    f(id);
                }
                for id in container.meshes.values_mut() {
                    f(id);
                }
                for id in container.animations.values_mut() {
                    f(id);
                }
                for id in container.actors.values_mut() {
                    f(id);
                }
            }
        }
    }

    /// Call `f` on every soft (path string) reference
    pub fn visit_soft_paths(&mut self, f: &mut dyn FnMut(&mut String)) {
        if let ObjectData::Animation(animation) = self {
            for curve in &mut animation.curves {
                f(&mut curve.bound_path);
            }
        }
    }

    pub fn as_material(&self) -> Option<&MaterialData> {
        match self {
            ObjectData::Material(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mesh(&self) -> Option<&MeshData> {
        match self {
            ObjectData::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_actor(&self) -> Option<&ActorData> {
        match self {
            ObjectData::Actor(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&SceneContainerData> {
        match self {
            ObjectData::SceneContainer(c) => Some(c),
            _ => None,
        }
    }
}

/// One stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub name: String,
    /// Folder part of the path; the full path is `folder/name`
    pub folder: String,
    /// Source element id for objects reconciled across reimports
    pub stable_id: Option<String>,
    pub import_meta: Option<ImportMetadata>,
    pub data: ObjectData,
    /// Bumped whenever derived data must be rebuilt
    pub build_counter: u32,
}

impl ObjectRecord {
    pub fn path(&self) -> String {
        format!("{}/{}", self.folder, self.name)
    }
}

//! Scene element tree
//!
//! Elements form the scene hierarchy by index links into one flat vec;
//! resource-backed elements additionally index into the per-kind resource
//! tables. Producers build a description, seal it with [`SceneDescription::validate`],
//! and hand it to the pipeline; nothing mutates it afterwards.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SceneError};
use crate::format::SourceFormat;
use crate::params::ParamBlock;
use crate::resources::{
    AnimationRecord, CameraRecord, GeometryRecord, LightRecord, MaterialRecord, MediumRecord,
    TextureRecord,
};

/// What an element is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    // Resource-backed kinds
    Geometry,
    Material,
    Texture,
    Medium,
    AnimationTrack,
    // Node kinds placed in the hierarchy
    Instance,
    InstancedMesh,
    Light,
    Camera,
    Decal,
    Landscape,
    PostProcessVolume,
    Environment,
    Custom,
    Group,
    Unknown,
}

impl ElementKind {
    /// Kinds that exist to reference a resource table entry
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            ElementKind::Geometry
                | ElementKind::Material
                | ElementKind::Texture
                | ElementKind::Medium
                | ElementKind::AnimationTrack
        )
    }

    /// Kinds that occupy a slot in the scene hierarchy
    pub fn is_node(&self) -> bool {
        !self.is_resource()
    }
}

fn identity_mat4() -> Mat4 {
    Mat4::IDENTITY
}

/// One node of the scene description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneElement {
    pub kind: ElementKind,
    /// Stable source identity, unique within a description
    pub id: String,
    /// Display name, not necessarily unique
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub parent: Option<u32>,
    #[serde(default)]
    pub children: Vec<u32>,
    #[serde(default = "identity_mat4")]
    pub local_transform: Mat4,
    /// Attach to the nearest ancestor object instead of becoming a
    /// top-level object
    #[serde(default)]
    pub is_component: bool,
    #[serde(default)]
    pub params: ParamBlock,
    // Indices into the description's resource tables
    #[serde(default)]
    pub geometry: Option<u32>,
    #[serde(default)]
    pub material: Option<u32>,
    #[serde(default)]
    pub texture: Option<u32>,
    #[serde(default)]
    pub medium: Option<u32>,
    #[serde(default)]
    pub light: Option<u32>,
    #[serde(default)]
    pub camera: Option<u32>,
    #[serde(default)]
    pub animation: Option<u32>,
    /// Extra world transforms for instanced-mesh elements
    #[serde(default)]
    pub instance_transforms: Vec<Mat4>,
}

impl SceneElement {
    pub fn new(kind: ElementKind, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind,
            label: id.clone(),
            id,
            parent: None,
            children: Vec::new(),
            local_transform: Mat4::IDENTITY,
            is_component: false,
            params: ParamBlock::new(),
            geometry: None,
            material: None,
            texture: None,
            medium: None,
            light: None,
            camera: None,
            animation: None,
            instance_transforms: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.local_transform = transform;
        self
    }

    pub fn with_geometry(mut self, index: u32) -> Self {
        self.geometry = Some(index);
        self
    }

    pub fn with_material(mut self, index: u32) -> Self {
        self.material = Some(index);
        self
    }

    pub fn with_light(mut self, index: u32) -> Self {
        self.light = Some(index);
        self
    }

    pub fn with_camera(mut self, index: u32) -> Self {
        self.camera = Some(index);
        self
    }

    pub fn as_component(mut self) -> Self {
        self.is_component = true;
        self
    }
}

/// A complete externally-authored scene
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    pub name: String,
    #[serde(default)]
    pub source_uri: String,
    #[serde(default)]
    pub source_format: SourceFormat,
    #[serde(default)]
    pub elements: Vec<SceneElement>,
    #[serde(default)]
    pub geometries: Vec<GeometryRecord>,
    #[serde(default)]
    pub textures: Vec<TextureRecord>,
    #[serde(default)]
    pub materials: Vec<MaterialRecord>,
    #[serde(default)]
    pub lights: Vec<LightRecord>,
    #[serde(default)]
    pub cameras: Vec<CameraRecord>,
    #[serde(default)]
    pub media: Vec<MediumRecord>,
    #[serde(default)]
    pub animations: Vec<AnimationRecord>,
}

impl SceneDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a root element, returning its index
    pub fn add_element(&mut self, element: SceneElement) -> u32 {
        let index = self.elements.len() as u32;
        self.elements.push(element);
        index
    }

    /// Append an element under `parent`, wiring both link directions
    pub fn add_child(&mut self, parent: u32, mut element: SceneElement) -> u32 {
        let index = self.elements.len() as u32;
        element.parent = Some(parent);
        self.elements.push(element);
        if let Some(p) = self.elements.get_mut(parent as usize) {
            p.children.push(index);
        }
        index
    }

    pub fn element(&self, index: u32) -> Option<&SceneElement> {
        self.elements.get(index as usize)
    }

    /// Find an element index by source id (linear scan)
    pub fn index_of(&self, id: &str) -> Option<u32> {
        self.elements
            .iter()
            .position(|e| e.id == id)
            .map(|i| i as u32)
    }

    pub fn element_by_id(&self, id: &str) -> Option<&SceneElement> {
        self.index_of(id).and_then(|i| self.element(i))
    }

    /// Indices of elements without a parent, in declaration order
    pub fn roots(&self) -> impl Iterator<Item = u32> + '_ {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(i, _)| i as u32)
    }

    /// Find a material table index by material name
    pub fn material_index(&self, name: &str) -> Option<u32> {
        self.materials
            .iter()
            .position(|m| m.name == name)
            .map(|i| i as u32)
    }

    /// Find a texture table index by texture name
    pub fn texture_index(&self, name: &str) -> Option<u32> {
        self.textures
            .iter()
            .position(|t| t.name == name)
            .map(|i| i as u32)
    }

    /// Producer-side contract check: link symmetry, id uniqueness, resource
    /// indices in bounds, no component roots. Returns the first violation.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (i, element) in self.elements.iter().enumerate() {
            let index = i as u32;
            if !seen.insert(element.id.as_str()) {
                return Err(SceneError::DuplicateId(element.id.clone()));
            }

            for &child in &element.children {
                let linked_back = self
                    .elements
                    .get(child as usize)
                    .ok_or(SceneError::ChildOutOfBounds { index, child })?
                    .parent
                    == Some(index);
                if !linked_back {
                    return Err(SceneError::BrokenLink { index });
                }
            }
            if let Some(parent) = element.parent {
                let listed = self
                    .elements
                    .get(parent as usize)
                    .ok_or(SceneError::BrokenLink { index })?
                    .children
                    .contains(&index);
                if !listed {
                    return Err(SceneError::BrokenLink { index });
                }
            } else if element.is_component {
                return Err(SceneError::ComponentRoot { index });
            }

            self.check_resource(index, "geometry", element.geometry, self.geometries.len())?;
            self.check_resource(index, "material", element.material, self.materials.len())?;
            self.check_resource(index, "texture", element.texture, self.textures.len())?;
            self.check_resource(index, "medium", element.medium, self.media.len())?;
            self.check_resource(index, "light", element.light, self.lights.len())?;
            self.check_resource(index, "camera", element.camera, self.cameras.len())?;
            self.check_resource(index, "animation", element.animation, self.animations.len())?;
        }
        Ok(())
    }

    fn check_resource(
        &self,
        index: u32,
        table: &'static str,
        slot: Option<u32>,
        len: usize,
    ) -> Result<()> {
        match slot {
            Some(resource) if resource as usize >= len => Err(SceneError::ResourceOutOfBounds {
                index,
                table,
                resource,
            }),
            _ => Ok(()),
        }
    }

    /// Parse a description from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let scene: SceneDescription = serde_json::from_slice(bytes)?;
        Ok(scene)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

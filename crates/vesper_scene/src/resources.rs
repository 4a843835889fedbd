//! Per-kind resource records
//!
//! Records describe resources without carrying their heavy payloads: a
//! geometry record names its source and material slots but holds no vertex
//! data, a texture record holds no pixels. Payloads are fetched on demand
//! by the import pipeline through its payload source.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::params::{ParamBlock, ParamValue};

/// Primitive layout of a geometry resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryTopology {
    #[default]
    TriMesh,
    QuadMesh,
    Curve,
    PointCloud,
    Procedural,
}

/// A mesh-like resource, payload fetched separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub name: String,
    #[serde(default)]
    pub topology: GeometryTopology,
    /// Payload location, interpreted by the payload source
    #[serde(default)]
    pub source: String,
    /// Producer-computed payload digest; changes when the payload does
    #[serde(default)]
    pub file_hash: Option<u64>,
    /// Material slot names, index-aligned with the payload's slot ids
    #[serde(default)]
    pub material_slots: Vec<String>,
    #[serde(default)]
    pub params: ParamBlock,
}

impl GeometryRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topology: GeometryTopology::TriMesh,
            source: String::new(),
            file_hash: None,
            material_slots: Vec::new(),
            params: ParamBlock::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_slots<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.material_slots = slots.into_iter().map(Into::into).collect();
        self
    }
}

/// Storage layout of a texture resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureKind {
    #[default]
    Image2D,
    Cube,
    /// Generated at import time, no external payload
    Procedural,
    /// Single flat value, no external payload
    Constant,
}

/// Intended sampling semantics of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureMode {
    #[default]
    Diffuse,
    Specular,
    Normal,
    Emissive,
    Other,
}

/// An image-like resource, pixels fetched separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureRecord {
    pub name: String,
    #[serde(default)]
    pub kind: TextureKind,
    #[serde(default)]
    pub mode: TextureMode,
    /// Payload location, interpreted by the payload source
    #[serde(default)]
    pub source: String,
    /// Producer-computed payload digest; changes when the pixels do
    #[serde(default)]
    pub file_hash: Option<u64>,
    #[serde(default)]
    pub srgb: bool,
    #[serde(default)]
    pub params: ParamBlock,
}

impl TextureRecord {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TextureKind::Image2D,
            mode: TextureMode::Diffuse,
            source: source.into(),
            file_hash: None,
            srgb: true,
            params: ParamBlock::new(),
        }
    }

    pub fn with_mode(mut self, mode: TextureMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_kind(mut self, kind: TextureKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Namespace a material parameter lives in.
///
/// Host material systems keep one name table per category, plus a shared
/// generic table that every typed name also occupies. The name resolver
/// mints unique names per category for exactly this reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamCategory {
    Scalar,
    Color,
    TextureRef,
    Bool,
    /// Umbrella namespace shared by all categories
    Generic,
}

/// One named, categorized material parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialParameter {
    pub name: String,
    pub category: ParamCategory,
    pub value: ParamValue,
}

impl MaterialParameter {
    pub fn new(name: impl Into<String>, category: ParamCategory, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            category,
            value,
        }
    }

    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, ParamCategory::Scalar, ParamValue::Float(value))
    }

    pub fn color(name: impl Into<String>, rgb: [f32; 3]) -> Self {
        Self::new(name, ParamCategory::Color, ParamValue::Vec3(rgb))
    }

    pub fn texture(name: impl Into<String>, texture_name: impl Into<String>) -> Self {
        Self::new(
            name,
            ParamCategory::TextureRef,
            ParamValue::Ref(texture_name.into()),
        )
    }
}

/// A surface description.
///
/// A material that appears in another material's `functions` list acts as a
/// callable material function; the same record type covers both roles. A
/// record with a `parent` is a material instance deriving from that parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub name: String,
    /// Shading model tag, interpreted by the host (e.g. "pbr", "unlit")
    pub model: String,
    /// Parent material name when this record is an instance
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub parameters: Vec<MaterialParameter>,
    /// Names of other materials this one calls as functions
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub params: ParamBlock,
}

impl MaterialRecord {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            parent: None,
            parameters: Vec::new(),
            functions: Vec::new(),
            params: ParamBlock::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_parameter(mut self, parameter: MaterialParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.functions.push(function.into());
        self
    }
}

/// Emission shape of a light resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightKind {
    #[default]
    Point,
    Spot,
    Directional,
    Area,
    Environment,
    Distant,
}

/// A light resource referenced by light elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightRecord {
    pub name: String,
    #[serde(default)]
    pub kind: LightKind,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default = "default_color")]
    pub color: [f32; 3],
    #[serde(default)]
    pub params: ParamBlock,
}

fn default_intensity() -> f32 {
    1.0
}

fn default_color() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

impl LightRecord {
    pub fn new(name: impl Into<String>, kind: LightKind) -> Self {
        Self {
            name: name.into(),
            kind,
            intensity: 1.0,
            color: [1.0, 1.0, 1.0],
            params: ParamBlock::new(),
        }
    }
}

/// A camera resource referenced by camera elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub name: String,
    /// Millimeters
    #[serde(default = "default_focal_length")]
    pub focal_length: f32,
    /// Millimeters
    #[serde(default = "default_sensor_width")]
    pub sensor_width: f32,
    #[serde(default)]
    pub params: ParamBlock,
}

fn default_focal_length() -> f32 {
    35.0
}

fn default_sensor_width() -> f32 {
    36.0
}

impl CameraRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            focal_length: 35.0,
            sensor_width: 36.0,
            params: ParamBlock::new(),
        }
    }
}

/// A participating-medium description, consumed inline by volume elements
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediumRecord {
    pub name: String,
    #[serde(default)]
    pub params: ParamBlock,
}

/// Transform keys for one target element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformTrack {
    /// Element id the track drives
    pub target: String,
    pub times: Vec<f32>,
    pub transforms: Vec<Mat4>,
}

/// A transform animation resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationRecord {
    pub name: String,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f32,
    #[serde(default)]
    pub tracks: Vec<TransformTrack>,
}

fn default_frame_rate() -> f32 {
    30.0
}

impl AnimationRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frame_rate: 30.0,
            tracks: Vec::new(),
        }
    }

    /// Element ids driven by any track
    pub fn bound_elements(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(|t| t.target.as_str())
    }
}

//! Content hashing for resource records
//!
//! The reimport gate compares a record's hash against the hash stored in
//! import metadata to decide whether a resource needs rebuilding. Hashes
//! must therefore be deterministic across runs: floats are hashed by bit
//! pattern and parameter blocks iterate in key order. `DefaultHasher::new()`
//! is keyed with fixed constants, so equal input hashes equal everywhere.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::format::SourceFormat;
use crate::params::{ParamBlock, ParamValue};
use crate::resources::{
    AnimationRecord, GeometryRecord, GeometryTopology, MaterialParameter, MaterialRecord,
    ParamCategory, TextureKind, TextureMode, TextureRecord, TransformTrack,
};

/// Digest of a resource record's stable fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub u64);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Deterministic hashing over record fields
pub trait StableHash {
    fn stable_hash(&self, state: &mut DefaultHasher);

    fn content_hash(&self) -> ContentHash {
        let mut state = DefaultHasher::new();
        self.stable_hash(&mut state);
        ContentHash(state.finish())
    }
}

impl StableHash for bool {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_u8(*self as u8);
    }
}

impl StableHash for u32 {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_u32(*self);
    }
}

impl StableHash for u64 {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_u64(*self);
    }
}

impl StableHash for i64 {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_i64(*self);
    }
}

impl StableHash for f32 {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_u32(self.to_bits());
    }
}

impl StableHash for f64 {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_u64(self.to_bits());
    }
}

impl StableHash for str {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write(self.as_bytes());
        // Separator so ("ab","c") and ("a","bc") differ
        state.write_u8(0xff);
    }
}

impl StableHash for String {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.as_str().stable_hash(state);
    }
}

impl<T: StableHash> StableHash for Option<T> {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        match self {
            None => state.write_u8(0),
            Some(value) => {
                state.write_u8(1);
                value.stable_hash(state);
            }
        }
    }
}

impl<T: StableHash> StableHash for [T] {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_usize(self.len());
        for item in self {
            item.stable_hash(state);
        }
    }
}

impl<T: StableHash> StableHash for Vec<T> {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.as_slice().stable_hash(state);
    }
}

impl<T: StableHash, const N: usize> StableHash for [T; N] {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        for item in self {
            item.stable_hash(state);
        }
    }
}

impl StableHash for Mat4 {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.to_cols_array().stable_hash(state);
    }
}

impl StableHash for SourceFormat {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.as_str().stable_hash(state);
    }
}

impl StableHash for ParamValue {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        match self {
            ParamValue::Bool(b) => {
                state.write_u8(0);
                b.stable_hash(state);
            }
            ParamValue::Int(i) => {
                state.write_u8(1);
                i.stable_hash(state);
            }
            ParamValue::Float(f) => {
                state.write_u8(2);
                f.stable_hash(state);
            }
            ParamValue::Str(s) => {
                state.write_u8(3);
                s.stable_hash(state);
            }
            ParamValue::Vec2(v) => {
                state.write_u8(4);
                v.stable_hash(state);
            }
            ParamValue::Vec3(v) => {
                state.write_u8(5);
                v.stable_hash(state);
            }
            ParamValue::Mat4(m) => {
                state.write_u8(6);
                m.stable_hash(state);
            }
            ParamValue::Spectrum(s) => {
                state.write_u8(7);
                s.stable_hash(state);
            }
            ParamValue::Ref(r) => {
                state.write_u8(8);
                r.stable_hash(state);
            }
            ParamValue::List(items) => {
                state.write_u8(9);
                items.stable_hash(state);
            }
        }
    }
}

impl StableHash for ParamBlock {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        state.write_usize(self.len());
        for (key, value) in self.iter() {
            key.stable_hash(state);
            value.stable_hash(state);
        }
    }
}

impl StableHash for GeometryTopology {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        let tag: u8 = match self {
            GeometryTopology::TriMesh => 0,
            GeometryTopology::QuadMesh => 1,
            GeometryTopology::Curve => 2,
            GeometryTopology::PointCloud => 3,
            GeometryTopology::Procedural => 4,
        };
        state.write_u8(tag);
    }
}

impl StableHash for GeometryRecord {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.name.stable_hash(state);
        self.topology.stable_hash(state);
        self.source.stable_hash(state);
        self.file_hash.stable_hash(state);
        self.material_slots.stable_hash(state);
        self.params.stable_hash(state);
    }
}

impl StableHash for TextureKind {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        let tag: u8 = match self {
            TextureKind::Image2D => 0,
            TextureKind::Cube => 1,
            TextureKind::Procedural => 2,
            TextureKind::Constant => 3,
        };
        state.write_u8(tag);
    }
}

impl StableHash for TextureMode {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        let tag: u8 = match self {
            TextureMode::Diffuse => 0,
            TextureMode::Specular => 1,
            TextureMode::Normal => 2,
            TextureMode::Emissive => 3,
            TextureMode::Other => 4,
        };
        state.write_u8(tag);
    }
}

impl StableHash for TextureRecord {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.name.stable_hash(state);
        self.kind.stable_hash(state);
        self.mode.stable_hash(state);
        self.source.stable_hash(state);
        self.file_hash.stable_hash(state);
        self.srgb.stable_hash(state);
        self.params.stable_hash(state);
    }
}

impl StableHash for ParamCategory {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        let tag: u8 = match self {
            ParamCategory::Scalar => 0,
            ParamCategory::Color => 1,
            ParamCategory::TextureRef => 2,
            ParamCategory::Bool => 3,
            ParamCategory::Generic => 4,
        };
        state.write_u8(tag);
    }
}

impl StableHash for MaterialParameter {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.name.stable_hash(state);
        self.category.stable_hash(state);
        self.value.stable_hash(state);
    }
}

impl StableHash for MaterialRecord {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.name.stable_hash(state);
        self.model.stable_hash(state);
        self.parent.stable_hash(state);
        self.parameters.stable_hash(state);
        self.functions.stable_hash(state);
        self.params.stable_hash(state);
    }
}

impl StableHash for TransformTrack {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.target.stable_hash(state);
        self.times.stable_hash(state);
        self.transforms.stable_hash(state);
    }
}

impl StableHash for AnimationRecord {
    fn stable_hash(&self, state: &mut DefaultHasher) {
        self.name.stable_hash(state);
        self.frame_rate.stable_hash(state);
        self.tracks.stable_hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_records_hash_equal() {
        let a = TextureRecord::new("brick_albedo", "textures/brick.png");
        let b = TextureRecord::new("brick_albedo", "textures/brick.png");
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn field_change_changes_hash() {
        let a = TextureRecord::new("brick_albedo", "textures/brick.png");
        let mut b = a.clone();
        b.mode = TextureMode::Normal;
        assert_ne!(a.content_hash(), b.content_hash());

        let mut c = a.clone();
        c.file_hash = Some(42);
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn param_insertion_order_is_irrelevant() {
        let mut a = GeometryRecord::new("rock");
        a.params.set("lod", ParamValue::Int(2));
        a.params.set("collision", ParamValue::Bool(true));

        let mut b = GeometryRecord::new("rock");
        b.params.set("collision", ParamValue::Bool(true));
        b.params.set("lod", ParamValue::Int(2));

        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn string_boundaries_are_separated() {
        let mut a = GeometryRecord::new("ab");
        a.source = "c".into();
        let mut b = GeometryRecord::new("a");
        b.source = "bc".into();
        assert_ne!(a.content_hash(), b.content_hash());
    }
}

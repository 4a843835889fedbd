//! Open key/value parameter blocks
//!
//! Every element and resource record carries a [`ParamBlock`] for metadata
//! that has no dedicated field: user-authored tags, translator hints,
//! cross-element references (camera look-at targets and the like). Values
//! are kept in a `BTreeMap` so iteration order - and therefore content
//! hashing - is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Mat4([[f32; 4]; 4]),
    /// Sampled spectrum, wavelength/value pairs flattened
    Spectrum(Vec<f32>),
    /// Reference to another element by source id
    Ref(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Human-readable name of the contained type
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
            ParamValue::Vec2(_) => "vec2",
            ParamValue::Vec3(_) => "vec3",
            ParamValue::Mat4(_) => "mat4",
            ParamValue::Spectrum(_) => "spectrum",
            ParamValue::Ref(_) => "ref",
            ParamValue::List(_) => "list",
        }
    }
}

/// Ordered map of named parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamBlock {
    values: BTreeMap<String, ParamValue>,
}

impl ParamBlock {
    /// Create an empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter, returning the previous value
    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) -> Option<ParamValue> {
        self.values.insert(key.into(), value)
    }

    /// Look up a parameter
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Whether a parameter is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove a parameter, returning it
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.values.remove(key)
    }

    /// Typed getter; `None` if absent or not a bool
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(ParamValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Typed getter; `None` if absent or not an integer
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ParamValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Typed getter; integers promote to float
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(ParamValue::Float(f)) => Some(*f),
            Some(ParamValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Typed getter; `None` if absent or not a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ParamValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Typed getter for element references
    pub fn get_ref(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ParamValue::Ref(id)) => Some(id.as_str()),
            _ => None,
        }
    }

    /// Typed getter; `None` if absent or not a vec3
    pub fn get_vec3(&self, key: &str) -> Option<[f32; 3]> {
        match self.values.get(key) {
            Some(ParamValue::Vec3(v)) => Some(*v),
            _ => None,
        }
    }

    /// Iterate parameters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the block is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters() {
        let mut block = ParamBlock::new();
        block.set("enabled", ParamValue::Bool(true));
        block.set("samples", ParamValue::Int(16));
        block.set("gamma", ParamValue::Float(2.2));
        block.set("look_at", ParamValue::Ref("camera_target".into()));

        assert_eq!(block.get_bool("enabled"), Some(true));
        assert_eq!(block.get_i64("samples"), Some(16));
        assert_eq!(block.get_f64("gamma"), Some(2.2));
        assert_eq!(block.get_ref("look_at"), Some("camera_target"));

        // Wrong type yields None, not a panic
        assert_eq!(block.get_str("samples"), None);
        assert_eq!(block.get_bool("gamma"), None);
    }

    #[test]
    fn int_promotes_to_float() {
        let mut block = ParamBlock::new();
        block.set("count", ParamValue::Int(3));
        assert_eq!(block.get_f64("count"), Some(3.0));
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut block = ParamBlock::new();
        block.set("zeta", ParamValue::Int(1));
        block.set("alpha", ParamValue::Int(2));
        block.set("mid", ParamValue::Int(3));

        let keys: Vec<&str> = block.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }
}

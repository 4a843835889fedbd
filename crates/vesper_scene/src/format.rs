//! Source format identification

use std::path::Path;

use serde::{Deserialize, Serialize};

/// The file format a scene description was translated from.
///
/// The pipeline never parses source files itself; the format tag travels
/// with the description and is recorded into per-object import metadata so
/// a later reimport can route back to the right translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pbrt,
    Mitsuba,
    Datasmith,
    Blend,
    #[default]
    Unknown,
}

impl SourceFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "pbrt" => SourceFormat::Pbrt,
            "xml" => SourceFormat::Mitsuba,
            "udatasmith" => SourceFormat::Datasmith,
            "blend" => SourceFormat::Blend,
            _ => SourceFormat::Unknown,
        }
    }

    /// Short name for logs and metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Pbrt => "pbrt",
            SourceFormat::Mitsuba => "mitsuba",
            SourceFormat::Datasmith => "datasmith",
            SourceFormat::Blend => "blend",
            SourceFormat::Unknown => "unknown",
        }
    }
}

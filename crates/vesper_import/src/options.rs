//! Import run configuration

use serde::{Deserialize, Serialize};

/// What to do when a resource's final object already exists with
/// different content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Update the existing object in place
    #[default]
    Replace,
    /// Keep the existing object untouched and reuse it
    Ignore,
}

/// Options that only apply when reimporting over persisted state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReimportOptions {
    /// Preserve persisted actors whose source elements disappeared
    /// instead of deleting them
    #[serde(default)]
    pub respawn_missing_actors: bool,
}

/// Configuration for one import run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Root folder the scene's final objects land under
    pub destination_root: String,
    /// Override for the scene name taken from the description
    #[serde(default)]
    pub scene_name: Option<String>,
    pub import_geometry: bool,
    pub import_lights: bool,
    pub import_cameras: bool,
    pub import_animations: bool,
    #[serde(default)]
    pub texture_conflicts: ConflictPolicy,
    #[serde(default)]
    pub material_conflicts: ConflictPolicy,
    #[serde(default)]
    pub reimport: ReimportOptions,
    /// Cap on payload-fetch worker threads; `None` uses the machine's
    /// available parallelism
    #[serde(default)]
    pub max_fetch_workers: Option<usize>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            destination_root: "/Project".to_string(),
            scene_name: None,
            import_geometry: true,
            import_lights: true,
            import_cameras: true,
            import_animations: true,
            texture_conflicts: ConflictPolicy::default(),
            material_conflicts: ConflictPolicy::default(),
            reimport: ReimportOptions::default(),
            max_fetch_workers: None,
        }
    }
}

impl ImportOptions {
    /// Worker thread count for payload fetches
    pub fn fetch_workers(&self) -> usize {
        self.max_fetch_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1)
        })
    }
}

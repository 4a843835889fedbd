//! Shared state for one import run

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vesper_scene::{ContentHash, SceneDescription};
use vesper_store::{MeshBuildFlags, ObjectId};

use crate::error::{ImportIssue, IssueSeverity};
use crate::naming::UniqueNameProvider;
use crate::options::ImportOptions;
use crate::progress::{CancelFlag, ProgressSink};

pub(crate) const TEXTURE_FOLDER: &str = "Textures";
pub(crate) const MATERIAL_FOLDER: &str = "Materials";
pub(crate) const GEOMETRY_FOLDER: &str = "Geometries";
pub(crate) const ANIMATION_FOLDER: &str = "Animations";
pub(crate) const ACTOR_FOLDER: &str = "Actors";

/// Root folder for staged assets. Runs are kept apart by a process-wide
/// nonce so a failed run's leftovers never collide with the next one.
pub(crate) const TRANSIENT_ROOT: &str = "/Transient";

static RUN_NONCE: AtomicU64 = AtomicU64::new(0);

/// One staged asset, keyed by its source record name in the context maps
#[derive(Debug, Clone, Copy)]
pub(crate) enum Staged {
    /// Built this run; lives under the transient root until finalization
    Fresh { id: ObjectId, hash: ContentHash },
    /// Persisted asset reused as-is; already at its final path
    Reused { id: ObjectId },
}

impl Staged {
    pub(crate) fn object_id(&self) -> ObjectId {
        match self {
            Staged::Fresh { id, .. } | Staged::Reused { id } => *id,
        }
    }

    pub(crate) fn is_fresh(&self) -> bool {
        matches!(self, Staged::Fresh { .. })
    }
}

/// State threaded through every stage of a run.
///
/// Owned by the importer and handed to stages one at a time; stages are
/// the only writers, so none of this needs interior mutability.
pub(crate) struct ImportContext {
    pub(crate) scene: Arc<SceneDescription>,
    pub(crate) options: ImportOptions,
    pub(crate) scene_name: String,
    pub(crate) transient_root: String,
    pub(crate) destination_root: String,
    pub(crate) is_reimport: bool,

    // Staged assets by source record name
    pub(crate) textures: HashMap<String, Staged>,
    pub(crate) material_functions: HashMap<String, Staged>,
    pub(crate) materials: HashMap<String, Staged>,
    pub(crate) meshes: HashMap<String, Staged>,
    pub(crate) animations: HashMap<String, Staged>,

    /// Imported actors and components by source element id
    pub(crate) actors: HashMap<String, ObjectId>,
    /// Ancestor actors of the element currently being imported
    pub(crate) hierarchy: Vec<ObjectId>,
    /// Transient scene container for this run
    pub(crate) import_container: Option<ObjectId>,

    /// Mesh build requirements folded per material name
    pub(crate) material_requirements: HashMap<String, MeshBuildFlags>,
    /// Display labels must be unique per imported scene
    pub(crate) label_provider: UniqueNameProvider,

    /// Source element ids that failed or were excluded by options
    pub(crate) non_imported: HashSet<String>,
    pub(crate) issues: Vec<ImportIssue>,

    /// Transient identity -> final identity, total after finalization
    pub(crate) remap: HashMap<ObjectId, ObjectId>,
    /// Old object path -> new object path, for soft reference rewrites
    pub(crate) rename_map: HashMap<String, String>,

    pub(crate) cancel: CancelFlag,
    pub(crate) progress: Arc<dyn ProgressSink>,
}

impl ImportContext {
    pub(crate) fn new(
        scene: Arc<SceneDescription>,
        options: ImportOptions,
        progress: Arc<dyn ProgressSink>,
        cancel: CancelFlag,
        is_reimport: bool,
    ) -> Self {
        let scene_name = options
            .scene_name
            .clone()
            .unwrap_or_else(|| scene.name.clone());
        let nonce = RUN_NONCE.fetch_add(1, Ordering::Relaxed);
        let transient_root = format!("{}/{}_{}", TRANSIENT_ROOT, scene_name, nonce);
        let destination_root = format!("{}/{}", options.destination_root, scene_name);

        Self {
            scene,
            options,
            scene_name,
            transient_root,
            destination_root,
            is_reimport,
            textures: HashMap::new(),
            material_functions: HashMap::new(),
            materials: HashMap::new(),
            meshes: HashMap::new(),
            animations: HashMap::new(),
            actors: HashMap::new(),
            hierarchy: Vec::new(),
            import_container: None,
            material_requirements: HashMap::new(),
            label_provider: UniqueNameProvider::new(),
            non_imported: HashSet::new(),
            issues: Vec::new(),
            remap: HashMap::new(),
            rename_map: HashMap::new(),
            cancel,
            progress: Arc::clone(&progress),
        }
    }

    /// Poll for cancellation. A request seen through the progress sink is
    /// latched into the shared flag so in-flight fetch jobs stop too.
    pub(crate) fn check_cancelled(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        if self.progress.cancel_requested() {
            self.cancel.request();
            return true;
        }
        false
    }

    pub(crate) fn warn(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        let issue = ImportIssue {
            severity: IssueSeverity::Warning,
            subject: subject.into(),
            message: message.into(),
        };
        log::warn!("import: {}: {}", issue.subject, issue.message);
        self.issues.push(issue);
    }

    pub(crate) fn error(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        let issue = ImportIssue {
            severity: IssueSeverity::Error,
            subject: subject.into(),
            message: message.into(),
        };
        log::error!("import: {}: {}", issue.subject, issue.message);
        self.issues.push(issue);
    }

    /// Folder a staged asset of the given class is created in
    pub(crate) fn transient_folder(&self, class: &str) -> String {
        format!("{}/{}", self.transient_root, class)
    }

    /// Folder the asset moves to when the run finalizes
    pub(crate) fn final_folder(&self, class: &str) -> String {
        format!("{}/{}", self.destination_root, class)
    }

    /// Requirements for one material, unioned across every use seen so far
    pub(crate) fn require_for_material(&mut self, material: &str, flags: MeshBuildFlags) {
        let entry = self
            .material_requirements
            .entry(material.to_string())
            .or_default();
        *entry = entry.union(flags);
    }

    pub(crate) fn fresh_count(&self) -> usize {
        [
            &self.textures,
            &self.material_functions,
            &self.materials,
            &self.meshes,
            &self.animations,
        ]
        .iter()
        .map(|map| map.values().filter(|staged| staged.is_fresh()).count())
        .sum()
    }

    pub(crate) fn reused_count(&self) -> usize {
        [
            &self.textures,
            &self.material_functions,
            &self.materials,
            &self.meshes,
            &self.animations,
        ]
        .iter()
        .map(|map| map.values().filter(|staged| !staged.is_fresh()).count())
        .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;

    #[test]
    fn transient_roots_are_distinct_per_run() {
        let scene = Arc::new(SceneDescription::new("atrium"));
        let make = || {
            ImportContext::new(
                Arc::clone(&scene),
                ImportOptions::default(),
                Arc::new(NullProgress),
                CancelFlag::new(),
                false,
            )
        };
        let first = make();
        let second = make();
        assert_ne!(first.transient_root, second.transient_root);
        assert!(first.transient_root.starts_with("/Transient/atrium_"));
        assert_eq!(first.destination_root, "/Project/atrium");
    }

    #[test]
    fn scene_name_override_wins() {
        let scene = Arc::new(SceneDescription::new("atrium"));
        let options = ImportOptions {
            scene_name: Some("lobby".to_string()),
            ..ImportOptions::default()
        };
        let ctx = ImportContext::new(
            scene,
            options,
            Arc::new(NullProgress),
            CancelFlag::new(),
            false,
        );
        assert_eq!(ctx.scene_name, "lobby");
        assert_eq!(ctx.destination_root, "/Project/lobby");
    }
}

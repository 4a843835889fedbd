//! Import orchestration
//!
//! [`Importer`] drives one scene description through the staged pipeline:
//! textures, materials, meshes and animations are built under a transient
//! folder, actors are assembled into a transient container, and the
//! finalization stage moves everything to its destination in one pass.
//! The store is only ever touched from the calling thread; worker threads
//! are confined to payload fetching.

use std::collections::HashMap;
use std::sync::Arc;

use vesper_scene::SceneDescription;
use vesper_store::{ObjectId, ObjectStore};

use crate::context::{ImportContext, TRANSIENT_ROOT};
use crate::error::{ImportIssue, Result};
use crate::fetch::PayloadSource;
use crate::finalize::{self, FinalizeOutcome};
use crate::gate::GateSnapshot;
use crate::options::ImportOptions;
use crate::progress::{CancelFlag, NullProgress, ProgressSink};
use crate::{actors, resources};

/// What one import or reimport run did to the store
#[derive(Debug)]
pub struct ImportResult {
    /// Assets built this run, in finalization order
    pub finalized: Vec<ObjectId>,
    /// Count of persisted assets reused unchanged
    pub reused: usize,
    /// Destination containers the run reconciled
    pub containers: Vec<ObjectId>,
    /// Transient identity to final identity for every staged object
    pub remap: HashMap<ObjectId, ObjectId>,
    /// Old path to new path, as applied to soft references
    pub rename_map: HashMap<String, String>,
    /// Warnings and errors accumulated along the way
    pub issues: Vec<ImportIssue>,
    pub cancelled: bool,
    /// Staging folder the run used. Empty after a completed run; a
    /// cancelled run parks its leftovers here for inspection or
    /// [`discard_run_transients`].
    pub transient_root: String,
}

/// Staged import of translated scene descriptions.
///
/// The importer owns no store; callers pass one in per run, which keeps
/// the pipeline reentrant and lets tests run against throwaway stores.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use vesper_import::{Importer, ImportOptions, PayloadSource};
/// # use vesper_store::ObjectStore;
/// # fn demo(source: Arc<dyn PayloadSource>, scene: Arc<vesper_scene::SceneDescription>) {
/// let mut store = ObjectStore::new();
/// let importer = Importer::new(source);
/// let result = importer
///     .import(scene, ImportOptions::default(), &mut store)
///     .unwrap();
/// println!("{} assets built", result.finalized.len());
/// # }
/// ```
pub struct Importer {
    source: Arc<dyn PayloadSource>,
    progress: Arc<dyn ProgressSink>,
}

impl Importer {
    pub fn new(source: Arc<dyn PayloadSource>) -> Self {
        Self {
            source,
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Import a scene for the first time
    pub fn import(
        &self,
        scene: Arc<SceneDescription>,
        options: ImportOptions,
        store: &mut ObjectStore,
    ) -> Result<ImportResult> {
        self.run(scene, options, store, CancelFlag::new(), false)
    }

    pub fn import_with_cancel(
        &self,
        scene: Arc<SceneDescription>,
        options: ImportOptions,
        store: &mut ObjectStore,
        cancel: CancelFlag,
    ) -> Result<ImportResult> {
        self.run(scene, options, store, cancel, false)
    }

    /// Import a scene over its previous import, reusing unchanged assets
    pub fn reimport(
        &self,
        scene: Arc<SceneDescription>,
        options: ImportOptions,
        store: &mut ObjectStore,
    ) -> Result<ImportResult> {
        self.run(scene, options, store, CancelFlag::new(), true)
    }

    pub fn reimport_with_cancel(
        &self,
        scene: Arc<SceneDescription>,
        options: ImportOptions,
        store: &mut ObjectStore,
        cancel: CancelFlag,
    ) -> Result<ImportResult> {
        self.run(scene, options, store, cancel, true)
    }

    fn run(
        &self,
        scene: Arc<SceneDescription>,
        options: ImportOptions,
        store: &mut ObjectStore,
        cancel: CancelFlag,
        is_reimport: bool,
    ) -> Result<ImportResult> {
        scene.validate()?;

        let mut ctx = ImportContext::new(
            scene,
            options,
            Arc::clone(&self.progress),
            cancel,
            is_reimport,
        );
        log::info!(
            "import: scene `{}` ({} elements) -> {}",
            ctx.scene_name,
            ctx.scene.elements.len(),
            ctx.destination_root
        );

        let gate = GateSnapshot::capture(store, &ctx);

        resources::import_textures(&mut ctx, store, &gate, &self.source)?;
        if !ctx.check_cancelled() {
            resources::import_materials(&mut ctx, store, &gate)?;
        }
        if !ctx.check_cancelled() {
            resources::import_meshes(&mut ctx, store, &gate, &self.source)?;
        }
        if !ctx.check_cancelled() {
            resources::import_animations(&mut ctx, store, &gate)?;
        }
        if !ctx.check_cancelled() {
            actors::import_actors(&mut ctx, store)?;
        }

        // A run cancelled before finalization leaves everything staged;
        // one that reaches finalization settles whatever it can
        let outcome = if ctx.check_cancelled() && ctx.import_container.is_none() {
            log::info!(
                "import: cancelled before finalization; staged objects kept under {}",
                ctx.transient_root
            );
            FinalizeOutcome {
                finalized: Vec::new(),
                containers: Vec::new(),
                cancelled: true,
            }
        } else {
            finalize::finalize_run(&mut ctx, store)?
        };

        let reused = ctx.reused_count();
        if outcome.cancelled {
            log::warn!("import: run for `{}` cancelled", ctx.scene_name);
        } else {
            log::info!(
                "import: `{}` done, {} built, {} reused, {} issue(s)",
                ctx.scene_name,
                outcome.finalized.len(),
                reused,
                ctx.issues.len()
            );
        }

        Ok(ImportResult {
            finalized: outcome.finalized,
            reused,
            containers: outcome.containers,
            remap: ctx.remap,
            rename_map: ctx.rename_map,
            issues: ctx.issues,
            cancelled: outcome.cancelled,
            transient_root: ctx.transient_root,
        })
    }
}

/// Delete whatever a cancelled run left under its transient root.
///
/// Only paths under the shared transient root are eligible; anything else
/// is refused so a bad argument cannot sweep persisted objects away.
/// Returns the number of objects removed.
pub fn discard_run_transients(store: &mut ObjectStore, transient_root: &str) -> Result<usize> {
    if !transient_root.starts_with(TRANSIENT_ROOT) {
        log::warn!(
            "import: refusing to discard non-transient folder {}",
            transient_root
        );
        return Ok(0);
    }

    let before = store.len();
    for id in store.objects_under(transient_root) {
        // Actor deletes cascade into components, so later ids in the
        // sweep may already be gone
        if store.contains(id) {
            store.delete(id)?;
        }
    }
    let removed = before - store.len();
    if removed > 0 {
        log::info!(
            "import: discarded {} transient object(s) under {}",
            removed,
            transient_root
        );
    }
    Ok(removed)
}

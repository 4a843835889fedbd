//! Finalization stage
//!
//! Moves every staged object from the transient run folder to its final
//! destination, building the run's remap table as it goes. Assets finalize
//! first, one at a time and in dependency-kind order; the remap table is
//! then applied store-wide exactly once; containers and their actors are
//! reconciled last, each container scoped to its own objects so two
//! containers of the same scene never clobber each other's references.
//!
//! Per-asset work is atomic with respect to cancellation: the stage polls
//! the flag between assets, never inside one. A cancelled run keeps its
//! remaining transient objects so the caller can inspect or discard them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use vesper_scene::ContentHash;
use vesper_store::{
    ImportMetadata, MeshBuildFlags, ObjectData, ObjectId, ObjectKind, ObjectStore,
    SceneContainerData,
};

use crate::context::{
    ImportContext, Staged, ACTOR_FOLDER, ANIMATION_FOLDER, GEOMETRY_FOLDER, MATERIAL_FOLDER,
    TEXTURE_FOLDER, TRANSIENT_ROOT,
};
use crate::error::Result;

pub(crate) struct FinalizeOutcome {
    /// Final ids of assets built this run, in finalization order
    pub(crate) finalized: Vec<ObjectId>,
    /// Destination containers that were reconciled
    pub(crate) containers: Vec<ObjectId>,
    pub(crate) cancelled: bool,
}

pub(crate) fn finalize_run(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
) -> Result<FinalizeOutcome> {
    ctx.progress.begin_stage("finalize", ctx.fresh_count());

    let mut finalized = Vec::new();
    let cancelled = finalize_assets(ctx, store, &mut finalized)?;

    // The remap table is applied store-wide exactly once per run, on the
    // cancel path too, so references never point at deleted transients
    store.remap_references(&ctx.remap);

    if cancelled {
        log::info!(
            "import: cancelled during finalization; staged objects kept under {}",
            ctx.transient_root
        );
        return Ok(FinalizeOutcome {
            finalized,
            containers: Vec::new(),
            cancelled: true,
        });
    }

    reconcile_mesh_requirements(ctx, store)?;

    let containers = finalize_containers(ctx, store)?;
    store.rename_soft_paths(&ctx.rename_map);
    let removed = cleanup_transients(ctx, store)?;
    if removed > 0 {
        log::debug!("import: removed {} leftover transient object(s)", removed);
    }

    Ok(FinalizeOutcome {
        finalized,
        containers,
        cancelled: false,
    })
}

/// Finalize staged assets in dependency-kind order. Returns true when the
/// run was cancelled partway through.
fn finalize_assets(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    finalized: &mut Vec<ObjectId>,
) -> Result<bool> {
    let scene = Arc::clone(&ctx.scene);

    for record in &scene.textures {
        if ctx.check_cancelled() {
            return Ok(true);
        }
        let Some(&staged) = ctx.textures.get(&record.name) else {
            continue;
        };
        // Duplicate record names share one staged object; finalize it once
        if ctx.remap.contains_key(&staged.object_id()) {
            continue;
        }
        match staged {
            Staged::Reused { id } => {
                ctx.remap.insert(id, id);
            }
            Staged::Fresh { id, hash } => {
                finalized.push(finalize_one_asset(
                    ctx,
                    store,
                    id,
                    hash,
                    TEXTURE_FOLDER,
                    false,
                )?);
            }
        }
    }

    // Materials and functions finalize parent-first; the scene table order
    // only decides ties
    let mut visiting = HashSet::new();
    for record in &scene.materials {
        if ctx.check_cancelled() {
            return Ok(true);
        }
        let staged = ctx
            .material_functions
            .get(&record.name)
            .or_else(|| ctx.materials.get(&record.name))
            .copied();
        if let Some(staged) = staged {
            finalize_material(ctx, store, staged, &mut visiting, finalized)?;
        }
    }

    for record in &scene.geometries {
        if ctx.check_cancelled() {
            return Ok(true);
        }
        let Some(&staged) = ctx.meshes.get(&record.name) else {
            continue;
        };
        if ctx.remap.contains_key(&staged.object_id()) {
            continue;
        }
        match staged {
            Staged::Reused { id } => {
                ctx.remap.insert(id, id);
            }
            Staged::Fresh { id, hash } => {
                finalized.push(finalize_one_asset(
                    ctx,
                    store,
                    id,
                    hash,
                    GEOMETRY_FOLDER,
                    true,
                )?);
            }
        }
    }

    for record in &scene.animations {
        if ctx.check_cancelled() {
            return Ok(true);
        }
        let Some(&staged) = ctx.animations.get(&record.name) else {
            continue;
        };
        if ctx.remap.contains_key(&staged.object_id()) {
            continue;
        }
        match staged {
            Staged::Reused { id } => {
                ctx.remap.insert(id, id);
            }
            Staged::Fresh { id, hash } => {
                finalized.push(finalize_one_asset(
                    ctx,
                    store,
                    id,
                    hash,
                    ANIMATION_FOLDER,
                    false,
                )?);
            }
        }
    }

    Ok(false)
}

/// Finalize one material, its parent chain first. Memoized through the
/// remap table; parent cycles are broken at the point of re-entry.
fn finalize_material(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    staged: Staged,
    visiting: &mut HashSet<ObjectId>,
    finalized: &mut Vec<ObjectId>,
) -> Result<ObjectId> {
    let id = staged.object_id();
    if let Some(&done) = ctx.remap.get(&id) {
        return Ok(done);
    }
    let Staged::Fresh { id, hash } = staged else {
        ctx.remap.insert(id, id);
        return Ok(id);
    };

    if !visiting.insert(id) {
        log::warn!("import: material parent cycle at {}", id);
    } else {
        if let Some(parent) = store.material_data(id)?.parent {
            if let Some(parent_staged) = staged_material_by_id(ctx, parent) {
                finalize_material(ctx, store, parent_staged, visiting, finalized)?;
            }
        }
        visiting.remove(&id);
    }

    let final_id = finalize_one_asset(ctx, store, id, hash, MATERIAL_FOLDER, true)?;
    finalized.push(final_id);
    Ok(final_id)
}

fn staged_material_by_id(ctx: &ImportContext, id: ObjectId) -> Option<Staged> {
    ctx.materials
        .values()
        .chain(ctx.material_functions.values())
        .find(|staged| staged.object_id() == id)
        .copied()
}

/// Move one fresh asset to its final path, or fold it into the object
/// already there. Either way the remap table gains a total entry and the
/// final object carries this run's provenance.
///
/// `rebuild` forces a build bump even on the relocate path; materials and
/// meshes pass it so derived caches refresh after every import.
fn finalize_one_asset(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    transient: ObjectId,
    hash: ContentHash,
    class_folder: &str,
    rebuild: bool,
) -> Result<ObjectId> {
    let name = store.require(transient)?.name.clone();
    let final_folder = ctx.final_folder(class_folder);

    let (final_id, replaced) = match store.find_by_path(&final_folder, &name) {
        Some(existing) if existing != transient => {
            // The persisted object keeps its identity; only the payload
            // moves over
            let data = store.require(transient)?.data.clone();
            store.replace_data(existing, data)?;
            store.delete(transient)?;
            (existing, true)
        }
        _ => {
            store.relocate(transient, &final_folder, &name)?;
            (transient, false)
        }
    };
    if rebuild || replaced {
        store.bump_build(final_id)?;
    }

    store.set_import_meta(
        final_id,
        ImportMetadata {
            source_uri: ctx.scene.source_uri.clone(),
            source_format: ctx.scene.source_format,
            content_hash: hash,
        },
    )?;
    ctx.remap.insert(transient, final_id);
    ctx.progress.advance(&name);
    Ok(final_id)
}

/// Upgrade persisted meshes whose materials now demand more derived data.
/// Fresh meshes already carry the folded flags from staging.
fn reconcile_mesh_requirements(ctx: &mut ImportContext, store: &mut ObjectStore) -> Result<()> {
    let scene = Arc::clone(&ctx.scene);
    for record in &scene.geometries {
        let Some(staged) = ctx.meshes.get(&record.name) else {
            continue;
        };
        let id = staged.object_id();
        let final_id = ctx.remap.get(&id).copied().unwrap_or(id);

        let mut required = MeshBuildFlags::default();
        for slot in &record.material_slots {
            if let Some(flags) = ctx.material_requirements.get(slot) {
                required = required.union(*flags);
            }
        }

        let needs_bump = {
            let mesh = store.mesh_data_mut(final_id)?;
            let merged = mesh.build_flags.union(required);
            if merged != mesh.build_flags {
                mesh.build_flags = merged;
                true
            } else {
                false
            }
        };
        if needs_bump {
            store.bump_build(final_id)?;
        }
    }
    Ok(())
}

fn finalize_containers(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
) -> Result<Vec<ObjectId>> {
    let Some(transient) = ctx.import_container else {
        return Ok(Vec::new());
    };

    let mut destinations: Vec<ObjectId> = store
        .find_containers_for_scene(&ctx.scene_name)
        .into_iter()
        .filter(|&id| {
            store
                .get(id)
                .map(|record| !record.folder.starts_with(TRANSIENT_ROOT))
                .unwrap_or(false)
        })
        .collect();
    if destinations.is_empty() {
        let id = store.create(
            ObjectKind::SceneContainer,
            &ctx.options.destination_root,
            &ctx.scene_name,
            ObjectData::SceneContainer(SceneContainerData::new(&ctx.scene_name)),
        )?;
        destinations.push(id);
    }

    // The first container is canonical: it receives the staged objects
    // themselves. Later containers receive copies of the canonical ones.
    for (position, &destination) in destinations.iter().enumerate() {
        finalize_one_container(ctx, store, transient, destination, position)?;
    }
    Ok(destinations)
}

fn finalize_one_container(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    transient: ObjectId,
    destination: ObjectId,
    position: usize,
) -> Result<()> {
    // Every container works on its own copy of the remap table; entries
    // added here must not leak into a sibling container's fixups
    if position == 0 {
        ctx.remap.insert(transient, destination);
    }
    let mut map = ctx.remap.clone();
    map.insert(transient, destination);

    refresh_asset_tables(ctx, store, destination)?;

    let previous: BTreeMap<String, ObjectId> =
        store.container_data(destination)?.actors.clone();
    let staged: BTreeMap<String, ObjectId> = store.container_data(transient)?.actors.clone();

    let destination_record = store.require(destination)?;
    let actor_folder = format!(
        "{}/{}/{}",
        destination_record.folder, destination_record.name, ACTOR_FOLDER
    );

    // Deletions first so replaced actors can reclaim their paths
    let mut reconciled: BTreeMap<String, ObjectId> = BTreeMap::new();
    for (element_id, &old) in &previous {
        if staged.contains_key(element_id) {
            continue;
        }
        if ctx.options.reimport.respawn_missing_actors {
            reconciled.insert(element_id.clone(), old);
        } else if store.contains(old) {
            log::debug!("import: actor `{}` gone from source, deleting", element_id);
            store.delete(old)?;
        }
    }

    for (element_id, &staged_actor) in &staged {
        let canonical = ctx.remap.get(&staged_actor).copied().unwrap_or(staged_actor);
        let old = previous
            .get(element_id)
            .copied()
            .filter(|&id| store.contains(id));

        let final_id = match (position, old) {
            (0, Some(old)) => update_in_place(store, old, staged_actor, &actor_folder)?,
            (0, None) => relocate_actor(ctx, store, staged_actor, &actor_folder)?,
            (_, Some(old)) => copy_over(store, canonical, old, &actor_folder)?,
            (_, None) => deep_copy(store, canonical, &actor_folder)?,
        };

        if position == 0 {
            ctx.remap.insert(staged_actor, final_id);
        } else {
            // Copied data points at canonical actors; redirect those refs
            // to this container's own copies
            map.insert(canonical, final_id);
        }
        map.insert(staged_actor, final_id);
        reconciled.insert(element_id.clone(), final_id);
    }

    // Scoped reference fix: this container, its actors, their components.
    // Nothing outside the container sees these entries.
    let mut scoped: Vec<ObjectId> = vec![destination];
    for &actor in reconciled.values() {
        scoped.push(actor);
        if let Ok(data) = store.actor_data(actor) {
            scoped.extend(data.components.iter().copied());
        }
    }
    for id in scoped {
        if let Some(record) = store.get_mut(id) {
            record.data.visit_refs(&mut |slot| {
                if let Some(&target) = map.get(slot) {
                    *slot = target;
                }
            });
        }
    }

    store.container_data_mut(destination)?.actors = reconciled;
    Ok(())
}

/// Overwrite the destination's asset tables with this run's staged maps,
/// resolved through the remap table
fn refresh_asset_tables(
    ctx: &ImportContext,
    store: &mut ObjectStore,
    destination: ObjectId,
) -> Result<()> {
    let resolve = |staged: &Staged| {
        let id = staged.object_id();
        ctx.remap.get(&id).copied().unwrap_or(id)
    };
    let textures: BTreeMap<String, ObjectId> = ctx
        .textures
        .iter()
        .map(|(name, staged)| (name.clone(), resolve(staged)))
        .collect();
    let materials: BTreeMap<String, ObjectId> = ctx
        .materials
        .iter()
        .chain(&ctx.material_functions)
        .map(|(name, staged)| (name.clone(), resolve(staged)))
        .collect();
    let meshes: BTreeMap<String, ObjectId> = ctx
        .meshes
        .iter()
        .map(|(name, staged)| (name.clone(), resolve(staged)))
        .collect();
    let animations: BTreeMap<String, ObjectId> = ctx
        .animations
        .iter()
        .map(|(name, staged)| (name.clone(), resolve(staged)))
        .collect();

    let tables = store.container_data_mut(destination)?;
    tables.textures = textures;
    tables.materials = materials;
    tables.meshes = meshes;
    tables.animations = animations;
    Ok(())
}

/// Reuse a persisted actor's identity: swap in the staged data, replace
/// its components with the staged ones, drop the staged shell.
///
/// The actor's path does not change, so no rename entry is recorded; an
/// unchanged reimport therefore produces an empty rename map.
fn update_in_place(
    store: &mut ObjectStore,
    old: ObjectId,
    staged_actor: ObjectId,
    actor_folder: &str,
) -> Result<ObjectId> {
    let old_components = store.actor_data(old)?.components.clone();
    for component in old_components {
        if store.contains(component) {
            store.delete(component)?;
        }
    }

    let components = store.actor_data(staged_actor)?.components.clone();
    for component in &components {
        let name = store.require(*component)?.name.clone();
        store.relocate(*component, actor_folder, &name)?;
    }

    let data = store.actor_data(staged_actor)?.clone();
    store.replace_data(old, ObjectData::Actor(data))?;

    // The staged shell must not cascade into the components it just lost
    store.actor_data_mut(staged_actor)?.components.clear();
    store.delete(staged_actor)?;
    Ok(old)
}

/// Move a staged actor and its components to the final folder, recording
/// rename entries for soft-path fixups
fn relocate_actor(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    staged_actor: ObjectId,
    actor_folder: &str,
) -> Result<ObjectId> {
    let components = store.actor_data(staged_actor)?.components.clone();
    for component in components {
        relocate_with_rename(ctx, store, component, actor_folder)?;
    }
    relocate_with_rename(ctx, store, staged_actor, actor_folder)?;
    Ok(staged_actor)
}

fn relocate_with_rename(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    id: ObjectId,
    folder: &str,
) -> Result<()> {
    let record = store.require(id)?;
    let old_path = record.path();
    let name = record.name.clone();
    store.relocate(id, folder, &name)?;
    ctx.rename_map
        .insert(old_path, format!("{}/{}", folder, name));
    Ok(())
}

/// Replace a later container's persisted actor with a copy of the
/// canonical one
fn copy_over(
    store: &mut ObjectStore,
    canonical: ObjectId,
    old: ObjectId,
    actor_folder: &str,
) -> Result<ObjectId> {
    let old_components = store.actor_data(old)?.components.clone();
    for component in old_components {
        if store.contains(component) {
            store.delete(component)?;
        }
    }

    let mut data = store.actor_data(canonical)?.clone();
    data.components = copy_components(store, &data.components.clone(), actor_folder)?;
    store.replace_data(old, ObjectData::Actor(data))?;
    Ok(old)
}

/// Duplicate the canonical actor and its components into a later
/// container's folder
fn deep_copy(
    store: &mut ObjectStore,
    canonical: ObjectId,
    actor_folder: &str,
) -> Result<ObjectId> {
    let source = store.require(canonical)?;
    let kind = source.kind;
    let name = source.name.clone();
    let stable_id = source.stable_id.clone();
    let mut data = store.actor_data(canonical)?.clone();

    data.components = copy_components(store, &data.components.clone(), actor_folder)?;
    let copy = store.create(kind, actor_folder, &name, ObjectData::Actor(data))?;
    if let Some(stable_id) = stable_id {
        store.set_stable_id(copy, stable_id)?;
    }
    Ok(copy)
}

fn copy_components(
    store: &mut ObjectStore,
    components: &[ObjectId],
    actor_folder: &str,
) -> Result<Vec<ObjectId>> {
    let mut copies = Vec::with_capacity(components.len());
    for &component in components {
        let record = store.require(component)?;
        let kind = record.kind;
        let name = record.name.clone();
        let stable_id = record.stable_id.clone();
        let data = record.data.clone();
        let copy = store.create(kind, actor_folder, &name, data)?;
        if let Some(stable_id) = stable_id {
            store.set_stable_id(copy, stable_id)?;
        }
        copies.push(copy);
    }
    Ok(copies)
}

/// Delete whatever is still parked under the run's transient root
fn cleanup_transients(ctx: &ImportContext, store: &mut ObjectStore) -> Result<usize> {
    let leftovers = store.objects_under(&ctx.transient_root);
    let count = leftovers.len();
    for id in leftovers {
        if store.contains(id) {
            store.delete(id)?;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use vesper_scene::{GeometryRecord, SceneDescription, SceneElement, TextureRecord};
    use vesper_store::TextureData;

    use super::*;
    use crate::fetch::{GeometryPayload, PayloadSource, SourceCapabilities, TexturePayload};
    use crate::gate::GateSnapshot;
    use crate::options::ImportOptions;
    use crate::progress::{CancelFlag, NullProgress};
    use crate::{actors, resources};

    struct TinySource;

    impl PayloadSource for TinySource {
        fn capabilities(&self) -> SourceCapabilities {
            SourceCapabilities {
                parallel_fetch: true,
            }
        }
        fn fetch_geometry(
            &self,
            _record: &GeometryRecord,
        ) -> std::result::Result<GeometryPayload, String> {
            Ok(GeometryPayload::default())
        }
        fn fetch_texture(
            &self,
            _record: &TextureRecord,
        ) -> std::result::Result<TexturePayload, String> {
            Ok(TexturePayload {
                width: 2,
                height: 2,
                pixels: vec![0; 16],
            })
        }
    }

    fn staged_run(scene: SceneDescription, store: &mut ObjectStore) -> ImportContext {
        let mut ctx = ImportContext::new(
            Arc::new(scene),
            ImportOptions::default(),
            Arc::new(NullProgress),
            CancelFlag::new(),
            false,
        );
        let gate = GateSnapshot::capture(store, &ctx);
        let source: Arc<dyn PayloadSource> = Arc::new(TinySource);
        resources::import_textures(&mut ctx, store, &gate, &source).expect("textures");
        resources::import_materials(&mut ctx, store, &gate).expect("materials");
        resources::import_meshes(&mut ctx, store, &gate, &source).expect("meshes");
        resources::import_animations(&mut ctx, store, &gate).expect("animations");
        actors::import_actors(&mut ctx, store).expect("actors");
        ctx
    }

    fn texture_scene() -> SceneDescription {
        let mut scene = SceneDescription::new("hall");
        scene.source_uri = "hall.udatasmith".to_string();
        scene.textures.push(TextureRecord::new("brick", "brick.png"));
        scene.add_element(SceneElement::new(vesper_scene::ElementKind::Group, "root"));
        scene
    }

    #[test]
    fn fresh_assets_relocate_and_carry_provenance() {
        let mut store = ObjectStore::new();
        let mut ctx = staged_run(texture_scene(), &mut store);

        let outcome = finalize_run(&mut ctx, &mut store).expect("finalize");
        assert!(!outcome.cancelled);
        assert_eq!(outcome.finalized.len(), 1);
        assert_eq!(outcome.containers.len(), 1);

        let texture = store
            .find_by_path("/Project/hall/Textures", "brick")
            .expect("final texture");
        let meta = store
            .require(texture)
            .expect("record")
            .import_meta
            .clone()
            .expect("metadata");
        assert_eq!(meta.source_uri, "hall.udatasmith");

        // Nothing remains under the run's transient root
        assert!(store.objects_under(&ctx.transient_root).is_empty());
    }

    #[test]
    fn replacing_keeps_the_existing_identity() {
        let mut store = ObjectStore::new();

        // Persisted object from an earlier run
        let existing = store
            .create(
                ObjectKind::Texture,
                "/Project/hall/Textures",
                "brick",
                ObjectData::Texture(TextureData::default()),
            )
            .expect("create");

        let mut ctx = staged_run(texture_scene(), &mut store);
        let staged_id = ctx.textures["brick"].object_id();
        assert_ne!(staged_id, existing);

        finalize_run(&mut ctx, &mut store).expect("finalize");

        // Same identity, fresh payload, transient gone
        let found = store
            .find_by_path("/Project/hall/Textures", "brick")
            .expect("final texture");
        assert_eq!(found, existing);
        assert!(!store.contains(staged_id));
        assert_eq!(ctx.remap[&staged_id], existing);
        assert!(store.require(existing).expect("record").build_counter > 0);
    }

    #[test]
    fn actors_land_in_the_destination_container() {
        let mut scene = SceneDescription::new("set");
        let root = scene.add_element(SceneElement::new(
            vesper_scene::ElementKind::Group,
            "stage",
        ));
        scene.add_child(
            root,
            SceneElement::new(vesper_scene::ElementKind::Group, "prop"),
        );

        let mut store = ObjectStore::new();
        let mut ctx = staged_run(scene, &mut store);
        let outcome = finalize_run(&mut ctx, &mut store).expect("finalize");

        let container = outcome.containers[0];
        let actors = store.container_data(container).expect("container").actors.clone();
        assert_eq!(actors.len(), 2);
        for (element_id, actor) in &actors {
            let record = store.require(*actor).expect("actor record");
            assert_eq!(record.folder, "/Project/set/Actors");
            assert_eq!(record.stable_id.as_deref(), Some(element_id.as_str()));
        }
        // Relocated actors record their old transient paths
        assert_eq!(ctx.rename_map.len(), 2);
    }
}

//! Resource import stage
//!
//! Resources are staged strictly in dependency order: textures, then
//! material functions, then materials, then meshes, then animations.
//! Payloads for textures and meshes are fetched on worker threads when
//! the source allows it, but staged objects are always constructed by
//! joining the fetches in declaration order, so object creation stays
//! deterministic no matter how the fetches interleave.
//!
//! A resource that fails to fetch is recorded as an issue and left out of
//! the staged maps; later consumers degrade per reference instead of
//! failing the run.

use std::collections::HashSet;
use std::sync::Arc;

use vesper_scene::{
    ContentHash, GeometryTopology, MaterialRecord, ParamCategory, ParamValue, SceneDescription,
    StableHash, TextureKind, TextureMode,
};
use vesper_store::{
    AnimationCurve, AnimationData, CompiledParameter, MaterialData, MeshBuildFlags, MeshData,
    ObjectData, ObjectId, ObjectKind, ObjectStore, TextureData,
};

use crate::context::{
    ImportContext, Staged, ACTOR_FOLDER, ANIMATION_FOLDER, GEOMETRY_FOLDER, MATERIAL_FOLDER,
    TEXTURE_FOLDER,
};
use crate::error::Result;
use crate::fetch::{FetchJob, FetchPool, GeometryPayload, PayloadSource, TexturePayload};
use crate::gate::{AssetClass, GateDecision, GateSnapshot};
use crate::naming::{ordered_function_list, resolve_function_parameter_names, ResolvedNames};
use crate::options::ConflictPolicy;

/// Marker message for fetch jobs that observed the cancel flag
const CANCELLED: &str = "cancelled";

/// Outcome of planning one record before the fetch/join split
#[derive(Clone, Copy)]
enum Plan {
    /// Reused or skipped during planning; nothing to build at join time
    Settled,
    Build { pooled: bool, hash: ContentHash },
}

pub(crate) fn import_textures(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    gate: &GateSnapshot,
    source: &Arc<dyn PayloadSource>,
) -> Result<()> {
    let scene = Arc::clone(&ctx.scene);
    ctx.progress.begin_stage("textures", scene.textures.len());
    let parallel = source.capabilities().parallel_fetch;

    let mut plans = Vec::with_capacity(scene.textures.len());
    let mut jobs: Vec<(usize, FetchJob<std::result::Result<TexturePayload, String>>)> = Vec::new();
    for (index, record) in scene.textures.iter().enumerate() {
        if ctx.textures.contains_key(&record.name) {
            ctx.warn(&record.name, "duplicate texture name; keeping the first record");
            plans.push(Plan::Settled);
            continue;
        }
        let hash = record.content_hash();
        let decision = gate.decide(
            store,
            ctx,
            AssetClass::Texture,
            &record.name,
            hash,
            ctx.options.texture_conflicts,
        );
        match decision {
            GateDecision::Reuse(id) => {
                ctx.textures.insert(record.name.clone(), Staged::Reused { id });
                plans.push(Plan::Settled);
            }
            GateDecision::Build => {
                let pooled = parallel && texture_needs_fetch(record.kind);
                if pooled {
                    let source = Arc::clone(source);
                    let record = record.clone();
                    let cancel = ctx.cancel.clone();
                    jobs.push((
                        index,
                        Box::new(move || {
                            if cancel.is_cancelled() {
                                return Err(CANCELLED.to_string());
                            }
                            source.fetch_texture(&record)
                        }),
                    ));
                }
                plans.push(Plan::Build { pooled, hash });
            }
        }
    }

    let mut pool = FetchPool::spawn(jobs, ctx.options.fetch_workers());
    let folder = ctx.transient_folder(TEXTURE_FOLDER);
    for (index, record) in scene.textures.iter().enumerate() {
        let Plan::Build { pooled, hash } = plans[index] else {
            ctx.progress.advance(&record.name);
            continue;
        };
        if ctx.check_cancelled() {
            pool.drain();
            return Ok(());
        }
        let fetched = if pooled {
            // A missing slot means the worker died mid-job; treat it as a
            // failed fetch, not an empty payload
            Some(
                pool.take(index)
                    .unwrap_or_else(|| Err("fetch worker terminated".to_string())),
            )
        } else if texture_needs_fetch(record.kind) {
            Some(source.fetch_texture(record))
        } else {
            None
        };
        let payload = match fetched {
            Some(Ok(payload)) => payload,
            Some(Err(message)) => {
                if ctx.cancel.is_cancelled() {
                    pool.drain();
                    return Ok(());
                }
                ctx.error(&record.name, format!("texture fetch failed: {}", message));
                ctx.progress.advance(&record.name);
                continue;
            }
            // Procedural and constant textures carry no external payload
            None => TexturePayload::default(),
        };

        let data = TextureData {
            mode: record.mode,
            srgb: record.srgb,
            width: payload.width,
            height: payload.height,
            pixels: payload.pixels,
        };
        let id = store.create(
            ObjectKind::Texture,
            &folder,
            &record.name,
            ObjectData::Texture(data),
        )?;
        ctx.textures.insert(record.name.clone(), Staged::Fresh { id, hash });
        ctx.progress.advance(&record.name);
    }
    Ok(())
}

fn texture_needs_fetch(kind: TextureKind) -> bool {
    matches!(kind, TextureKind::Image2D | TextureKind::Cube)
}

pub(crate) fn import_materials(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    gate: &GateSnapshot,
) -> Result<()> {
    let scene = Arc::clone(&ctx.scene);
    let functions = ordered_function_list(&scene);
    let resolved = resolve_function_parameter_names(&scene, &functions);
    if resolved.renamed() > 0 {
        log::info!(
            "import: renamed {} function parameters to stay collision-free",
            resolved.renamed()
        );
    }
    let function_set: HashSet<u32> = functions.iter().map(|(index, _)| *index).collect();

    ctx.progress.begin_stage("materials", scene.materials.len());

    // Functions first, leaves before referencers, so referencing materials
    // can take their ids by name
    for (index, _) in &functions {
        if ctx.check_cancelled() {
            return Ok(());
        }
        import_one_material(
            ctx,
            store,
            gate,
            &scene,
            *index,
            ObjectKind::MaterialFunction,
            &resolved,
        )?;
        ctx.progress.advance(&scene.materials[*index as usize].name);
    }

    for index in 0..scene.materials.len() as u32 {
        if function_set.contains(&index) {
            continue;
        }
        if ctx.check_cancelled() {
            return Ok(());
        }
        import_one_material(
            ctx,
            store,
            gate,
            &scene,
            index,
            ObjectKind::Material,
            &resolved,
        )?;
        ctx.progress.advance(&scene.materials[index as usize].name);
    }

    patch_instance_parents(ctx, store, &scene)
}

fn import_one_material(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    gate: &GateSnapshot,
    scene: &SceneDescription,
    index: u32,
    kind: ObjectKind,
    resolved: &ResolvedNames,
) -> Result<()> {
    let record = &scene.materials[index as usize];
    if ctx.materials.contains_key(&record.name)
        || ctx.material_functions.contains_key(&record.name)
    {
        ctx.warn(&record.name, "duplicate material name; keeping the first record");
        return Ok(());
    }

    // Requirements are keyed by name and must reach meshes even when the
    // material object itself is reused
    ctx.require_for_material(&record.name, requirements_of(scene, record));

    let hash = record.content_hash();
    let decision = gate.decide(
        store,
        ctx,
        AssetClass::Material,
        &record.name,
        hash,
        ctx.options.material_conflicts,
    );
    if let GateDecision::Reuse(id) = decision {
        staged_materials(ctx, kind).insert(record.name.clone(), Staged::Reused { id });
        return Ok(());
    }

    let mut parameters = Vec::with_capacity(record.parameters.len());
    let mut textures: Vec<ObjectId> = Vec::new();
    for (slot, parameter) in record.parameters.iter().enumerate() {
        let final_name = resolved
            .final_name(index, slot as u32, &parameter.name)
            .to_string();
        match (parameter.category, &parameter.value) {
            (ParamCategory::TextureRef, ParamValue::Ref(texture_name)) => {
                let staged = ctx.textures.get(texture_name).map(|s| s.object_id());
                match staged {
                    Some(texture) => {
                        if !textures.contains(&texture) {
                            textures.push(texture);
                        }
                        parameters.push(CompiledParameter {
                            name: final_name,
                            category: parameter.category,
                            value: parameter.value.clone(),
                        });
                    }
                    None => {
                        let message = format!(
                            "texture `{}` unavailable; dropping parameter `{}`",
                            texture_name, parameter.name
                        );
                        ctx.warn(&record.name, message);
                    }
                }
            }
            _ => parameters.push(CompiledParameter {
                name: final_name,
                category: parameter.category,
                value: parameter.value.clone(),
            }),
        }
    }

    let mut function_ids = Vec::with_capacity(record.functions.len());
    for function_name in &record.functions {
        let staged = ctx
            .material_functions
            .get(function_name)
            .map(|s| s.object_id());
        match staged {
            Some(function) => function_ids.push(function),
            None => ctx.warn(
                &record.name,
                format!("material function `{}` unavailable", function_name),
            ),
        }
    }

    let data = MaterialData {
        model: record.model.clone(),
        parameters,
        textures,
        functions: function_ids,
        // Parents are patched once every material is staged; instances may
        // name a parent declared later in the table
        parent: None,
    };
    let folder = ctx.transient_folder(MATERIAL_FOLDER);
    let id = store.create(kind, &folder, &record.name, ObjectData::Material(data))?;
    staged_materials(ctx, kind).insert(record.name.clone(), Staged::Fresh { id, hash });
    Ok(())
}

fn staged_materials(
    ctx: &mut ImportContext,
    kind: ObjectKind,
) -> &mut std::collections::HashMap<String, Staged> {
    if kind == ObjectKind::MaterialFunction {
        &mut ctx.material_functions
    } else {
        &mut ctx.materials
    }
}

/// Derived-data demands a material places on every mesh that binds it
fn requirements_of(scene: &SceneDescription, record: &MaterialRecord) -> MeshBuildFlags {
    let mut flags = MeshBuildFlags::default();
    for parameter in &record.parameters {
        if let (ParamCategory::TextureRef, ParamValue::Ref(texture_name)) =
            (parameter.category, &parameter.value)
        {
            flags.extra_uvs = true;
            let normal_map = scene
                .texture_index(texture_name)
                .map(|t| scene.textures[t as usize].mode == TextureMode::Normal)
                .unwrap_or(false);
            if normal_map {
                flags.tangents = true;
            }
        }
        if parameter.name.eq_ignore_ascii_case("displacement") {
            flags.adjacency = true;
        }
    }
    flags
}

fn patch_instance_parents(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    scene: &SceneDescription,
) -> Result<()> {
    for record in &scene.materials {
        let Some(parent_name) = &record.parent else {
            continue;
        };
        let staged = ctx
            .materials
            .get(&record.name)
            .or_else(|| ctx.material_functions.get(&record.name))
            .copied();
        // Reused materials keep their persisted parent link
        let Some(Staged::Fresh { id, .. }) = staged else {
            continue;
        };
        let parent = ctx
            .materials
            .get(parent_name)
            .or_else(|| ctx.material_functions.get(parent_name))
            .map(|s| s.object_id());
        match parent {
            Some(parent) => store.material_data_mut(id)?.parent = Some(parent),
            None => ctx.warn(
                &record.name,
                format!("parent material `{}` unavailable", parent_name),
            ),
        }
    }
    Ok(())
}

pub(crate) fn import_meshes(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    gate: &GateSnapshot,
    source: &Arc<dyn PayloadSource>,
) -> Result<()> {
    if !ctx.options.import_geometry {
        log::debug!("import: geometry disabled by options");
        return Ok(());
    }
    let scene = Arc::clone(&ctx.scene);
    ctx.progress.begin_stage("meshes", scene.geometries.len());
    let parallel = source.capabilities().parallel_fetch;

    let mut plans = Vec::with_capacity(scene.geometries.len());
    let mut jobs: Vec<(usize, FetchJob<std::result::Result<GeometryPayload, String>>)> =
        Vec::new();
    for (index, record) in scene.geometries.iter().enumerate() {
        if ctx.meshes.contains_key(&record.name) {
            ctx.warn(&record.name, "duplicate geometry name; keeping the first record");
            plans.push(Plan::Settled);
            continue;
        }
        let hash = record.content_hash();
        let decision = gate.decide(
            store,
            ctx,
            AssetClass::Mesh,
            &record.name,
            hash,
            ConflictPolicy::Replace,
        );
        match decision {
            GateDecision::Reuse(id) => {
                ctx.meshes.insert(record.name.clone(), Staged::Reused { id });
                plans.push(Plan::Settled);
            }
            GateDecision::Build => {
                let pooled = parallel && record.topology != GeometryTopology::Procedural;
                if pooled {
                    let source = Arc::clone(source);
                    let record = record.clone();
                    let cancel = ctx.cancel.clone();
                    jobs.push((
                        index,
                        Box::new(move || {
                            if cancel.is_cancelled() {
                                return Err(CANCELLED.to_string());
                            }
                            source.fetch_geometry(&record)
                        }),
                    ));
                }
                plans.push(Plan::Build { pooled, hash });
            }
        }
    }

    let mut pool = FetchPool::spawn(jobs, ctx.options.fetch_workers());
    let folder = ctx.transient_folder(GEOMETRY_FOLDER);
    for (index, record) in scene.geometries.iter().enumerate() {
        let Plan::Build { pooled, hash } = plans[index] else {
            ctx.progress.advance(&record.name);
            continue;
        };
        if ctx.check_cancelled() {
            pool.drain();
            return Ok(());
        }
        let fetched = if pooled {
            Some(
                pool.take(index)
                    .unwrap_or_else(|| Err("fetch worker terminated".to_string())),
            )
        } else if record.topology != GeometryTopology::Procedural {
            Some(source.fetch_geometry(record))
        } else {
            None
        };
        let payload = match fetched {
            Some(Ok(payload)) => payload,
            Some(Err(message)) => {
                if ctx.cancel.is_cancelled() {
                    pool.drain();
                    return Ok(());
                }
                ctx.error(&record.name, format!("geometry fetch failed: {}", message));
                ctx.progress.advance(&record.name);
                continue;
            }
            None => GeometryPayload::default(),
        };

        // Slots are positional; an unresolved slot keeps its place as an
        // invalid id rather than shifting the ones after it
        let mut build_flags = MeshBuildFlags::default();
        let mut materials = Vec::with_capacity(record.material_slots.len());
        for slot in &record.material_slots {
            if let Some(required) = ctx.material_requirements.get(slot) {
                build_flags = build_flags.union(*required);
            }
            let staged = ctx
                .materials
                .get(slot)
                .or_else(|| ctx.material_functions.get(slot))
                .map(|s| s.object_id());
            match staged {
                Some(material) => materials.push(material),
                None => {
                    ctx.warn(&record.name, format!("material slot `{}` unresolved", slot));
                    materials.push(ObjectId::invalid());
                }
            }
        }

        let data = MeshData {
            positions: payload.positions,
            normals: payload.normals,
            uvs: payload.uvs,
            indices: payload.indices,
            materials,
            build_flags,
        };
        let id = store.create(ObjectKind::Mesh, &folder, &record.name, ObjectData::Mesh(data))?;
        ctx.meshes.insert(record.name.clone(), Staged::Fresh { id, hash });
        ctx.progress.advance(&record.name);
    }
    Ok(())
}

pub(crate) fn import_animations(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    gate: &GateSnapshot,
) -> Result<()> {
    if !ctx.options.import_animations {
        log::debug!("import: animations disabled by options");
        return Ok(());
    }
    let scene = Arc::clone(&ctx.scene);
    ctx.progress.begin_stage("animations", scene.animations.len());
    let folder = ctx.transient_folder(ANIMATION_FOLDER);

    for record in &scene.animations {
        if ctx.check_cancelled() {
            return Ok(());
        }
        if ctx.animations.contains_key(&record.name) {
            ctx.warn(&record.name, "duplicate animation name; keeping the first record");
            ctx.progress.advance(&record.name);
            continue;
        }
        let hash = record.content_hash();
        let decision = gate.decide(
            store,
            ctx,
            AssetClass::Animation,
            &record.name,
            hash,
            ConflictPolicy::Replace,
        );
        match decision {
            GateDecision::Reuse(id) => {
                ctx.animations.insert(record.name.clone(), Staged::Reused { id });
            }
            GateDecision::Build => {
                let curves = record
                    .tracks
                    .iter()
                    .map(|track| AnimationCurve {
                        // Bound to the path the actor will occupy after
                        // finalization; an unchanged reimport then has
                        // nothing to rewrite
                        bound_path: format!(
                            "{}/{}/{}",
                            ctx.destination_root, ACTOR_FOLDER, track.target
                        ),
                        times: track.times.clone(),
                        transforms: track.transforms.clone(),
                    })
                    .collect();
                let data = AnimationData {
                    frame_rate: record.frame_rate,
                    curves,
                };
                let id = store.create(
                    ObjectKind::Animation,
                    &folder,
                    &record.name,
                    ObjectData::Animation(data),
                )?;
                ctx.animations.insert(record.name.clone(), Staged::Fresh { id, hash });
            }
        }
        ctx.progress.advance(&record.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use vesper_scene::{
        AnimationRecord, GeometryRecord, MaterialParameter, TextureRecord, TransformTrack,
    };

    use super::*;
    use crate::options::ImportOptions;
    use crate::progress::{CancelFlag, NullProgress};

    struct StubSource {
        parallel: bool,
    }

    impl PayloadSource for StubSource {
        fn capabilities(&self) -> crate::fetch::SourceCapabilities {
            crate::fetch::SourceCapabilities {
                parallel_fetch: self.parallel,
            }
        }

        fn fetch_geometry(
            &self,
            record: &GeometryRecord,
        ) -> std::result::Result<GeometryPayload, String> {
            if record.source == "missing" {
                return Err("no payload".to_string());
            }
            Ok(GeometryPayload {
                positions: vec![[0.0; 3]; 3],
                normals: vec![[0.0, 1.0, 0.0]; 3],
                uvs: vec![[0.0; 2]; 3],
                indices: vec![0, 1, 2],
            })
        }

        fn fetch_texture(
            &self,
            record: &TextureRecord,
        ) -> std::result::Result<TexturePayload, String> {
            if record.source == "missing" {
                return Err("no payload".to_string());
            }
            Ok(TexturePayload {
                width: 4,
                height: 4,
                pixels: vec![255; 64],
            })
        }
    }

    fn ctx_for(scene: SceneDescription) -> ImportContext {
        ImportContext::new(
            Arc::new(scene),
            ImportOptions::default(),
            Arc::new(NullProgress),
            CancelFlag::new(),
            false,
        )
    }

    fn empty_gate(store: &ObjectStore, ctx: &ImportContext) -> GateSnapshot {
        GateSnapshot::capture(store, ctx)
    }

    #[test]
    fn duplicate_texture_names_stage_once() {
        let mut scene = SceneDescription::new("dups");
        scene.textures.push(TextureRecord::new("wood", "wood.png"));
        scene.textures.push(TextureRecord::new("wood", "other.png"));

        let mut ctx = ctx_for(scene);
        let mut store = ObjectStore::new();
        let gate = empty_gate(&store, &ctx);
        let source: Arc<dyn PayloadSource> = Arc::new(StubSource { parallel: true });

        import_textures(&mut ctx, &mut store, &gate, &source).expect("import");
        assert_eq!(store.len(), 1);
        assert_eq!(ctx.textures.len(), 1);
        assert_eq!(ctx.issues.len(), 1);
    }

    #[test]
    fn failed_fetch_leaves_texture_unstaged() {
        let mut scene = SceneDescription::new("broken");
        scene.textures.push(TextureRecord::new("bad", "missing"));
        scene.textures.push(TextureRecord::new("good", "ok.png"));

        let mut ctx = ctx_for(scene);
        let mut store = ObjectStore::new();
        let gate = empty_gate(&store, &ctx);
        let source: Arc<dyn PayloadSource> = Arc::new(StubSource { parallel: true });

        import_textures(&mut ctx, &mut store, &gate, &source).expect("import");
        assert!(!ctx.textures.contains_key("bad"));
        assert!(ctx.textures.contains_key("good"));
        assert_eq!(ctx.issues.len(), 1);
    }

    #[test]
    fn missing_texture_drops_material_parameter() {
        let mut scene = SceneDescription::new("mat");
        scene.materials.push(
            MaterialRecord::new("painted", "pbr")
                .with_parameter(MaterialParameter::texture("base", "nowhere"))
                .with_parameter(MaterialParameter::scalar("roughness", 0.4)),
        );

        let mut ctx = ctx_for(scene);
        let mut store = ObjectStore::new();
        let gate = empty_gate(&store, &ctx);

        import_materials(&mut ctx, &mut store, &gate).expect("import");
        let id = ctx.materials["painted"].object_id();
        let material = store.material_data(id).expect("material data");
        assert_eq!(material.parameters.len(), 1);
        assert_eq!(material.parameters[0].name, "roughness");
        assert!(material.textures.is_empty());
        assert_eq!(ctx.issues.len(), 1);
    }

    #[test]
    fn normal_map_material_requires_tangents() {
        let mut scene = SceneDescription::new("req");
        scene.textures.push(
            TextureRecord::new("bumps", "bumps.png").with_mode(TextureMode::Normal),
        );
        scene.materials.push(
            MaterialRecord::new("bumpy", "pbr")
                .with_parameter(MaterialParameter::texture("normal", "bumps")),
        );
        scene.geometries.push(
            GeometryRecord::new("rock")
                .with_source("rock.bin")
                .with_slots(["bumpy"]),
        );

        let mut ctx = ctx_for(scene);
        let mut store = ObjectStore::new();
        let gate = empty_gate(&store, &ctx);
        let source: Arc<dyn PayloadSource> = Arc::new(StubSource { parallel: false });

        import_textures(&mut ctx, &mut store, &gate, &source).expect("textures");
        import_materials(&mut ctx, &mut store, &gate).expect("materials");
        import_meshes(&mut ctx, &mut store, &gate, &source).expect("meshes");

        let mesh = ctx.meshes["rock"].object_id();
        let flags = store.mesh_data_mut(mesh).expect("mesh data").build_flags;
        assert!(flags.tangents);
        assert!(flags.extra_uvs);
        assert!(!flags.adjacency);
    }

    #[test]
    fn instance_parent_resolves_after_all_materials() {
        // The instance appears before its parent in the table
        let mut scene = SceneDescription::new("inst");
        scene
            .materials
            .push(MaterialRecord::new("red_instance", "pbr").with_parent("base"));
        scene.materials.push(MaterialRecord::new("base", "pbr"));

        let mut ctx = ctx_for(scene);
        let mut store = ObjectStore::new();
        let gate = empty_gate(&store, &ctx);

        import_materials(&mut ctx, &mut store, &gate).expect("import");
        let instance = ctx.materials["red_instance"].object_id();
        let base = ctx.materials["base"].object_id();
        assert_eq!(
            store.material_data(instance).expect("instance").parent,
            Some(base)
        );
    }

    #[test]
    fn animation_curves_bind_final_actor_paths() {
        let mut scene = SceneDescription::new("anim");
        scene.animations.push(AnimationRecord {
            name: "spin".to_string(),
            frame_rate: 24.0,
            tracks: vec![TransformTrack {
                target: "door_1".to_string(),
                times: vec![0.0, 1.0],
                transforms: vec![glam::Mat4::IDENTITY, glam::Mat4::IDENTITY],
            }],
        });

        let mut ctx = ctx_for(scene);
        let mut store = ObjectStore::new();
        let gate = empty_gate(&store, &ctx);

        import_animations(&mut ctx, &mut store, &gate).expect("import");
        let id = ctx.animations["spin"].object_id();
        match &store.require(id).expect("record").data {
            ObjectData::Animation(animation) => {
                assert_eq!(
                    animation.curves[0].bound_path,
                    "/Project/anim/Actors/door_1"
                );
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }
}

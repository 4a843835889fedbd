//! Actor hierarchy builder
//!
//! Walks the element tree depth-first and produces one object per node.
//! Top-level objects are flat under the run's scene container; source
//! nesting survives only through component attachment, where a component
//! element becomes a component object owned by the nearest imported
//! ancestor.
//!
//! When an element cannot be imported, its component children are skipped
//! with it and its remaining children are walked without a hierarchy push,
//! so their objects attach to the element's own ancestor.

use std::sync::Arc;

use vesper_scene::{ElementKind, LightKind, SceneDescription, SceneElement};
use vesper_store::{
    ActorData, ActorPayload, ObjectData, ObjectId, ObjectKind, ObjectStore, SceneContainerData,
};

use crate::context::{ImportContext, ACTOR_FOLDER};
use crate::error::{ImportError, Result};

pub(crate) fn import_actors(ctx: &mut ImportContext, store: &mut ObjectStore) -> Result<()> {
    let scene = Arc::clone(&ctx.scene);
    let node_count = scene.elements.iter().filter(|e| e.kind.is_node()).count();
    ctx.progress.begin_stage("actors", node_count);

    let container = store.create(
        ObjectKind::SceneContainer,
        &ctx.transient_root,
        &ctx.scene_name,
        ObjectData::SceneContainer(SceneContainerData::new(&ctx.scene_name)),
    )?;
    ctx.import_container = Some(container);
    fill_asset_tables(ctx, store, container)?;

    for root in scene.roots() {
        if ctx.check_cancelled() {
            return Ok(());
        }
        import_element(ctx, store, &scene, root)?;
    }
    if ctx.check_cancelled() {
        return Ok(());
    }
    resolve_camera_targets(ctx, store, &scene)
}

/// Copy the staged asset maps into the transient container's tables
fn fill_asset_tables(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    container: ObjectId,
) -> Result<()> {
    let tables = store.container_data_mut(container)?;
    for (name, staged) in &ctx.textures {
        tables.textures.insert(name.clone(), staged.object_id());
    }
    for (name, staged) in ctx.materials.iter().chain(&ctx.material_functions) {
        tables.materials.insert(name.clone(), staged.object_id());
    }
    for (name, staged) in &ctx.meshes {
        tables.meshes.insert(name.clone(), staged.object_id());
    }
    for (name, staged) in &ctx.animations {
        tables.animations.insert(name.clone(), staged.object_id());
    }
    Ok(())
}

fn import_element(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    scene: &SceneDescription,
    index: u32,
) -> Result<()> {
    if ctx.check_cancelled() {
        return Ok(());
    }
    let element = &scene.elements[index as usize];
    if !element.kind.is_node() {
        log::debug!("import: element `{}` is not a node, skipping", element.id);
        return walk_children_detached(ctx, store, scene, element);
    }

    if excluded_by_options(ctx, element) {
        ctx.non_imported.insert(element.id.clone());
        ctx.progress.advance(&element.id);
        return walk_children_detached(ctx, store, scene, element);
    }

    let payload = match build_payload(ctx, scene, element)? {
        Some(payload) => payload,
        None => {
            // Already reported; children of a failed component owner would
            // dangle, so only non-component children continue
            ctx.non_imported.insert(element.id.clone());
            ctx.progress.advance(&element.id);
            return walk_children_detached(ctx, store, scene, element);
        }
    };

    let label = ctx.label_provider.generate_unique(&element.label);
    let kind = if element.is_component {
        ObjectKind::Component
    } else {
        ObjectKind::Actor
    };
    let data = ActorData {
        label,
        transform: element.local_transform,
        payload,
        components: Vec::new(),
    };
    let id = store.create(
        kind,
        &ctx.transient_folder(ACTOR_FOLDER),
        &element.id,
        ObjectData::Actor(data),
    )?;
    store.set_stable_id(id, &element.id)?;
    ctx.actors.insert(element.id.clone(), id);

    if element.is_component {
        // Validation rejects component roots, and a component under a
        // failed parent is skipped before we get here
        let owner = *ctx.hierarchy.last().ok_or(ImportError::MissingResource {
            kind: "component owner",
            index,
        })?;
        store.actor_data_mut(owner)?.components.push(id);
    } else if let Some(container) = ctx.import_container {
        store
            .container_data_mut(container)?
            .actors
            .insert(element.id.clone(), id);
    }

    ctx.progress.advance(&element.id);

    ctx.hierarchy.push(id);
    for &child in &element.children {
        import_element(ctx, store, scene, child)?;
    }
    ctx.hierarchy.pop();
    Ok(())
}

/// Recurse into children without a hierarchy push. Component children are
/// skipped outright and marked non-imported along with their subtrees.
fn walk_children_detached(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    scene: &SceneDescription,
    element: &SceneElement,
) -> Result<()> {
    for &child in &element.children {
        let child_element = &scene.elements[child as usize];
        if child_element.is_component {
            mark_subtree_skipped(ctx, scene, child);
        } else {
            import_element(ctx, store, scene, child)?;
        }
    }
    Ok(())
}

fn mark_subtree_skipped(ctx: &mut ImportContext, scene: &SceneDescription, index: u32) {
    let element = &scene.elements[index as usize];
    ctx.non_imported.insert(element.id.clone());
    if element.kind.is_node() {
        ctx.progress.advance(&element.id);
    }
    for &child in &element.children {
        mark_subtree_skipped(ctx, scene, child);
    }
}

fn excluded_by_options(ctx: &ImportContext, element: &SceneElement) -> bool {
    match element.kind {
        ElementKind::Instance | ElementKind::InstancedMesh | ElementKind::Landscape => {
            !ctx.options.import_geometry
        }
        ElementKind::Light | ElementKind::Environment => !ctx.options.import_lights,
        ElementKind::Camera => !ctx.options.import_cameras,
        _ => false,
    }
}

/// Kind-specific payload construction. `Ok(None)` means the element could
/// not be built and has been reported.
fn build_payload(
    ctx: &mut ImportContext,
    scene: &SceneDescription,
    element: &SceneElement,
) -> Result<Option<ActorPayload>> {
    let payload = match element.kind {
        ElementKind::Instance => {
            let Some(mesh) = resolve_mesh(ctx, scene, element)? else {
                return Ok(None);
            };
            match mesh {
                Some(mesh) => ActorPayload::MeshInstance {
                    mesh,
                    override_materials: override_materials(ctx, scene, element)?,
                },
                // An instance without geometry is a plain transform node
                None => ActorPayload::Empty,
            }
        }
        ElementKind::InstancedMesh => {
            let Some(mesh) = resolve_mesh(ctx, scene, element)? else {
                return Ok(None);
            };
            match mesh {
                Some(mesh) => ActorPayload::InstancedMesh {
                    mesh,
                    instances: element.instance_transforms.clone(),
                },
                None => ActorPayload::Empty,
            }
        }
        ElementKind::Light => match element.light {
            Some(light) => {
                let record = scene.lights.get(light as usize).ok_or(
                    ImportError::MissingResource {
                        kind: "light",
                        index: light,
                    },
                )?;
                ActorPayload::Light {
                    kind: record.kind,
                    intensity: record.intensity,
                    color: record.color,
                }
            }
            None => {
                ctx.error(&element.id, "light element without a light record");
                return Ok(None);
            }
        },
        ElementKind::Environment => ActorPayload::Light {
            kind: LightKind::Environment,
            intensity: 1.0,
            color: [1.0, 1.0, 1.0],
        },
        ElementKind::Camera => match element.camera {
            Some(camera) => {
                let record = scene.cameras.get(camera as usize).ok_or(
                    ImportError::MissingResource {
                        kind: "camera",
                        index: camera,
                    },
                )?;
                ActorPayload::Camera {
                    focal_length: record.focal_length,
                    sensor_width: record.sensor_width,
                    // Targets resolve in a post-pass once every actor exists
                    look_at: None,
                }
            }
            None => {
                ctx.error(&element.id, "camera element without a camera record");
                return Ok(None);
            }
        },
        ElementKind::Decal => ActorPayload::Decal {
            material: staged_material(ctx, scene, element)?,
            size: element.params.get_vec3("size").unwrap_or([1.0, 1.0, 1.0]),
        },
        ElementKind::Landscape => ActorPayload::Landscape {
            material: staged_material(ctx, scene, element)?,
        },
        ElementKind::PostProcessVolume => {
            // Volume actors embed their medium parameters; media are not
            // standalone assets
            let mut params = element.params.clone();
            if let Some(medium) = element.medium {
                let record = scene.media.get(medium as usize).ok_or(
                    ImportError::MissingResource {
                        kind: "medium",
                        index: medium,
                    },
                )?;
                for (key, value) in record.params.iter() {
                    params.set(key.to_string(), value.clone());
                }
            }
            let unbound = params.get_bool("unbound").unwrap_or(false);
            ActorPayload::PostProcessVolume { params, unbound }
        }
        ElementKind::Custom => ActorPayload::Custom {
            class: element
                .params
                .get_str("class")
                .unwrap_or("custom")
                .to_string(),
            params: element.params.clone(),
        },
        // Generic fallback: anything unrecognized imports as a plain
        // transform actor so its children keep a host
        ElementKind::Group | ElementKind::Unknown => ActorPayload::Empty,
        // Resource kinds never reach this point
        _ => return Ok(None),
    };
    Ok(Some(payload))
}

/// Staged mesh for a geometry-bearing element.
///
/// Outer `None` reports failure (geometry named but unavailable); inner
/// `None` means the element has no geometry at all.
fn resolve_mesh(
    ctx: &mut ImportContext,
    scene: &SceneDescription,
    element: &SceneElement,
) -> Result<Option<Option<ObjectId>>> {
    let Some(geometry) = element.geometry else {
        return Ok(Some(None));
    };
    let record = scene
        .geometries
        .get(geometry as usize)
        .ok_or(ImportError::MissingResource {
            kind: "geometry",
            index: geometry,
        })?;
    match ctx.meshes.get(&record.name).map(|s| s.object_id()) {
        Some(mesh) => Ok(Some(Some(mesh))),
        None => {
            ctx.error(
                &element.id,
                format!("mesh `{}` unavailable; actor not imported", record.name),
            );
            Ok(None)
        }
    }
}

fn staged_material(
    ctx: &mut ImportContext,
    scene: &SceneDescription,
    element: &SceneElement,
) -> Result<Option<ObjectId>> {
    let Some(material) = element.material else {
        return Ok(None);
    };
    let record = scene
        .materials
        .get(material as usize)
        .ok_or(ImportError::MissingResource {
            kind: "material",
            index: material,
        })?;
    let staged = ctx
        .materials
        .get(&record.name)
        .or_else(|| ctx.material_functions.get(&record.name))
        .map(|s| s.object_id());
    if staged.is_none() {
        ctx.warn(
            &element.id,
            format!("material `{}` unavailable", record.name),
        );
    }
    Ok(staged)
}

fn override_materials(
    ctx: &mut ImportContext,
    scene: &SceneDescription,
    element: &SceneElement,
) -> Result<Vec<ObjectId>> {
    Ok(staged_material(ctx, scene, element)?
        .into_iter()
        .collect())
}

/// Wire camera look-at targets now that every actor has an object id
fn resolve_camera_targets(
    ctx: &mut ImportContext,
    store: &mut ObjectStore,
    scene: &SceneDescription,
) -> Result<()> {
    for element in &scene.elements {
        if element.kind != ElementKind::Camera {
            continue;
        }
        let Some(target_id) = element.params.get_ref("look_at") else {
            continue;
        };
        let Some(&camera) = ctx.actors.get(&element.id) else {
            continue;
        };
        match ctx.actors.get(target_id).copied() {
            Some(target) => {
                if let ActorPayload::Camera { look_at, .. } =
                    &mut store.actor_data_mut(camera)?.payload
                {
                    *look_at = Some(target);
                }
            }
            None => {
                let target_id = target_id.to_string();
                ctx.warn(
                    &element.id,
                    format!("look-at target `{}` was not imported", target_id),
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use vesper_scene::{CameraRecord, GeometryRecord, LightRecord, ParamValue, SceneElement};

    use super::*;
    use crate::fetch::{GeometryPayload, PayloadSource, TexturePayload};
    use crate::gate::GateSnapshot;
    use crate::options::ImportOptions;
    use crate::progress::{CancelFlag, NullProgress};
    use crate::resources;

    struct FlatSource;

    impl PayloadSource for FlatSource {
        fn fetch_geometry(
            &self,
            _record: &GeometryRecord,
        ) -> std::result::Result<GeometryPayload, String> {
            Ok(GeometryPayload::default())
        }

        fn fetch_texture(
            &self,
            _record: &vesper_scene::TextureRecord,
        ) -> std::result::Result<TexturePayload, String> {
            Ok(TexturePayload::default())
        }
    }

    fn run_actors(scene: SceneDescription, options: ImportOptions) -> (ImportContext, ObjectStore) {
        let mut ctx = ImportContext::new(
            Arc::new(scene),
            options,
            Arc::new(NullProgress),
            CancelFlag::new(),
            false,
        );
        let mut store = ObjectStore::new();
        let gate = GateSnapshot::capture(&store, &ctx);
        let source: Arc<dyn PayloadSource> = Arc::new(FlatSource);
        resources::import_textures(&mut ctx, &mut store, &gate, &source).expect("textures");
        resources::import_materials(&mut ctx, &mut store, &gate).expect("materials");
        resources::import_meshes(&mut ctx, &mut store, &gate, &source).expect("meshes");
        import_actors(&mut ctx, &mut store).expect("actors");
        (ctx, store)
    }

    fn mesh_scene() -> SceneDescription {
        let mut scene = SceneDescription::new("yard");
        scene
            .geometries
            .push(GeometryRecord::new("rock").with_source("rock.bin"));
        let root = scene.add_element(
            SceneElement::new(ElementKind::Group, "root").with_label("Root"),
        );
        scene.add_child(
            root,
            SceneElement::new(ElementKind::Instance, "rock_1")
                .with_label("Rock")
                .with_geometry(0),
        );
        scene
    }

    #[test]
    fn actors_are_flat_under_the_container() {
        let (ctx, store) = run_actors(mesh_scene(), ImportOptions::default());

        let container = ctx.import_container.expect("container");
        let actors = &store.container_data(container).expect("container").actors;
        // Both the group and its child land in the container table
        assert_eq!(actors.len(), 2);
        assert!(actors.contains_key("root"));
        assert!(actors.contains_key("rock_1"));

        let root = ctx.actors["root"];
        assert!(store
            .actor_data(root)
            .expect("root actor")
            .components
            .is_empty());
    }

    #[test]
    fn components_attach_to_the_nearest_actor() {
        let mut scene = SceneDescription::new("rig");
        let body = scene.add_element(
            SceneElement::new(ElementKind::Group, "body").with_label("Body"),
        );
        let lamp_record = LightRecord {
            name: "bulb".to_string(),
            kind: LightKind::Point,
            intensity: 2.0,
            color: [1.0, 0.9, 0.8],
            params: Default::default(),
        };
        scene.lights.push(lamp_record);
        scene.add_child(
            body,
            SceneElement::new(ElementKind::Light, "bulb_1")
                .with_label("Bulb")
                .with_light(0)
                .as_component(),
        );

        let (ctx, store) = run_actors(scene, ImportOptions::default());

        let body_id = ctx.actors["body"];
        let components = &store.actor_data(body_id).expect("body").components;
        assert_eq!(components.len(), 1);
        assert_eq!(
            store.require(components[0]).expect("component").kind,
            ObjectKind::Component
        );
        // Components never appear in the container's actor table
        let container = ctx.import_container.expect("container");
        assert_eq!(
            store
                .container_data(container)
                .expect("container")
                .actors
                .len(),
            1
        );
    }

    #[test]
    fn failed_actor_reparents_children_and_skips_components() {
        // "broken" names a geometry that never staged, so it fails; its
        // component child is skipped while its plain child moves up.
        let mut scene = SceneDescription::new("partial");
        scene
            .geometries
            .push(GeometryRecord::new("ghost").with_source("missing"));
        let root = scene.add_element(
            SceneElement::new(ElementKind::Group, "root").with_label("Root"),
        );
        let broken = scene.add_child(
            root,
            SceneElement::new(ElementKind::Instance, "broken")
                .with_label("Broken")
                .with_geometry(0),
        );
        scene.add_child(
            broken,
            SceneElement::new(ElementKind::Group, "orphan").with_label("Orphan"),
        );
        scene.add_child(
            broken,
            SceneElement::new(ElementKind::Group, "gadget")
                .with_label("Gadget")
                .as_component(),
        );

        // FlatSource would succeed, so stage with a source that fails
        struct Failing;
        impl PayloadSource for Failing {
            fn fetch_geometry(
                &self,
                _record: &GeometryRecord,
            ) -> std::result::Result<GeometryPayload, String> {
                Err("unreadable".to_string())
            }
            fn fetch_texture(
                &self,
                _record: &vesper_scene::TextureRecord,
            ) -> std::result::Result<TexturePayload, String> {
                Err("unreadable".to_string())
            }
        }

        let mut ctx = ImportContext::new(
            Arc::new(scene),
            ImportOptions::default(),
            Arc::new(NullProgress),
            CancelFlag::new(),
            false,
        );
        let mut store = ObjectStore::new();
        let gate = GateSnapshot::capture(&store, &ctx);
        let source: Arc<dyn PayloadSource> = Arc::new(Failing);
        resources::import_meshes(&mut ctx, &mut store, &gate, &source).expect("meshes");
        import_actors(&mut ctx, &mut store).expect("actors");

        assert!(ctx.non_imported.contains("broken"));
        assert!(ctx.non_imported.contains("gadget"));
        assert!(!ctx.actors.contains_key("gadget"));
        // The orphan was still imported, flat under the container
        assert!(ctx.actors.contains_key("orphan"));
    }

    #[test]
    fn excluded_lights_keep_their_children() {
        let mut scene = SceneDescription::new("dark");
        scene.lights.push(LightRecord {
            name: "sun".to_string(),
            kind: LightKind::Directional,
            intensity: 10.0,
            color: [1.0; 3],
            params: Default::default(),
        });
        let lamp = scene.add_element(
            SceneElement::new(ElementKind::Light, "lamp")
                .with_label("Lamp")
                .with_light(0),
        );
        scene.add_child(
            lamp,
            SceneElement::new(ElementKind::Group, "shade").with_label("Shade"),
        );

        let options = ImportOptions {
            import_lights: false,
            ..ImportOptions::default()
        };
        let (ctx, _store) = run_actors(scene, options);

        assert!(ctx.non_imported.contains("lamp"));
        assert!(ctx.actors.contains_key("shade"));
        // Exclusion is policy, not failure: no issue recorded
        assert!(ctx.issues.is_empty());
    }

    #[test]
    fn camera_look_at_resolves_in_post_pass() {
        let mut scene = SceneDescription::new("shot");
        scene.cameras.push(CameraRecord {
            name: "main".to_string(),
            focal_length: 50.0,
            sensor_width: 36.0,
            params: Default::default(),
        });
        // The camera precedes its target in the tree
        let mut camera_element =
            SceneElement::new(ElementKind::Camera, "cam").with_camera(0);
        camera_element
            .params
            .set("look_at", ParamValue::Ref("subject".to_string()));
        scene.add_element(camera_element);
        scene.add_element(
            SceneElement::new(ElementKind::Group, "subject").with_label("Subject"),
        );

        let (ctx, store) = run_actors(scene, ImportOptions::default());

        let camera_actor = ctx.actors["cam"];
        let subject_actor = ctx.actors["subject"];
        match &store.actor_data(camera_actor).expect("camera").payload {
            ActorPayload::Camera { look_at, .. } => assert_eq!(*look_at, Some(subject_actor)),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn duplicate_labels_stay_unique() {
        let mut scene = SceneDescription::new("twins");
        scene.add_element(SceneElement::new(ElementKind::Group, "a").with_label("Crate"));
        scene.add_element(SceneElement::new(ElementKind::Group, "b").with_label("Crate"));

        let (ctx, store) = run_actors(scene, ImportOptions::default());

        let first = store.actor_data(ctx.actors["a"]).expect("a").label.clone();
        let second = store.actor_data(ctx.actors["b"]).expect("b").label.clone();
        assert_eq!(first, "Crate");
        assert_eq!(second, "Crate_1");
    }
}

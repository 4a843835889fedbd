//! Single-writer object store
//!
//! Objects are kept in a `BTreeMap` keyed by id (deterministic iteration)
//! with a path index on the side. All mutation goes through `&mut self`;
//! callers that need concurrency serialize access themselves - the import
//! pipeline funnels every store touch through one orchestrator thread.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, StoreError};
use crate::object::{
    ActorData, ImportMetadata, MaterialData, MeshData, ObjectData, ObjectId, ObjectKind,
    ObjectRecord, SceneContainerData,
};

/// Path-addressed storage for all persisted objects
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: BTreeMap<ObjectId, ObjectRecord>,
    path_index: HashMap<String, ObjectId>,
    next_id: u64,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            path_index: HashMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create an object at `folder/name`
    pub fn create(
        &mut self,
        kind: ObjectKind,
        folder: &str,
        name: &str,
        data: ObjectData,
    ) -> Result<ObjectId> {
        let path = format!("{}/{}", folder, name);
        if self.path_index.contains_key(&path) {
            return Err(StoreError::PathOccupied(path));
        }

        let id = self.allocate_id();
        let record = ObjectRecord {
            id,
            kind,
            name: name.to_string(),
            folder: folder.to_string(),
            stable_id: None,
            import_meta: None,
            data,
            build_counter: 0,
        };
        self.path_index.insert(path, id);
        self.objects.insert(id, record);
        log::trace!("store: created {} {} at {}/{}", kind, id, folder, name);
        Ok(id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ObjectRecord> {
        self.objects.get_mut(&id)
    }

    /// Like [`get`](Self::get) but an absent object is an error
    pub fn require(&self, id: ObjectId) -> Result<&ObjectRecord> {
        self.objects.get(&id).ok_or(StoreError::NotFound(id))
    }

    pub fn require_mut(&mut self, id: ObjectId) -> Result<&mut ObjectRecord> {
        self.objects.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    pub fn find_by_path(&self, folder: &str, name: &str) -> Option<ObjectId> {
        self.path_index.get(&format!("{}/{}", folder, name)).copied()
    }

    /// Ids of every object whose folder is `root` or lies below it
    pub fn objects_under(&self, root: &str) -> Vec<ObjectId> {
        let prefix = format!("{}/", root);
        self.objects
            .values()
            .filter(|r| r.folder == root || r.folder.starts_with(&prefix))
            .map(|r| r.id)
            .collect()
    }

    /// Scene containers recorded for `scene_name`, in id order
    pub fn find_containers_for_scene(&self, scene_name: &str) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|r| {
                r.kind == ObjectKind::SceneContainer
                    && r.data
                        .as_container()
                        .map(|c| c.scene_name == scene_name)
                        .unwrap_or(false)
            })
            .map(|r| r.id)
            .collect()
    }

    /// Move an object to a new path; identity is preserved
    pub fn relocate(&mut self, id: ObjectId, folder: &str, name: &str) -> Result<()> {
        let new_path = format!("{}/{}", folder, name);
        match self.path_index.get(&new_path) {
            Some(&occupant) if occupant != id => {
                return Err(StoreError::PathOccupied(new_path));
            }
            _ => {}
        }

        let record = self.objects.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let old_path = record.path();
        record.folder = folder.to_string();
        record.name = name.to_string();
        self.path_index.remove(&old_path);
        self.path_index.insert(new_path, id);
        Ok(())
    }

    /// Swap an object's payload, keeping identity and path
    pub fn replace_data(&mut self, id: ObjectId, data: ObjectData) -> Result<()> {
        self.require_mut(id)?.data = data;
        Ok(())
    }

    pub fn set_import_meta(&mut self, id: ObjectId, meta: ImportMetadata) -> Result<()> {
        self.require_mut(id)?.import_meta = Some(meta);
        Ok(())
    }

    pub fn set_stable_id(&mut self, id: ObjectId, stable_id: impl Into<String>) -> Result<()> {
        self.require_mut(id)?.stable_id = Some(stable_id.into());
        Ok(())
    }

    /// Delete an object. Actors take their owned components with them.
    pub fn delete(&mut self, id: ObjectId) -> Result<ObjectRecord> {
        let record = self.objects.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.path_index.remove(&record.path());

        if let ObjectData::Actor(actor) = &record.data {
            for &component in &actor.components {
                if self.contains(component) {
                    self.delete(component)?;
                }
            }
        }
        log::trace!("store: deleted {} {}", record.kind, id);
        Ok(record)
    }

    /// Signal that derived data (compiled material, built mesh) is stale
    pub fn bump_build(&mut self, id: ObjectId) -> Result<u32> {
        let record = self.require_mut(id)?;
        record.build_counter += 1;
        Ok(record.build_counter)
    }

    /// Rewrite every hard-reference slot store-wide through `map`.
    /// Returns the number of slots actually changed.
    pub fn remap_references(&mut self, map: &HashMap<ObjectId, ObjectId>) -> usize {
        let mut changed = 0;
        for record in self.objects.values_mut() {
            record.data.visit_refs(&mut |slot| {
                if let Some(&target) = map.get(slot) {
                    if target != *slot {
                        *slot = target;
                        changed += 1;
                    }
                }
            });
        }
        if changed > 0 {
            log::debug!("store: remapped {} reference slots", changed);
        }
        changed
    }

    /// Rewrite every soft path equal to a key in `renames`.
    /// Returns the number of paths changed.
    pub fn rename_soft_paths(&mut self, renames: &HashMap<String, String>) -> usize {
        let mut changed = 0;
        for record in self.objects.values_mut() {
            record.data.visit_soft_paths(&mut |path| {
                if let Some(renamed) = renames.get(path.as_str()) {
                    *path = renamed.clone();
                    changed += 1;
                }
            });
        }
        if changed > 0 {
            log::debug!("store: renamed {} soft paths", changed);
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.objects.values()
    }

    // Typed payload accessors. The record's kind tag is authoritative;
    // a mismatching payload variant reports the stored kind.

    pub fn actor_data(&self, id: ObjectId) -> Result<&ActorData> {
        let record = self.require(id)?;
        match &record.data {
            ObjectData::Actor(actor) => Ok(actor),
            _ => Err(kind_mismatch(record, ObjectKind::Actor)),
        }
    }

    pub fn actor_data_mut(&mut self, id: ObjectId) -> Result<&mut ActorData> {
        let record = self.require_mut(id)?;
        match &mut record.data {
            ObjectData::Actor(actor) => Ok(actor),
            _ => Err(StoreError::KindMismatch {
                id,
                expected: ObjectKind::Actor,
                actual: record.kind,
            }),
        }
    }

    pub fn material_data(&self, id: ObjectId) -> Result<&MaterialData> {
        let record = self.require(id)?;
        match &record.data {
            ObjectData::Material(material) => Ok(material),
            _ => Err(kind_mismatch(record, ObjectKind::Material)),
        }
    }

    pub fn material_data_mut(&mut self, id: ObjectId) -> Result<&mut MaterialData> {
        let record = self.require_mut(id)?;
        match &mut record.data {
            ObjectData::Material(material) => Ok(material),
            _ => Err(StoreError::KindMismatch {
                id,
                expected: ObjectKind::Material,
                actual: record.kind,
            }),
        }
    }

    pub fn mesh_data_mut(&mut self, id: ObjectId) -> Result<&mut MeshData> {
        let record = self.require_mut(id)?;
        match &mut record.data {
            ObjectData::Mesh(mesh) => Ok(mesh),
            _ => Err(StoreError::KindMismatch {
                id,
                expected: ObjectKind::Mesh,
                actual: record.kind,
            }),
        }
    }

    pub fn container_data(&self, id: ObjectId) -> Result<&SceneContainerData> {
        let record = self.require(id)?;
        match &record.data {
            ObjectData::SceneContainer(container) => Ok(container),
            _ => Err(kind_mismatch(record, ObjectKind::SceneContainer)),
        }
    }

    pub fn container_data_mut(&mut self, id: ObjectId) -> Result<&mut SceneContainerData> {
        let record = self.require_mut(id)?;
        match &mut record.data {
            ObjectData::SceneContainer(container) => Ok(container),
            _ => Err(StoreError::KindMismatch {
                id,
                expected: ObjectKind::SceneContainer,
                actual: record.kind,
            }),
        }
    }
}

fn kind_mismatch(record: &ObjectRecord, expected: ObjectKind) -> StoreError {
    StoreError::KindMismatch {
        id: record.id,
        expected,
        actual: record.kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ActorPayload;
    use glam::Mat4;

    #[test]
    fn create_and_find_by_path() {
        let mut store = ObjectStore::new();
        let id = store
            .create(ObjectKind::Texture, "/Project/Tex", "brick", ObjectData::Empty)
            .unwrap();

        assert_eq!(store.find_by_path("/Project/Tex", "brick"), Some(id));
        assert!(store
            .create(ObjectKind::Texture, "/Project/Tex", "brick", ObjectData::Empty)
            .is_err());
    }

    #[test]
    fn relocate_moves_the_path_index() {
        let mut store = ObjectStore::new();
        let id = store
            .create(ObjectKind::Mesh, "/Transient/run", "rock", ObjectData::Empty)
            .unwrap();

        store.relocate(id, "/Project/Meshes", "rock").unwrap();
        assert_eq!(store.find_by_path("/Transient/run", "rock"), None);
        assert_eq!(store.find_by_path("/Project/Meshes", "rock"), Some(id));
        // Relocating onto its own path is a no-op, not a collision
        store.relocate(id, "/Project/Meshes", "rock").unwrap();
    }

    #[test]
    fn deleting_an_actor_cascades_to_components() {
        let mut store = ObjectStore::new();
        let component = store
            .create(
                ObjectKind::Component,
                "/Project/Scene",
                "wheel",
                ObjectData::Actor(ActorData::default()),
            )
            .unwrap();
        let actor = store
            .create(
                ObjectKind::Actor,
                "/Project/Scene",
                "car",
                ObjectData::Actor(ActorData {
                    label: "car".into(),
                    transform: Mat4::IDENTITY,
                    payload: ActorPayload::Empty,
                    components: vec![component],
                }),
            )
            .unwrap();

        store.delete(actor).unwrap();
        assert!(!store.contains(actor));
        assert!(!store.contains(component));
    }

    #[test]
    fn remap_rewrites_only_mapped_slots() {
        let mut store = ObjectStore::new();
        let old = store
            .create(ObjectKind::Texture, "/T", "a", ObjectData::Empty)
            .unwrap();
        let new = store
            .create(ObjectKind::Texture, "/P", "a", ObjectData::Empty)
            .unwrap();
        let untouched = store
            .create(ObjectKind::Texture, "/P", "b", ObjectData::Empty)
            .unwrap();
        let material = store
            .create(
                ObjectKind::Material,
                "/P",
                "m",
                ObjectData::Material(MaterialData {
                    model: "pbr".into(),
                    textures: vec![old, untouched],
                    ..Default::default()
                }),
            )
            .unwrap();

        let mut map = HashMap::new();
        map.insert(old, new);
        map.insert(untouched, untouched); // identity entry must not count
        assert_eq!(store.remap_references(&map), 1);

        let textures = &store.material_data(material).unwrap().textures;
        assert_eq!(textures, &vec![new, untouched]);
    }

    #[test]
    fn rename_soft_paths_matches_exactly() {
        let mut store = ObjectStore::new();
        let animation = store
            .create(
                ObjectKind::Animation,
                "/P",
                "walk",
                ObjectData::Animation(crate::object::AnimationData {
                    frame_rate: 30.0,
                    curves: vec![crate::object::AnimationCurve {
                        bound_path: "/Transient/run/door".into(),
                        times: vec![0.0],
                        transforms: vec![Mat4::IDENTITY],
                    }],
                }),
            )
            .unwrap();

        let mut renames = HashMap::new();
        renames.insert(
            "/Transient/run/door".to_string(),
            "/Project/Scene/door".to_string(),
        );
        assert_eq!(store.rename_soft_paths(&renames), 1);

        match &store.require(animation).unwrap().data {
            ObjectData::Animation(a) => {
                assert_eq!(a.curves[0].bound_path, "/Project/Scene/door");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn container_lookup_by_scene_name() {
        let mut store = ObjectStore::new();
        let c1 = store
            .create(
                ObjectKind::SceneContainer,
                "/P",
                "factory_a",
                ObjectData::SceneContainer(SceneContainerData::new("factory")),
            )
            .unwrap();
        store
            .create(
                ObjectKind::SceneContainer,
                "/P",
                "other",
                ObjectData::SceneContainer(SceneContainerData::new("warehouse")),
            )
            .unwrap();

        assert_eq!(store.find_containers_for_scene("factory"), vec![c1]);
    }
}

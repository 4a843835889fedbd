//! Reimport gate
//!
//! On reimport, each source record is checked against the persisted asset
//! it produced last time. Matching content hashes skip the rebuild
//! entirely; the staged maps then carry the existing object so later
//! stages reference it exactly as they would a fresh one.

use vesper_scene::ContentHash;
use vesper_store::{ObjectId, ObjectStore, SceneContainerData};

use crate::context::{
    ImportContext, ANIMATION_FOLDER, GEOMETRY_FOLDER, MATERIAL_FOLDER, TEXTURE_FOLDER,
    TRANSIENT_ROOT,
};
use crate::options::ConflictPolicy;

/// Asset classes the gate arbitrates. Material functions share the
/// material class; their names come from the same table in the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssetClass {
    Texture,
    Material,
    Mesh,
    Animation,
}

impl AssetClass {
    pub(crate) fn folder(self) -> &'static str {
        match self {
            AssetClass::Texture => TEXTURE_FOLDER,
            AssetClass::Material => MATERIAL_FOLDER,
            AssetClass::Mesh => GEOMETRY_FOLDER,
            AssetClass::Animation => ANIMATION_FOLDER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateDecision {
    /// Build a fresh transient asset
    Build,
    /// Hand the persisted asset straight to the staged maps
    Reuse(ObjectId),
}

/// Asset tables of the destination container, captured once before any
/// stage runs so mid-run table edits cannot skew later decisions.
pub(crate) struct GateSnapshot {
    container: Option<SceneContainerData>,
}

impl GateSnapshot {
    pub(crate) fn capture(store: &ObjectStore, ctx: &ImportContext) -> Self {
        if !ctx.is_reimport {
            return Self { container: None };
        }
        let container = store
            .find_containers_for_scene(&ctx.scene_name)
            .into_iter()
            .filter(|id| {
                store
                    .get(*id)
                    .map(|record| !record.folder.starts_with(TRANSIENT_ROOT))
                    .unwrap_or(false)
            })
            .find_map(|id| store.get(id).and_then(|record| record.data.as_container()))
            .cloned();
        Self { container }
    }

    /// The persisted asset this record produced on a previous run, if any
    pub(crate) fn previous(
        &self,
        store: &ObjectStore,
        ctx: &ImportContext,
        class: AssetClass,
        name: &str,
    ) -> Option<ObjectId> {
        if let Some(container) = &self.container {
            let table = match class {
                AssetClass::Texture => &container.textures,
                AssetClass::Material => &container.materials,
                AssetClass::Mesh => &container.meshes,
                AssetClass::Animation => &container.animations,
            };
            if let Some(&id) = table.get(name) {
                if store.contains(id) {
                    return Some(id);
                }
            }
        }
        // Assets can outlive their container entry; the final path is the
        // durable identity.
        store.find_by_path(&ctx.final_folder(class.folder()), name)
    }

    pub(crate) fn decide(
        &self,
        store: &ObjectStore,
        ctx: &ImportContext,
        class: AssetClass,
        name: &str,
        hash: ContentHash,
        policy: ConflictPolicy,
    ) -> GateDecision {
        let Some(existing) = self.previous(store, ctx, class, name) else {
            return GateDecision::Build;
        };
        let Some(record) = store.get(existing) else {
            return GateDecision::Build;
        };
        match &record.import_meta {
            Some(meta) if meta.content_hash == hash => {
                log::debug!("reimport: `{}` unchanged, reusing {}", name, existing);
                GateDecision::Reuse(existing)
            }
            _ => match policy {
                ConflictPolicy::Replace => GateDecision::Build,
                ConflictPolicy::Ignore => {
                    log::debug!("reimport: `{}` changed but policy keeps {}", name, existing);
                    GateDecision::Reuse(existing)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vesper_scene::{SceneDescription, SourceFormat};
    use vesper_store::{ImportMetadata, ObjectData, ObjectKind, TextureData};

    use super::*;
    use crate::options::ImportOptions;
    use crate::progress::{CancelFlag, NullProgress};

    fn reimport_ctx() -> ImportContext {
        ImportContext::new(
            Arc::new(SceneDescription::new("plaza")),
            ImportOptions::default(),
            Arc::new(NullProgress),
            CancelFlag::new(),
            true,
        )
    }

    fn seeded_store(ctx: &ImportContext, hash: ContentHash) -> (ObjectStore, ObjectId) {
        let mut store = ObjectStore::new();
        let texture = store
            .create(
                ObjectKind::Texture,
                &ctx.final_folder(TEXTURE_FOLDER),
                "bricks",
                ObjectData::Texture(TextureData::default()),
            )
            .expect("create texture");
        store
            .set_import_meta(
                texture,
                ImportMetadata {
                    source_uri: "plaza.pbrt".to_string(),
                    source_format: SourceFormat::Pbrt,
                    content_hash: hash,
                },
            )
            .expect("set meta");

        let mut container = SceneContainerData::new("plaza");
        container.textures.insert("bricks".to_string(), texture);
        store
            .create(
                ObjectKind::SceneContainer,
                "/Project",
                "plaza",
                ObjectData::SceneContainer(container),
            )
            .expect("create container");
        (store, texture)
    }

    #[test]
    fn import_over_existing_probes_final_path() {
        // Without the reimport flag no container snapshot is taken, but an
        // unchanged asset already sitting at the destination is still reused.
        let ctx = ImportContext::new(
            Arc::new(SceneDescription::new("plaza")),
            ImportOptions::default(),
            Arc::new(NullProgress),
            CancelFlag::new(),
            false,
        );
        let (store, texture) = {
            let reimport = reimport_ctx();
            seeded_store(&reimport, ContentHash(7))
        };
        let gate = GateSnapshot::capture(&store, &ctx);
        assert!(gate.container.is_none());
        let decision = gate.decide(
            &store,
            &ctx,
            AssetClass::Texture,
            "bricks",
            ContentHash(7),
            ConflictPolicy::Replace,
        );
        assert_eq!(decision, GateDecision::Reuse(texture));
    }

    #[test]
    fn unchanged_hash_reuses() {
        let ctx = reimport_ctx();
        let (store, texture) = seeded_store(&ctx, ContentHash(42));
        let gate = GateSnapshot::capture(&store, &ctx);
        let decision = gate.decide(
            &store,
            &ctx,
            AssetClass::Texture,
            "bricks",
            ContentHash(42),
            ConflictPolicy::Replace,
        );
        assert_eq!(decision, GateDecision::Reuse(texture));
    }

    #[test]
    fn changed_hash_follows_policy() {
        let ctx = reimport_ctx();
        let (store, texture) = seeded_store(&ctx, ContentHash(42));
        let gate = GateSnapshot::capture(&store, &ctx);

        let replace = gate.decide(
            &store,
            &ctx,
            AssetClass::Texture,
            "bricks",
            ContentHash(43),
            ConflictPolicy::Replace,
        );
        assert_eq!(replace, GateDecision::Build);

        let ignore = gate.decide(
            &store,
            &ctx,
            AssetClass::Texture,
            "bricks",
            ContentHash(43),
            ConflictPolicy::Ignore,
        );
        assert_eq!(ignore, GateDecision::Reuse(texture));
    }

    #[test]
    fn unknown_name_builds() {
        let ctx = reimport_ctx();
        let (store, _) = seeded_store(&ctx, ContentHash(42));
        let gate = GateSnapshot::capture(&store, &ctx);
        let decision = gate.decide(
            &store,
            &ctx,
            AssetClass::Texture,
            "marble",
            ContentHash(1),
            ConflictPolicy::Replace,
        );
        assert_eq!(decision, GateDecision::Build);
    }
}

//! End-to-end import walkthrough
//!
//! Demonstrates:
//! - Driving `Importer` against an in-memory payload source
//! - Stage progress reported through the `log` crate via `LogProgress`
//! - A reimport pass reusing every unchanged asset
//!
//! Run with `cargo run -p vesper_import --example import_demo`.

use std::sync::Arc;

use vesper_import::{
    GeometryPayload, ImportOptions, Importer, LogProgress, PayloadSource, SourceCapabilities,
    TexturePayload,
};
use vesper_scene::{
    ElementKind, GeometryRecord, MaterialParameter, MaterialRecord, SceneDescription,
    SceneElement, TextureRecord,
};
use vesper_store::ObjectStore;

/// Synthesizes flat payloads instead of reading files
struct SyntheticSource;

impl PayloadSource for SyntheticSource {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            parallel_fetch: true,
        }
    }

    fn fetch_geometry(
        &self,
        record: &GeometryRecord,
    ) -> std::result::Result<GeometryPayload, String> {
        log::info!("fetching geometry `{}` from {}", record.name, record.source);
        Ok(GeometryPayload {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            uvs: vec![[0.0, 0.0]; 3],
            indices: vec![0, 1, 2],
        })
    }

    fn fetch_texture(
        &self,
        record: &TextureRecord,
    ) -> std::result::Result<TexturePayload, String> {
        log::info!("fetching texture `{}` from {}", record.name, record.source);
        Ok(TexturePayload {
            width: 4,
            height: 4,
            pixels: vec![255; 64],
        })
    }
}

fn gallery_scene() -> SceneDescription {
    let mut scene = SceneDescription::new("gallery");
    scene.source_uri = "gallery.scene".to_string();

    scene
        .textures
        .push(TextureRecord::new("plaster", "plaster.png"));
    scene.materials.push(
        MaterialRecord::new("wall_paint", "pbr")
            .with_parameter(MaterialParameter::texture("base", "plaster")),
    );
    scene.geometries.push(
        GeometryRecord::new("wall_panel")
            .with_source("wall_panel.bin")
            .with_slots(["wall_paint"]),
    );

    let hall =
        scene.add_element(SceneElement::new(ElementKind::Group, "hall").with_label("Hall"));
    scene.add_child(
        hall,
        SceneElement::new(ElementKind::Instance, "panel_1")
            .with_label("Panel")
            .with_geometry(0),
    );
    scene
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut store = ObjectStore::new();
    let importer =
        Importer::new(Arc::new(SyntheticSource)).with_progress(Arc::new(LogProgress::new()));

    log::info!("importing `gallery` for the first time");
    let first = importer
        .import(
            Arc::new(gallery_scene()),
            ImportOptions::default(),
            &mut store,
        )
        .unwrap();
    log::info!(
        "built {} asset(s) into {} container(s)",
        first.finalized.len(),
        first.containers.len()
    );

    log::info!("reimporting the unchanged scene");
    let second = importer
        .reimport(
            Arc::new(gallery_scene()),
            ImportOptions::default(),
            &mut store,
        )
        .unwrap();
    log::info!(
        "built {} asset(s), reused {}",
        second.finalized.len(),
        second.reused
    );

    log::info!("final store contents:");
    for record in store.iter() {
        log::info!("  {:<14} {}", format!("{:?}", record.kind), record.path());
    }
}

//! The layered scene: five tile containers updated back-to-front.
//!
//! Scene files hold one object array per layer:
//!
//! ```json
//! {
//!   "containerLayer0": { "objects": [ … ] },
//!   "containerLayer1": { "objects": [ … ] }
//! }
//! ```

use std::sync::Arc;

use core_document::{Document, MemberKind};
use core_rules::InvokeEngine;
use tracing::info;

use crate::object::{SceneObject, keys};
use crate::tiles::TileContainer;

/// Layer indices, background to menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Background = 0,
    General = 1,
    Foreground = 2,
    Effects = 3,
    Menu = 4,
}

pub const LAYER_COUNT: usize = 5;

pub struct Environment {
    layers: [TileContainer; LAYER_COUNT],
}

impl Environment {
    pub fn new(batch_cost_goal: u64) -> Environment {
        Environment {
            layers: std::array::from_fn(|_| TileContainer::new(batch_cost_goal)),
        }
    }

    /// Places an object into the tile container of its document's layer.
    pub fn append(&mut self, object: Arc<SceneObject>, resolution: (u32, u32)) {
        let layer = object.layer();
        self.layers[layer].append(object, resolution);
    }

    /// One scene frame: every layer updates its visible tiles.
    pub fn update(&mut self, camera_tile: (i16, i16), resolution: (u32, u32), invoke: &InvokeEngine) {
        for layer in &mut self.layers {
            layer.update(camera_tile, resolution, invoke);
        }
    }

    pub fn serialize(&self) -> String {
        let doc = Document::new();
        for (index, layer) in self.layers.iter().enumerate() {
            let mut slot = 0usize;
            layer.for_each_object(|object| {
                let serialized = Document::new();
                serialized.deserialize(&object.serialize());
                doc.set_sub_doc(
                    &format!("containerLayer{index}.objects[{slot}]"),
                    &serialized,
                );
                slot += 1;
            });
        }
        doc.serialize("")
    }

    /// Loads a scene file, appending its objects. Ids are assigned by the
    /// caller-provided allocator so they stay engine-unique.
    pub fn deserialize(
        &mut self,
        source: &str,
        resolution: (u32, u32),
        global: &Arc<Document>,
        mut next_id: impl FnMut() -> u32,
    ) {
        let doc = Document::new();
        doc.deserialize(source);
        let mut loaded = 0usize;
        for index in 0..LAYER_COUNT {
            let objects_key = format!("containerLayer{index}.objects");
            if doc.member_kind(&objects_key) != MemberKind::Array {
                continue;
            }
            for slot in 0..doc.member_size(&objects_key) {
                let entry_key = format!("{objects_key}[{slot}]");
                if doc.member_kind(&entry_key) != MemberKind::Object {
                    continue;
                }
                let spec = doc.sub_doc(&entry_key);
                spec.set(keys::LAYER, index as i64);
                let object = SceneObject::from_spec(&spec.serialize(""), global.clone());
                object.set_object_id(next_id());
                self.append(object, resolution);
                loaded += 1;
            }
        }
        info!(target: "scene.environment", objects = loaded, "scene loaded");
    }

    pub fn reinsert_all(&mut self, resolution: (u32, u32)) {
        for layer in &mut self.layers {
            layer.reinsert_all(resolution);
        }
    }

    pub fn purge(&mut self) {
        for layer in &mut self.layers {
            layer.purge();
        }
    }

    pub fn object_count(&self) -> usize {
        self.layers.iter().map(TileContainer::object_count).sum()
    }

    pub fn find_object(&self, id: u32) -> Option<Arc<SceneObject>> {
        self.layers.iter().find_map(|layer| layer.find_object(id))
    }

    pub fn is_valid_position(&self, tile: (i16, i16), layer: Layer) -> bool {
        self.layers[layer as usize].is_valid_position(tile)
    }

    pub fn layer(&self, layer: Layer) -> &TileContainer {
        &self.layers[layer as usize]
    }

    pub fn layers(&self) -> &[TileContainer; LAYER_COUNT] {
        &self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_round_trip_preserves_objects() {
        let global = Arc::new(Document::new());
        let mut env = Environment::new(1000);
        let mut next = 1u32..;

        let scene = r#"{
            "containerLayer0": { "objects": [ {"id": 0, "posX": 5, "posY": 0} ] },
            "containerLayer2": { "objects": [ {"id": 0, "posX": 7, "posY": 3} ] }
        }"#;
        env.deserialize(scene, (100, 100), &global, || next.next().unwrap_or(0));
        assert_eq!(env.object_count(), 2);

        let serialized = env.serialize();
        let mut reloaded = Environment::new(1000);
        let mut next = 10u32..;
        reloaded.deserialize(&serialized, (100, 100), &global, || {
            next.next().unwrap_or(0)
        });
        assert_eq!(reloaded.object_count(), 2);
        // The foreground object kept its layer assignment.
        let fg = reloaded.layer(Layer::Foreground);
        assert_eq!(fg.object_count(), 1);
    }

    #[test]
    fn objects_land_on_their_document_layer() {
        let global = Arc::new(Document::new());
        let mut env = Environment::new(1000);
        let object = SceneObject::new(global.clone());
        object.doc().set(keys::LAYER, 4i64);
        env.append(object, (100, 100));
        assert_eq!(env.layer(Layer::Menu).object_count(), 1);
        assert_eq!(env.layer(Layer::Background).object_count(), 0);
    }
}

//! Placement invariants of the tile container: every object is in exactly
//! one batch of one tile at every frame boundary, and position changes made
//! by rulesets during the update migrate the object on the same frame.

use std::sync::Arc;

use core_document::Document;
use core_rules::{InvokeConfig, InvokeEngine};
use core_scene::{SceneObject, TileContainer, keys};

fn object_at(x: f64, global: &Arc<Document>) -> Arc<SceneObject> {
    let object = SceneObject::new(global.clone());
    object.doc().set(keys::POS_X, x);
    object
}

#[test]
fn entity_is_always_in_exactly_one_batch() {
    let global = Arc::new(Document::new());
    let invoke = InvokeEngine::new(InvokeConfig::default());
    let mut tiles = TileContainer::new(1000);

    let object = object_at(0.0, &global);
    tiles.append(object.clone(), (100, 100));
    assert_eq!(tiles.locate(&object), vec![(0, 0)]);

    for _ in 0..3 {
        tiles.update((0, 0), (100, 100), &invoke);
        assert_eq!(tiles.locate(&object).len(), 1);
    }
}

#[test]
fn ruleset_movement_migrates_the_object() {
    let global = Arc::new(Document::new());
    let invoke = InvokeEngine::new(InvokeConfig::default());
    let mut tiles = TileContainer::new(1000);

    // A local ruleset moves the object 150px right during its update.
    let object = SceneObject::new(global.clone());
    object.deserialize(
        r#"{
            "id": 1, "posX": 0, "posY": 0, "layer": 0,
            "invokes": [{
                "topic": "",
                "logicalArg": "1",
                "exprs": ["self.posX += 150"]
            }],
            "invokeSubscriptions": []
        }"#,
    );
    tiles.append(object.clone(), (100, 100));
    assert_eq!(tiles.locate(&object), vec![(0, 0)]);

    tiles.update((0, 0), (100, 100), &invoke);
    assert_eq!(object.doc().get(keys::POS_X, 0.0), 150.0);
    assert_eq!(tiles.locate(&object), vec![(1, 0)], "moved to the new tile");

    // Next frame the object updates in its new tile.
    tiles.update((0, 0), (100, 100), &invoke);
    assert_eq!(object.doc().get(keys::POS_X, 0.0), 300.0);
    assert_eq!(tiles.locate(&object), vec![(3, 0)]);
}

#[test]
fn deleted_objects_pass_through_purgatory() {
    let global = Arc::new(Document::new());
    let invoke = InvokeEngine::new(InvokeConfig::default());
    let mut tiles = TileContainer::new(1000);

    let object = object_at(10.0, &global);
    tiles.append(object.clone(), (100, 100));
    object.mark_for_deletion();

    // Frame 1: removed from its batch into trash.
    tiles.update((0, 0), (100, 100), &invoke);
    assert!(tiles.locate(&object).is_empty());
    assert_eq!(tiles.object_count(), 0);

    // Frames 2 and 3: trash → purgatory → gone.
    tiles.update((0, 0), (100, 100), &invoke);
    tiles.update((0, 0), (100, 100), &invoke);
    assert_eq!(tiles.object_count(), 0);
}

#[test]
fn out_of_view_tiles_do_not_update() {
    let global = Arc::new(Document::new());
    let invoke = InvokeEngine::new(InvokeConfig::default());
    let mut tiles = TileContainer::new(1000);

    let far = SceneObject::new(global.clone());
    far.deserialize(
        r#"{
            "id": 2, "posX": 1000, "posY": 1000, "layer": 0,
            "invokes": [{"topic": "", "logicalArg": "1", "exprs": ["self.ticks += 1"]}],
            "invokeSubscriptions": []
        }"#,
    );
    tiles.append(far.clone(), (100, 100));

    tiles.update((0, 0), (100, 100), &invoke);
    assert_eq!(far.doc().get("ticks", 0.0), 0.0, "tile (10,10) is not visible");

    tiles.update((10, 10), (100, 100), &invoke);
    assert_eq!(far.doc().get("ticks", 0.0), 1.0);
}

#[test]
fn batches_split_when_cost_goal_is_exceeded() {
    let global = Arc::new(Document::new());
    let mut tiles = TileContainer::new(1);

    for _ in 0..4 {
        tiles.append(object_at(5.0, &global), (100, 100));
    }
    let batches = tiles.batches_at((0, 0)).unwrap();
    assert!(
        batches.len() >= 2,
        "expected the cost goal to force extra batches, got {}",
        batches.len()
    );
    assert_eq!(tiles.object_count(), 4);
}

//! Tile container: spatial hash of scene objects into screen-sized tiles,
//! updated by per-batch workers.
//!
//! Objects group into cost-bounded batches inside each tile; a batch is the
//! unit of work one worker updates per frame. Only the 3×3 tile
//! neighborhood around the camera updates. Objects whose tile coordinate
//! changed go through a remove → queue → reinsert pipeline (never in two
//! batches transiently), and deleted objects pass through a two-step
//! trash → purgatory pipeline so pairs registered in the previous frame
//! never apply to freed state.

use std::sync::Arc;

use ahash::AHashMap;
use core_rules::InvokeEngine;
use parking_lot::Mutex;
use tracing::debug;

use crate::object::SceneObject;

/// Upper cost bound a batch accepts before a new one is started.
pub const DEFAULT_BATCH_COST_GOAL: u64 = 1000;

pub struct Batch {
    objects: Vec<Arc<SceneObject>>,
    estimated_cost: u64,
}

impl Batch {
    fn new() -> Batch {
        Batch {
            objects: Vec::new(),
            estimated_cost: 0,
        }
    }

    fn push(&mut self, object: Arc<SceneObject>) {
        self.estimated_cost += object.estimated_cost();
        self.objects.push(object);
    }

    fn remove(&mut self, object: &Arc<SceneObject>) {
        if let Some(index) = self.objects.iter().position(|o| Arc::ptr_eq(o, object)) {
            self.estimated_cost = self
                .estimated_cost
                .saturating_sub(self.objects[index].estimated_cost());
            self.objects.remove(index);
        }
    }

    pub fn objects(&self) -> &[Arc<SceneObject>] {
        &self.objects
    }

    pub fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }
}

pub struct TileContainer {
    tiles: AHashMap<(i16, i16), Vec<Batch>>,
    reinsert_queue: Mutex<Vec<Arc<SceneObject>>>,
    trash: Mutex<Vec<Arc<SceneObject>>>,
    purgatory: Vec<Arc<SceneObject>>,
    batch_cost_goal: u64,
}

impl Default for TileContainer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_COST_GOAL)
    }
}

impl TileContainer {
    pub fn new(batch_cost_goal: u64) -> TileContainer {
        TileContainer {
            tiles: AHashMap::new(),
            reinsert_queue: Mutex::new(Vec::new()),
            trash: Mutex::new(Vec::new()),
            purgatory: Vec::new(),
            batch_cost_goal: batch_cost_goal.max(1),
        }
    }

    /// Inserts into the first batch of the object's tile whose cost is still
    /// below the goal, else starts a new batch.
    pub fn append(&mut self, object: Arc<SceneObject>, resolution: (u32, u32)) {
        let tile = object.tile_pos(resolution);
        let batches = self.tiles.entry(tile).or_default();
        let goal = self.batch_cost_goal;
        match batches.iter_mut().find(|b| b.estimated_cost <= goal) {
            Some(batch) => batch.push(object),
            None => {
                let mut batch = Batch::new();
                batch.push(object);
                batches.push(batch);
            }
        }
    }

    /// One frame: settle deletions, update the visible 3×3 neighborhood with
    /// one scoped worker per batch, then reinsert migrated objects.
    pub fn update(&mut self, camera_tile: (i16, i16), resolution: (u32, u32), invoke: &InvokeEngine) {
        // Finalize objects that spent a full frame in purgatory, then move
        // the current trash in.
        if !self.purgatory.is_empty() {
            debug!(target: "scene.tiles", count = self.purgatory.len(), "finalizing deleted objects");
            self.purgatory.clear();
        }
        std::mem::swap(&mut self.purgatory, &mut *self.trash.lock());

        // Detach the visible tiles so each batch can be handed to a worker
        // as an exclusive borrow.
        let mut visible: Vec<((i16, i16), Vec<Batch>)> = Vec::new();
        for dx in [-1i16, 0, 1] {
            for dy in [-1i16, 0, 1] {
                let tile = (camera_tile.0 + dx, camera_tile.1 + dy);
                if let Some(batches) = self.tiles.remove(&tile) {
                    visible.push((tile, batches));
                }
            }
        }

        std::thread::scope(|scope| {
            for (tile, batches) in &mut visible {
                let tile = *tile;
                for batch in batches.iter_mut() {
                    let reinsert_queue = &self.reinsert_queue;
                    let trash = &self.trash;
                    scope.spawn(move || {
                        let mut to_move = Vec::new();
                        let mut to_delete = Vec::new();
                        for object in batch.objects() {
                            object.update(invoke);
                            if object.is_marked_for_deletion() {
                                to_delete.push(object.clone());
                            } else if object.tile_pos(resolution) != tile {
                                to_move.push(object.clone());
                            }
                        }
                        for object in to_move {
                            batch.remove(&object);
                            reinsert_queue.lock().push(object);
                        }
                        for object in to_delete {
                            batch.remove(&object);
                            trash.lock().push(object);
                        }
                    });
                }
            }
        });

        for (tile, batches) in visible {
            self.tiles.insert(tile, batches);
        }

        // Settle migrations.
        let queued = std::mem::take(&mut *self.reinsert_queue.lock());
        for object in queued {
            self.append(object, resolution);
        }
    }

    /// Re-slots every object, e.g. after a resolution change.
    pub fn reinsert_all(&mut self, resolution: (u32, u32)) {
        let mut all = Vec::new();
        for batches in self.tiles.values_mut() {
            for batch in batches.iter_mut() {
                all.append(&mut batch.objects);
            }
        }
        self.tiles.clear();
        for object in all {
            self.append(object, resolution);
        }
    }

    /// Moves every object into the trash pipeline.
    pub fn purge(&mut self) {
        let mut trash = self.trash.lock();
        for batches in self.tiles.values_mut() {
            for batch in batches.iter_mut() {
                trash.append(&mut batch.objects);
                batch.estimated_cost = 0;
            }
        }
    }

    pub fn is_valid_position(&self, tile: (i16, i16)) -> bool {
        self.tiles.contains_key(&tile)
    }

    pub fn batches_at(&self, tile: (i16, i16)) -> Option<&Vec<Batch>> {
        self.tiles.get(&tile)
    }

    pub fn object_count(&self) -> usize {
        self.tiles
            .values()
            .flat_map(|batches| batches.iter())
            .map(|batch| batch.objects.len())
            .sum()
    }

    pub fn find_object(&self, id: u32) -> Option<Arc<SceneObject>> {
        self.tiles
            .values()
            .flat_map(|batches| batches.iter())
            .flat_map(|batch| batch.objects.iter())
            .find(|object| object.object_id() == id)
            .cloned()
    }

    /// The object's containing tile, for assertions about placement.
    pub fn locate(&self, object: &Arc<SceneObject>) -> Vec<(i16, i16)> {
        let mut found = Vec::new();
        for (tile, batches) in &self.tiles {
            for batch in batches {
                if batch.objects.iter().any(|o| Arc::ptr_eq(o, object)) {
                    found.push(*tile);
                }
            }
        }
        found
    }

    pub fn for_each_object(&self, mut f: impl FnMut(&Arc<SceneObject>)) {
        for batches in self.tiles.values() {
            for batch in batches {
                for object in &batch.objects {
                    f(object);
                }
            }
        }
    }
}

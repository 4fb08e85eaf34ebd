//! The tile-batched scene: renderable objects, cost-bounded batches in
//! screen-sized tiles, and the five-layer environment.

pub mod environment;
pub mod object;
pub mod tiles;

pub use environment::{Environment, LAYER_COUNT, Layer};
pub use object::{Rect, SceneObject, keys};
pub use tiles::{Batch, DEFAULT_BATCH_COST_GOAL, TileContainer};

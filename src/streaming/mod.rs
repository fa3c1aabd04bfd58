//! Streaming core: tile scheduling, the persistent tile-merge accumulator and the
//! threaded partition/compute/gather processor.

pub mod accumulator;
pub mod threaded;
pub mod tiles;

pub use accumulator::{
    AccumulatorConfig, DriveControl, DriveSummary, PersistentAccumulator, Polygonizer,
    StreamState, StreamingFilter, drive_tiles,
};
pub use threaded::{Destination, FeatureComputation, ThreadedTileProcessor, partition};
pub use tiles::TileScheduler;

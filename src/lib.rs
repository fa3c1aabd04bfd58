//! Rastvec: tiled raster segmentation and vectorization.
//!
//! Large images are split into tiles; each tile's labeled regions are polygonized and merged
//! into one persistent SQLite vector layer, one transaction per tile. Per-feature attributes
//! are then computed in parallel and written back in order.

pub mod engine;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod raster;
pub mod sink;
pub mod streaming;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use error::{RastvecError, error_kind};
pub use pipeline::{PipelineOrchestrator, PipelineState, RunReport};

use log::debug;
use std::path::Path;

/// Result alias used by public rastvec API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: segment `input`, vectorize it into `output` and compute features.
///
/// Uses the reference range segmenter. For a custom [`raster::Segmenter`] or an image already
/// in memory, build a [`PipelineOrchestrator`] directly:
///
/// ```ignore
/// let mut orch = rastvec::PipelineOrchestrator::with_segmenter(None, out, opts, my_segmenter);
/// let report = orch.execute_with_image(image)?;
/// ```
pub fn run(input: &Path, output: &Path, opts: &Opts) -> Result<RunReport> {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    pipeline::run_pipeline(input, output, opts)
}

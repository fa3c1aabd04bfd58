//! Segmentation-to-vector pipeline: stages, feature computations, intermediates and the
//! orchestrator that sequences them.

pub mod cleanup;
pub mod features;
pub mod orchestrator;
pub mod stages;

pub use cleanup::{IntermediatePaths, intermediate_paths, remove_file_best_effort};
pub use features::{GeometricFeatures, SpectralFeatures};
pub use orchestrator::{
    Handoff, PipelineOrchestrator, PipelineState, RunReport, StageTiming, output_schema,
    run_pipeline,
};
pub use stages::{LabelSource, Stage, TileProgress, VectorizedLayer};

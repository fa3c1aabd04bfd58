//! Sequence the segmentation → vectorization → enrichment → filtering stages.
//!
//! Segmentation hands its label raster to vectorization in memory, unless small-region
//! merging runs: then both label maps are materialized as files next to the output (or in
//! `tmp_dir`) and removed after a successful run when cleanup is on. A failing stage moves the
//! orchestrator to [`PipelineState::Failed`]; later stages are skipped and intermediates are
//! left on disk.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use super::cleanup::{self, IntermediatePaths};
use super::features::{GeometricFeatures, SpectralFeatures};
use super::stages::{
    FeatureEnrichment, LabelSource, ObjectFiltering, Segmentation, SmallRegionMerging, Stage,
    TileProgress, Vectorization,
};
use crate::Opts;
use crate::error::RastvecError;
use crate::raster::{self, ImageRaster, LabelPolygonizer, RangeSegmenter, Segmenter};
use crate::sink::LayerOptions;
use crate::streaming::{AccumulatorConfig, FeatureComputation, ThreadedTileProcessor};
use crate::types::{FieldDefn, GeometryType, SpatialRef};
use crate::utils::config::WorkerThreadLimits;
use crate::utils::resolve_tile_size;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    SegmentationDone,
    MergeDone,
    VectorizationDone,
    GeometricDone,
    SpectralDone,
    FilterDone,
    Complete,
    Failed { stage: &'static str },
}

/// How segmentation output reached vectorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handoff {
    InMemory,
    Files,
}

#[derive(Clone, Debug)]
pub struct StageTiming {
    pub stage: &'static str,
    pub duration: Duration,
}

/// Outcome of a successful run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub state: PipelineState,
    pub handoff: Handoff,
    pub timings: Vec<StageTiming>,
    pub tiles: usize,
    /// Features in the output layer after filtering.
    pub features: usize,
    pub filtered_out: usize,
    /// Intermediate files written during the run.
    pub intermediates: Vec<PathBuf>,
    /// How many of them cleanup removed.
    pub cleaned: usize,
}

pub struct PipelineOrchestrator<S: Segmenter = RangeSegmenter> {
    input: Option<PathBuf>,
    output: PathBuf,
    opts: Opts,
    segmenter: Option<S>,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<TileProgress>,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl PipelineOrchestrator<RangeSegmenter> {
    /// Orchestrator reading `input` and using the range segmenter configured by `opts`.
    pub fn new(input: &Path, output: &Path, opts: Opts) -> Self {
        let segmenter = RangeSegmenter::new(opts.range_radius);
        Self::with_segmenter(Some(input), output, opts, segmenter)
    }
}

impl<S: Segmenter> PipelineOrchestrator<S> {
    pub fn with_segmenter(input: Option<&Path>, output: &Path, opts: Opts, segmenter: S) -> Self {
        Self {
            input: input.map(Path::to_path_buf),
            output: output.to_path_buf(),
            opts,
            segmenter: Some(segmenter),
            cancel: None,
            progress: None,
            state: PipelineState::Init,
            history: vec![PipelineState::Init],
        }
    }

    /// Flag checked between tiles; when set the run fails after the current tile.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: TileProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state visited so far, starting with `Init`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn intermediate_paths(&self) -> IntermediatePaths {
        cleanup::intermediate_paths(&self.output, self.opts.tmp_dir.as_deref())
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Read the input image and run every stage.
    pub fn execute(&mut self) -> Result<RunReport> {
        let input = self
            .input
            .clone()
            .ok_or_else(|| RastvecError::config("no input image given"))?;
        let image = match raster::read_image(&input) {
            Ok(img) => img,
            Err(e) => {
                self.transition(PipelineState::Failed {
                    stage: "Segmentation",
                });
                return Err(e);
            }
        };
        self.execute_with_image(image)
    }

    /// Run every stage on an already loaded image.
    pub fn execute_with_image(&mut self, image: ImageRaster) -> Result<RunReport> {
        if self.state != PipelineState::Init {
            return Err(RastvecError::config(format!(
                "pipeline already ran (state {:?})",
                self.state
            ))
            .into());
        }
        let mut report = RunReport {
            state: PipelineState::Init,
            handoff: if self.opts.min_size > 0 {
                Handoff::Files
            } else {
                Handoff::InMemory
            },
            timings: Vec::new(),
            tiles: 0,
            features: 0,
            filtered_out: 0,
            intermediates: Vec::new(),
            cleaned: 0,
        };
        let mut current = "Segmentation";
        let mut created_tmp = false;
        let outcome = match self.opts.tmp_dir.clone() {
            Some(dir) if self.opts.min_size > 0 => cleanup::prepare_tmp_dir(&dir),
            _ => Ok(false),
        }
        .and_then(|created| {
            created_tmp = created;
            self.run_stages(image, &mut report, &mut current)
        });

        match outcome {
            Ok(()) => {
                self.transition(PipelineState::Complete);
                report.state = PipelineState::Complete;
                if self.opts.cleanup {
                    report.cleaned = cleanup::cleanup_intermediates(&report.intermediates);
                    if created_tmp && let Some(dir) = &self.opts.tmp_dir {
                        cleanup::remove_dir_if_empty(dir);
                    }
                }
                info!(
                    "Pipeline complete: {} features in layer {} ({} tiles)",
                    report.features, self.opts.layer_name, report.tiles
                );
                Ok(report)
            }
            Err(e) => {
                self.transition(PipelineState::Failed { stage: current });
                if !report.intermediates.is_empty() {
                    info!(
                        "Intermediates kept for inspection: {:?}",
                        report.intermediates
                    );
                }
                Err(e.context(format!("stage {current} failed")))
            }
        }
    }

    fn run_stages(
        &mut self,
        mut image: ImageRaster,
        report: &mut RunReport,
        current: &mut &'static str,
    ) -> Result<()> {
        if let Some(srs) = &self.opts.srs
            && image.srs.as_str().is_none()
        {
            image.srs = SpatialRef::new(srs.as_str());
        }
        let out_srs = match &self.opts.srs {
            Some(s) => SpatialRef::new(s.as_str()),
            None => image.srs.clone(),
        };
        let bands = image.bands;
        let tile_size =
            resolve_tile_size(self.opts.tile_size, self.opts.ram_mb, image.width, image.height);
        let image = Arc::new(image);
        let paths = self.intermediate_paths();
        let segmenter = self
            .segmenter
            .take()
            .ok_or_else(|| RastvecError::config("segmenter already consumed"))?;

        // Segmentation
        let start = Instant::now();
        let mut segmentation = Segmentation {
            segmenter,
            materialize: (self.opts.min_size > 0).then(|| paths.labelmap.clone()),
        };
        *current = segmentation.name();
        info!("{}...", *current);
        let mut labels = segmentation.run(Arc::clone(&image))?;
        if let Some(p) = labels.path() {
            report.intermediates.push(p.clone());
        }
        record(report, *current, start);
        self.transition(PipelineState::SegmentationDone);

        // Small-region merging (file in, file out)
        if self.opts.min_size > 0
            && let LabelSource::File(labelmap) = labels
        {
            let start = Instant::now();
            let mut merging = SmallRegionMerging {
                image: Arc::clone(&image),
                min_size: self.opts.min_size,
                output: paths.merged.clone(),
            };
            *current = merging.name();
            info!("{}...", *current);
            let merged = merging.run(labelmap)?;
            report.intermediates.push(merged.clone());
            labels = LabelSource::File(merged);
            record(report, *current, start);
            self.transition(PipelineState::MergeDone);
        }

        // Vectorization
        let start = Instant::now();
        *current = "Vectorization";
        let mut config = AccumulatorConfig::new(self.opts.layer_name.clone(), out_srs);
        config.geometry_type = GeometryType::Polygon;
        config.options = LayerOptions::from_pairs(&self.opts.layer_options)?;
        config.fields = output_schema(&self.opts.label_field, bands);
        config.tile_size = tile_size;
        config.simplify_tolerance = self.opts.simplify;
        let vectorized = {
            let mut vectorization = Vectorization {
                output: self.output.clone(),
                config,
                mask: self.opts.mask.clone(),
                label_field: self.opts.label_field.clone(),
                start_label: self.opts.start_label,
                cancel: self.cancel.as_deref(),
                progress: self.progress.as_mut(),
            };
            *current = vectorization.name();
            info!("{}...", *current);
            vectorization.run(labels)?
        };
        report.tiles = vectorized.summary.tiles;
        report.features = vectorized.summary.features;
        record(report, *current, start);
        self.transition(PipelineState::VectorizationDone);

        let threads = WorkerThreadLimits::current().resolve(self.opts.num_threads);
        let processor = ThreadedTileProcessor::new(threads);

        // Geometric features
        let start = Instant::now();
        let mut geometric =
            FeatureEnrichment::new("GeometricFeatures", GeometricFeatures, processor);
        *current = geometric.name();
        info!("{}...", *current);
        let vectorized = geometric.run(vectorized)?;
        record(report, *current, start);
        self.transition(PipelineState::GeometricDone);

        // Spectral features
        let start = Instant::now();
        let label_field = &self.opts.label_field;
        let label_index = vectorized.layer.field_index(label_field).ok_or_else(|| {
            RastvecError::config(format!("output layer has no {label_field} field"))
        })?;
        let spectral = SpectralFeatures::new(
            Arc::clone(&vectorized.labels),
            Arc::clone(&image),
            label_index,
        )
        .with_label_offset(vectorized.label_offset);
        let mut spectral = FeatureEnrichment::new("SpectralFeatures", spectral, processor);
        *current = spectral.name();
        info!("{}...", *current);
        let vectorized = spectral.run(vectorized)?;
        record(report, *current, start);
        self.transition(PipelineState::SpectralDone);

        // Object filtering
        if let Some(expression) = self.opts.filter.clone().filter(|f| !f.trim().is_empty()) {
            let start = Instant::now();
            let mut filtering = ObjectFiltering { expression };
            *current = filtering.name();
            info!("{}...", *current);
            let removed = filtering.run(vectorized)?;
            report.filtered_out = removed;
            report.features = report.features.saturating_sub(removed);
            record(report, *current, start);
            self.transition(PipelineState::FilterDone);
        }
        Ok(())
    }
}

fn record(report: &mut RunReport, stage: &'static str, start: Instant) {
    let duration = start.elapsed();
    debug!("{stage} took {duration:?}");
    report.timings.push(StageTiming { stage, duration });
}

/// Full output schema, declared when the layer is created: polygonizer fields, then geometric
/// and spectral fields (`nbpixels` only once).
pub fn output_schema(label_field: &str, bands: usize) -> Vec<FieldDefn> {
    let mut fields = LabelPolygonizer::schema(label_field);
    fields.extend(GeometricFeatures.fields());
    for f in SpectralFeatures::fields_for_bands(bands) {
        if !fields.iter().any(|g| g.name == f.name) {
            fields.push(f);
        }
    }
    fields
}

/// Run the whole pipeline from `input` to `output` with `opts`.
pub fn run_pipeline(input: &Path, output: &Path, opts: &Opts) -> Result<RunReport> {
    PipelineOrchestrator::new(input, output, opts.clone())
        .execute()
        .with_context(|| format!("pipeline {} -> {}", input.display(), output.display()))
}

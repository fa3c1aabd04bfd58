//! Pipeline stages. Each stage takes its input by value and returns an owned output.

use anyhow::Result;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::raster::{
    self, ImageRaster, LabelPolygonizer, LabelRaster, Segmenter, merge_small_regions,
};
use crate::error::RastvecError;
use crate::sink::{DataSource, Layer, OpenMode};
use crate::streaming::{
    AccumulatorConfig, Destination, DriveControl, DriveSummary, FeatureComputation,
    PersistentAccumulator, ThreadedTileProcessor, TileScheduler, drive_tiles,
};
use crate::types::RasterTile;

pub trait Stage {
    type Input;
    type Output;

    fn name(&self) -> &'static str;

    fn run(&mut self, input: Self::Input) -> Result<Self::Output>;
}

/// Label raster handed to vectorization: kept in memory, or materialized on disk.
#[derive(Clone, Debug)]
pub enum LabelSource {
    InMemory(Arc<LabelRaster>),
    File(PathBuf),
}

impl LabelSource {
    pub fn load(self) -> Result<Arc<LabelRaster>> {
        match self {
            LabelSource::InMemory(labels) => Ok(labels),
            LabelSource::File(path) => Ok(Arc::new(raster::read_label_map(&path)?)),
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            LabelSource::File(p) => Some(p),
            LabelSource::InMemory(_) => None,
        }
    }
}

/// Segment the image. With `materialize` set the label map is written there and handed on
/// as a file; otherwise it stays in memory.
pub struct Segmentation<S: Segmenter> {
    pub segmenter: S,
    pub materialize: Option<PathBuf>,
}

impl<S: Segmenter> Stage for Segmentation<S> {
    type Input = Arc<ImageRaster>;
    type Output = LabelSource;

    fn name(&self) -> &'static str {
        "Segmentation"
    }

    fn run(&mut self, image: Arc<ImageRaster>) -> Result<LabelSource> {
        let labels = self.segmenter.segment(&image)?;
        match &self.materialize {
            Some(path) => {
                raster::write_label_map(path, &labels)?;
                debug!("Label map written to {}", path.display());
                Ok(LabelSource::File(path.clone()))
            }
            None => Ok(LabelSource::InMemory(Arc::new(labels))),
        }
    }
}

/// Read a label map, merge regions below `min_size` pixels, write the result to `output`.
pub struct SmallRegionMerging {
    pub image: Arc<ImageRaster>,
    pub min_size: u32,
    pub output: PathBuf,
}

impl Stage for SmallRegionMerging {
    type Input = PathBuf;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "SmallRegionMerging"
    }

    fn run(&mut self, input: PathBuf) -> Result<PathBuf> {
        let labels = raster::read_label_map(&input)?;
        let merged = merge_small_regions(&labels, &self.image, self.min_size)?;
        raster::write_label_map(&self.output, &merged)?;
        Ok(self.output.clone())
    }
}

/// What vectorization leaves for the feature stages.
#[derive(Clone, Debug)]
pub struct VectorizedLayer {
    pub path: PathBuf,
    pub layer: Layer,
    pub labels: Arc<LabelRaster>,
    /// Written label value minus raster label.
    pub label_offset: i64,
    pub summary: DriveSummary,
}

/// Called after each committed tile with `(tiles_done, tiles_total)`.
pub type TileProgress = Box<dyn FnMut(usize, usize) + Send>;

/// Stream the label raster tile by tile into the output layer. Pixels outside `mask` are
/// dropped to label 0 first.
pub struct Vectorization<'a> {
    pub output: PathBuf,
    pub config: AccumulatorConfig,
    pub mask: Option<PathBuf>,
    pub label_field: String,
    pub start_label: u32,
    pub cancel: Option<&'a AtomicBool>,
    pub progress: Option<&'a mut TileProgress>,
}

impl Stage for Vectorization<'_> {
    type Input = LabelSource;
    type Output = VectorizedLayer;

    fn name(&self) -> &'static str {
        "Vectorization"
    }

    fn run(&mut self, input: LabelSource) -> Result<VectorizedLayer> {
        if self.start_label == 0 {
            return Err(RastvecError::config("start label must be at least 1").into());
        }
        let mut labels = input.load()?;
        if let Some(path) = &self.mask {
            let mask = raster::read_image(path)?;
            labels = Arc::new(labels.masked(&mask)?);
            debug!("Applied mask {}", path.display());
        }
        let scheduler = TileScheduler::new(labels.extent(), self.config.tile_size);
        let total = scheduler.tile_count();
        let (cols, rows) = scheduler.grid();
        info!(
            "Vectorizing {}x{} labels in {} tile(s) ({cols}x{rows})",
            labels.width, labels.height, total
        );

        let mut sink = DataSource::open(&self.output, OpenMode::Overwrite)?;
        let polygonizer = LabelPolygonizer::new(Arc::clone(&labels))
            .with_label_field(self.label_field.clone())
            .with_start_label(self.start_label);
        let label_offset = polygonizer.label_offset();
        let (layer, summary) = {
            let mut acc = PersistentAccumulator::new(&mut sink, polygonizer, self.config.clone());
            acc.initialize()?;
            let mut done = 0usize;
            let on_tile = self.progress.as_deref_mut().map(|p| {
                Box::new(move |_: &RasterTile, _: usize| {
                    done += 1;
                    p(done, total);
                }) as Box<dyn FnMut(&RasterTile, usize) + '_>
            });
            let control = DriveControl {
                cancel: self.cancel,
                on_tile,
            };
            let summary = drive_tiles(&mut acc, scheduler, control)?;
            let layer = acc
                .layer()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("output layer missing after vectorization"))?;
            (layer, summary)
        };
        sink.close()?;

        Ok(VectorizedLayer {
            path: self.output.clone(),
            layer,
            labels,
            label_offset,
            summary,
        })
    }
}

/// Fill computed fields of the vectorized layer in place with the threaded processor.
pub struct FeatureEnrichment<C: FeatureComputation> {
    name: &'static str,
    pub computation: C,
    pub processor: ThreadedTileProcessor,
}

impl<C: FeatureComputation> FeatureEnrichment<C> {
    pub fn new(name: &'static str, computation: C, processor: ThreadedTileProcessor) -> Self {
        Self {
            name,
            computation,
            processor,
        }
    }
}

impl<C: FeatureComputation> Stage for FeatureEnrichment<C> {
    type Input = VectorizedLayer;
    type Output = VectorizedLayer;

    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, input: VectorizedLayer) -> Result<VectorizedLayer> {
        self.processor.run(
            &input.path,
            &input.layer.name,
            &Destination::InPlace,
            &self.computation,
        )?;
        Ok(input)
    }
}

/// Keep only the features matching an attribute filter. Output: features removed.
pub struct ObjectFiltering {
    pub expression: String,
}

impl Stage for ObjectFiltering {
    type Input = VectorizedLayer;
    type Output = usize;

    fn name(&self) -> &'static str {
        "ObjectFiltering"
    }

    fn run(&mut self, input: VectorizedLayer) -> Result<usize> {
        let mut ds = DataSource::open(&input.path, OpenMode::Update)?;
        let removed = ds.apply_attribute_filter(&input.layer, &self.expression)?;
        let kept = ds.feature_count(&input.layer)?;
        ds.close()?;
        info!(
            "Filter {:?} removed {removed} features, {kept} kept",
            self.expression
        );
        Ok(removed)
    }
}

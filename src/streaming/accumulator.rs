//! Persistent tile-merge accumulator.
//!
//! One [`PersistentAccumulator::initialize`] creates the destination layer, then each tile goes
//! through `begin_tile` → `process_tile` → `commit_tile`. A tile's polygons are copied into the
//! persistent layer inside one transaction, so a failure leaves every earlier tile committed and
//! nothing of the failing one. The persistent layer only grows.

use anyhow::Result;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::RastvecError;
use crate::sink::{DataSource, Layer, LayerOptions, MemoryLayer};
use crate::types::{Extent, Feature, FieldDefn, FieldValue, GeometryType, RasterTile, SpatialRef};
use crate::utils::config::NBPIXELS_FIELD;

/// Generic streaming-filter contract. Only `generate_data` does work in the accumulator;
/// the other hooks exist so any streaming filter can be driven by [`drive_tiles`].
pub trait StreamingFilter {
    /// Reset per-stream counters.
    fn reset(&mut self) {}

    fn allocate_outputs(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process one tile (or the whole extent for `None`). Returns features written.
    fn generate_data(&mut self, tile: Option<RasterTile>) -> Result<usize>;

    fn synthetize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Upstream collaborator turning a raster tile into a transient vector layer with one
/// polygon per distinct label.
pub trait Polygonizer {
    /// Full raster extent being vectorized.
    fn extent(&self) -> Extent;

    fn srs(&self) -> SpatialRef;

    /// Schema of the transient layers produced by `process_tile`.
    fn fields(&self) -> Vec<FieldDefn>;

    fn process_tile(&mut self, tile: &RasterTile) -> Result<MemoryLayer>;
}

/// Destination layer definition and per-tile options.
#[derive(Clone, Debug)]
pub struct AccumulatorConfig {
    pub layer_name: String,
    pub srs: SpatialRef,
    pub geometry_type: GeometryType,
    pub options: LayerOptions,
    /// Persistent schema. Empty = the polygonizer's schema.
    pub fields: Vec<FieldDefn>,
    /// Tile side in pixels. None = whole extent.
    pub tile_size: Option<usize>,
    /// Drop transient features whose `nbpixels` is below this (0 = off).
    pub min_object_size: u32,
    /// Douglas–Peucker tolerance applied before commit.
    pub simplify_tolerance: Option<f64>,
}

impl AccumulatorConfig {
    pub fn new(layer_name: impl Into<String>, srs: SpatialRef) -> Self {
        Self {
            layer_name: layer_name.into(),
            srs,
            geometry_type: GeometryType::Polygon,
            options: LayerOptions::default(),
            fields: Vec::new(),
            tile_size: None,
            min_object_size: 0,
            simplify_tolerance: None,
        }
    }
}

/// Per-accumulator counters. Not durable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamState {
    /// Index of the tile being processed (or last processed).
    pub current_tile: Option<usize>,
    pub tile_size: Option<usize>,
    pub tiles_committed: usize,
    pub features_written: usize,
}

pub struct PersistentAccumulator<'a, P: Polygonizer> {
    sink: &'a mut DataSource,
    polygonizer: P,
    config: AccumulatorConfig,
    layer: Option<Layer>,
    tile: Option<RasterTile>,
    state: StreamState,
}

impl<'a, P: Polygonizer> PersistentAccumulator<'a, P> {
    pub fn new(sink: &'a mut DataSource, polygonizer: P, config: AccumulatorConfig) -> Self {
        let state = StreamState {
            tile_size: config.tile_size,
            ..StreamState::default()
        };
        Self {
            sink,
            polygonizer,
            config,
            layer: None,
            tile: None,
            state,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn layer(&self) -> Option<&Layer> {
        self.layer.as_ref()
    }

    pub fn polygonizer(&self) -> &P {
        &self.polygonizer
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }

    /// Create the destination layer and its schema. Must precede any tile.
    /// An existing layer of the same name is rejected unless the `overwrite` option is set.
    /// A rejected schema creates nothing, so a corrected config can initialize again.
    pub fn initialize(&mut self) -> Result<&Layer> {
        if self.layer.is_some() {
            return Err(RastvecError::config(format!(
                "accumulator for layer {} is already initialized",
                self.config.layer_name
            ))
            .into());
        }
        let fields = if self.config.fields.is_empty() {
            self.polygonizer.fields()
        } else {
            self.config.fields.clone()
        };
        let layer = self.sink.create_layer_with_fields(
            &self.config.layer_name,
            &self.config.srs,
            self.config.geometry_type,
            &self.config.options,
            &fields,
        )?;
        debug!(
            "Initialized layer {} with fields {:?}",
            layer.name,
            layer.field_names()
        );
        Ok(self.layer.insert(layer))
    }

    /// Select the tile for the next `process_tile`.
    pub fn begin_tile(&mut self, tile: RasterTile) -> Result<()> {
        if self.layer.is_none() {
            return Err(RastvecError::config("begin_tile called before initialize").into());
        }
        self.state.current_tile = Some(tile.index);
        self.tile = Some(tile);
        Ok(())
    }

    /// Polygonize the current tile into a transient layer, applying the size filter and
    /// simplification.
    pub fn process_tile(&mut self) -> Result<MemoryLayer> {
        let Some(tile) = self.tile else {
            return Err(RastvecError::config("process_tile called before begin_tile").into());
        };
        let mut transient = self.polygonizer.process_tile(&tile)?;

        if self.config.min_object_size > 0 {
            match transient.field_index(NBPIXELS_FIELD) {
                Some(idx) => {
                    let min = i64::from(self.config.min_object_size);
                    let before = transient.feature_count();
                    transient.retain(|f| f.values[idx].as_i64().is_none_or(|n| n >= min));
                    debug!(
                        "Tile {}: dropped {} features below {} pixels",
                        tile.index,
                        before - transient.feature_count(),
                        min
                    );
                }
                None => debug!(
                    "Tile {}: no {} field, size filter skipped",
                    tile.index, NBPIXELS_FIELD
                ),
            }
        }

        if let Some(tol) = self.config.simplify_tolerance
            && tol > 0.0
        {
            for f in transient.features_mut() {
                f.geometry = f.geometry.simplify(tol);
            }
        }
        Ok(transient)
    }

    /// Copy every transient feature into the persistent layer inside one transaction.
    /// Spatial references are checked before anything is written.
    pub fn commit_tile(&mut self, transient: MemoryLayer) -> Result<usize> {
        let Some(layer) = self.layer.as_ref() else {
            return Err(RastvecError::config("commit_tile called before initialize").into());
        };
        if !transient.srs.is_compatible(&layer.srs) {
            return Err(RastvecError::config(format!(
                "spatial reference mismatch: tile layer {} is {}, output layer {} is {}",
                transient.name, transient.srs, layer.name, layer.srs
            ))
            .into());
        }

        // Persistent field i takes the transient value of the same name, or NULL.
        let mapping: Vec<Option<usize>> = layer
            .fields
            .iter()
            .map(|f| transient.field_index(&f.name))
            .collect();

        let tile_index = self.state.current_tile.unwrap_or(0);
        let mut tx = self.sink.begin_transaction()?;
        let mut written = 0;
        for feat in transient.iter() {
            let values = mapping
                .iter()
                .map(|m| match m {
                    Some(i) => feat.values[*i].clone(),
                    None => FieldValue::Null,
                })
                .collect();
            tx.create_feature(layer, &Feature::new(feat.geometry.clone(), values))?;
            written += 1;
        }
        tx.commit()?;

        self.state.tiles_committed += 1;
        self.state.features_written += written;
        self.tile = None;
        debug!("Tile {tile_index}: committed {written} features");
        Ok(written)
    }

    /// Give back the polygonizer once the stream is over.
    pub fn into_polygonizer(self) -> P {
        self.polygonizer
    }
}

impl<P: Polygonizer> StreamingFilter for PersistentAccumulator<'_, P> {
    fn reset(&mut self) {
        self.state = StreamState {
            tile_size: self.config.tile_size,
            ..StreamState::default()
        };
    }

    fn generate_data(&mut self, tile: Option<RasterTile>) -> Result<usize> {
        let tile = tile.unwrap_or_else(|| RasterTile::whole(self.polygonizer.extent()));
        self.begin_tile(tile)?;
        let transient = self.process_tile()?;
        self.commit_tile(transient)
    }
}

/// Caller hooks for [`drive_tiles`].
#[derive(Default)]
pub struct DriveControl<'c> {
    /// Checked before each tile; when set, the run stops with an error.
    pub cancel: Option<&'c AtomicBool>,
    /// Called after each committed tile with `(tile, features_written)`.
    pub on_tile: Option<Box<dyn FnMut(&RasterTile, usize) + 'c>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriveSummary {
    pub tiles: usize,
    pub features: usize,
}

/// Drive `filter` over every tile of `tiles`, sequentially.
pub fn drive_tiles<F, I>(filter: &mut F, tiles: I, mut control: DriveControl<'_>) -> Result<DriveSummary>
where
    F: StreamingFilter,
    I: IntoIterator<Item = RasterTile>,
{
    filter.allocate_outputs()?;
    filter.reset();
    let mut summary = DriveSummary::default();
    for tile in tiles {
        if let Some(flag) = control.cancel
            && flag.load(Ordering::Relaxed)
        {
            anyhow::bail!(
                "cancelled after {} tiles; committed tiles are kept in the output",
                summary.tiles
            );
        }
        let n = filter.generate_data(Some(tile))?;
        summary.tiles += 1;
        summary.features += n;
        if let Some(cb) = control.on_tile.as_mut() {
            cb(&tile, n);
        }
    }
    filter.synthetize()?;
    Ok(summary)
}

//! Raster side of the pipeline: image and label rasters, TIFF I/O, segmentation,
//! small-region merging and label polygonization.

pub mod io;
pub mod merge;
pub mod polygonize;
pub mod segment;

pub use io::{read_image, read_label_map, write_label_map};
pub use merge::merge_small_regions;
pub use polygonize::LabelPolygonizer;
pub use segment::{RangeSegmenter, Segmenter};

use anyhow::Result;

use crate::error::RastvecError;
use crate::types::{Extent, GeoTransform, RasterTile, SpatialRef};

/// Per-pixel segment labels, row-major. Label 0 means no-data.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelRaster {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u32>,
    pub geo: GeoTransform,
    pub srs: SpatialRef,
}

impl LabelRaster {
    pub fn new(width: usize, height: usize, data: Vec<u32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
            geo: GeoTransform::default(),
            srs: SpatialRef::unknown(),
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.data[y * self.width + x]
    }

    /// Largest label present (0 for an empty raster).
    pub fn max_label(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Copy with label 0 wherever the first band of `mask` is not strictly positive.
    /// The mask must have the same size as the labels.
    pub fn masked(&self, mask: &ImageRaster) -> Result<LabelRaster> {
        if mask.width != self.width || mask.height != self.height {
            return Err(RastvecError::config(format!(
                "mask is {}x{}, labels are {}x{}",
                mask.width, mask.height, self.width, self.height
            ))
            .into());
        }
        let mut out = self.clone();
        for (i, label) in out.data.iter_mut().enumerate() {
            let keep = mask.data[i * mask.bands] > 0.0;
            if !keep {
                *label = 0;
            }
        }
        Ok(out)
    }

    /// Copy of the pixels inside `tile`, in tile-local row-major order.
    pub fn crop(&self, tile: &RasterTile) -> Vec<u32> {
        let mut out = Vec::with_capacity(tile.pixel_count());
        for y in tile.y..tile.y + tile.height {
            let start = y * self.width + tile.x;
            out.extend_from_slice(&self.data[start..start + tile.width]);
        }
        out
    }
}

/// Multi-band image, pixel-interleaved `f32` samples.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageRaster {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub data: Vec<f32>,
    pub geo: GeoTransform,
    pub srs: SpatialRef,
}

impl ImageRaster {
    pub fn new(width: usize, height: usize, bands: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height * bands);
        Self {
            width,
            height,
            bands,
            data,
            geo: GeoTransform::default(),
            srs: SpatialRef::unknown(),
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// All band values of pixel (x, y).
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.width + x) * self.bands;
        &self.data[start..start + self.bands]
    }
}

//! Split a raster extent into row-major tiles.

use crate::types::{Extent, RasterTile};

/// Enumerates non-overlapping tiles covering an extent. Tiles on the right and bottom edges
/// are clipped to the extent. `None` or `Some(0)` yields the whole extent as a single tile.
#[derive(Clone, Debug)]
pub struct TileScheduler {
    extent: Extent,
    tile_w: usize,
    tile_h: usize,
    cols: usize,
    rows: usize,
    next: usize,
}

impl TileScheduler {
    pub fn new(extent: Extent, tile_size: Option<usize>) -> Self {
        let (tile_w, tile_h) = match tile_size {
            Some(s) if s > 0 => (s, s),
            _ => (extent.width.max(1), extent.height.max(1)),
        };
        let (cols, rows) = if extent.is_empty() {
            (0, 0)
        } else {
            (
                extent.width.div_ceil(tile_w),
                extent.height.div_ceil(tile_h),
            )
        };
        Self {
            extent,
            tile_w,
            tile_h,
            cols,
            rows,
            next: 0,
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Total number of tiles in the schedule (independent of iteration progress).
    pub fn tile_count(&self) -> usize {
        self.cols * self.rows
    }

    /// Grid shape `(columns, rows)`.
    pub fn grid(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// Tile at row-major position `index`, if any.
    pub fn tile(&self, index: usize) -> Option<RasterTile> {
        if index >= self.tile_count() {
            return None;
        }
        let col = index % self.cols;
        let row = index / self.cols;
        let x = col * self.tile_w;
        let y = row * self.tile_h;
        Some(RasterTile {
            index,
            x,
            y,
            width: self.tile_w.min(self.extent.width - x),
            height: self.tile_h.min(self.extent.height - y),
        })
    }
}

impl Iterator for TileScheduler {
    type Item = RasterTile;

    fn next(&mut self) -> Option<RasterTile> {
        let tile = self.tile(self.next)?;
        self.next += 1;
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.tile_count().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for TileScheduler {}

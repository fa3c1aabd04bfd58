//! RAM budget → streaming tile size.

use log::debug;
use sysinfo::System;

use crate::utils::config::MemoryConsts;

/// Available system memory in megabytes, or `None` if it cannot be read.
pub fn available_memory_mb() -> Option<u64> {
    let mut sys = System::new();
    sys.refresh_memory();
    let bytes = sys.available_memory();
    (bytes > 0).then_some(bytes / (1024 * 1024))
}

/// Largest square tile side whose pixels fit in `ram_mb`, never below
/// [`MemoryConsts::MIN_TILE_SIDE`].
pub fn tile_size_for_ram(ram_mb: u64) -> usize {
    let bytes = ram_mb.saturating_mul(1024 * 1024);
    let pixels = bytes / MemoryConsts::BYTES_PER_PIXEL;
    let side = (pixels as f64).sqrt() as usize;
    side.max(MemoryConsts::MIN_TILE_SIDE)
}

/// Tile size for a run: explicit size wins, then the RAM budget, then a share of available
/// memory. Returns `None` (whole image) when the image already fits.
pub fn resolve_tile_size(
    tile_size: Option<usize>,
    ram_mb: Option<u64>,
    width: usize,
    height: usize,
) -> Option<usize> {
    if let Some(s) = tile_size.filter(|s| *s > 0) {
        return Some(s);
    }
    let budget = ram_mb.or_else(|| {
        available_memory_mb().map(|mb| (mb as f64 * MemoryConsts::AVAILABLE_FRACTION) as u64)
    })?;
    let side = tile_size_for_ram(budget);
    debug!("RAM budget {budget} MB -> tile side {side}");
    if side >= width && side >= height {
        None
    } else {
        Some(side)
    }
}

//! Application configuration constants.
//! Defaults, field names and tuning in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Optional settings file looked up in the working directory (CLI only).
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }
}

// ---- Output layer ----

/// Output layer name when none is given.
pub const DEFAULT_LAYER_NAME: &str = "layer";

/// Default name of the integer field holding the segment label of each polygon.
pub const LABEL_FIELD: &str = "label";

/// Label value written for the first segment.
pub const DEFAULT_START_LABEL: u32 = 1;

/// Integer field holding the pixel count of each polygon's segment.
pub const NBPIXELS_FIELD: &str = "nbpixels";

// ---- Segmentation ----

/// Default per-band range radius (radiometry units).
pub const DEFAULT_RANGE_RADIUS: f32 = 15.0;

// ---- Intermediates ----

/// Suffix of the label map written by segmentation when small-region merging runs.
pub const LABELMAP_SUFFIX: &str = "_labelmap.tif";

/// Suffix of the label map written by small-region merging.
pub const LABELMAP_MERGED_SUFFIX: &str = "_labelmap_merged.tif";

// ---- Worker threads ----

/// Thread limits for the threaded feature computation.
/// Use [`WorkerThreadLimits::current()`] to fill `all_threads` from rayon; the rest are const.
#[derive(Clone, Copy, Debug)]
pub struct WorkerThreadLimits {
    /// Available threads (from rayon); set by [`WorkerThreadLimits::current()`].
    pub all_threads: usize,
    /// Floor when the requested count is zero.
    pub floor: usize,
    /// Upper bound on requested worker threads.
    pub max: usize,
}

impl Default for WorkerThreadLimits {
    fn default() -> Self {
        Self {
            all_threads: 0, // use current() to set from rayon
            floor: Self::FLOOR_THREADS,
            max: Self::MAX_THREADS,
        }
    }
}

impl WorkerThreadLimits {
    pub const FLOOR_THREADS: usize = 1;
    pub const MAX_THREADS: usize = 256;

    /// Build limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            ..Self::default()
        }
    }

    /// Effective worker count: the request (or all threads) clamped to `[floor, max]`.
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.all_threads)
            .clamp(self.floor, self.max)
    }
}

// ---- Memory budget ----

/// Memory tuning for deriving a tile size from a RAM budget.
pub struct MemoryConsts;

impl MemoryConsts {
    /// Estimated bytes held per pixel of a tile (label, image samples, edge maps).
    pub const BYTES_PER_PIXEL: u64 = 64;
    /// Fraction of available memory used when no budget is given.
    pub const AVAILABLE_FRACTION: f64 = 0.5;
    /// Smallest tile side produced from a RAM budget.
    pub const MIN_TILE_SIDE: usize = 64;
}

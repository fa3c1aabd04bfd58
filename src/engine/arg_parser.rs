use clap::Parser;
use std::path::PathBuf;

/// Tiled segmentation and vectorization of raster images.
#[derive(Clone, Parser)]
#[command(name = "rastvec")]
#[command(
    about = "Segment an image, stream its regions into a SQLite vector layer, compute per-object features."
)]
pub struct Cli {
    /// Input image (GeoTIFF; gray, gray+alpha, RGB or RGBA).
    #[arg(value_name = "IMAGE")]
    pub input: PathBuf,

    /// Output vector data source (SQLite). Recreated if it exists.
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Name of the output layer. Default: `layer`.
    #[arg(long)]
    pub layer_name: Option<String>,

    /// Name of the field holding each polygon's segment label. Default: `label`.
    #[arg(long)]
    pub label_field: Option<String>,

    /// Label value of the first segment. Default: 1.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub start_label: Option<u32>,

    /// Layer creation option, repeatable.
    #[arg(long = "layer-option", value_name = "KEY=VALUE")]
    pub layer_options: Vec<String>,

    /// Mask image; only pixels whose mask value is strictly positive are vectorized.
    #[arg(long, value_name = "MASK")]
    pub mask: Option<PathBuf>,

    /// Spatial reference of the output (e.g. EPSG:32631). Default: the image's.
    #[arg(long)]
    pub srs: Option<String>,

    /// Tile side in pixels. 0 = whole image. Default: derived from --ram.
    #[arg(long, short = 't', value_parser = clap::value_parser!(usize))]
    pub tile_size: Option<usize>,

    /// RAM budget in megabytes used to derive the tile size.
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub ram: Option<u64>,

    /// Max per-band difference for neighbouring pixels to share a segment.
    #[arg(long, short = 'r', value_parser = clap::value_parser!(f32))]
    pub range_radius: Option<f32>,

    /// Minimum segment size in pixels. Smaller segments are merged into a neighbour (0 = off).
    #[arg(long, short = 'm', value_parser = clap::value_parser!(u32))]
    pub min_size: Option<u32>,

    /// Keep only features matching this SQL expression over field names (e.g. "nbpixels > 10").
    #[arg(long, short = 'f')]
    pub filter: Option<String>,

    /// Remove intermediate label maps after a successful run.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub cleanup: Option<bool>,

    /// Directory for intermediate files. Default: next to the output.
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,

    /// Worker threads for feature computation. Default: all cores.
    #[arg(long, short = 'j', value_parser = clap::value_parser!(usize))]
    pub threads: Option<usize>,

    /// Simplify polygons with this tolerance (map units) before they are written.
    #[arg(long, value_parser = clap::value_parser!(f64))]
    pub simplify: Option<f64>,

    /// Verbose output (debug logs and a tile progress bar).
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

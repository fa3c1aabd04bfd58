//! Public and internal types for the rastvec API and pipeline.

use std::path::PathBuf;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::utils::config::{
    DEFAULT_LAYER_NAME, DEFAULT_RANGE_RADIUS, DEFAULT_START_LABEL, LABEL_FIELD,
};

/// Size of a raster in pixels. The origin is always (0, 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub width: usize,
    pub height: usize,
}

impl Extent {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Rectangular sub-region of a raster, scheduled once and processed once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterTile {
    /// Row-major position of the tile in the schedule.
    pub index: usize,
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl RasterTile {
    /// Tile spanning the whole extent (non-streaming mode).
    pub fn whole(extent: Extent) -> Self {
        Self {
            index: 0,
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Affine pixel → map transform (north-up, no rotation terms).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl Default for GeoTransform {
    /// Identity: map coordinates equal pixel-corner coordinates.
    fn default() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
        }
    }
}

impl GeoTransform {
    /// Map coordinates of the pixel corner at (col, row).
    pub fn apply(&self, col: f64, row: f64) -> [f64; 2] {
        [
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        ]
    }

    /// Fractional pixel coordinates of a map point.
    pub fn invert(&self, x: f64, y: f64) -> [f64; 2] {
        [
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        ]
    }

    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }
}

/// Spatial reference of a layer, kept as its textual definition (e.g. `EPSG:32631`).
/// `None` means unknown / unreferenced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialRef(Option<String>);

impl SpatialRef {
    pub fn new(definition: impl Into<String>) -> Self {
        let def = definition.into();
        let trimmed = def.trim();
        if trimmed.is_empty() {
            Self(None)
        } else {
            Self(Some(trimmed.to_string()))
        }
    }

    pub fn unknown() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Two references are compatible when both are unknown or both name the same definition
    /// (ASCII case-insensitive, whitespace-insensitive).
    pub fn is_compatible(&self, other: &SpatialRef) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => normalize_srs(a) == normalize_srs(b),
            _ => false,
        }
    }
}

fn normalize_srs(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl std::fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("<unknown>"))
    }
}

/// Geometry type declared by a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryType {
    Polygon,
    Unknown,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Polygon => "POLYGON",
            GeometryType::Unknown => "UNKNOWN",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("POLYGON") {
            GeometryType::Polygon
        } else {
            GeometryType::Unknown
        }
    }
}

/// Attribute type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Real,
    String,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "Integer",
            FieldType::Real => "Real",
            FieldType::String => "String",
        }
    }

    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s {
            "Integer" => Some(FieldType::Integer),
            "Real" => Some(FieldType::Real),
            "String" => Some(FieldType::String),
            _ => None,
        }
    }

    /// SQLite column affinity for this field type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::String => "TEXT",
        }
    }

    /// Whether `value` may be stored in a field of this type. Null fits anywhere and
    /// integers widen to reals.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (FieldType::Integer, FieldValue::Integer(_))
                | (FieldType::Real, FieldValue::Integer(_) | FieldValue::Real(_))
                | (FieldType::String, FieldValue::String(_))
        )
    }
}

/// Field definition: name, type, width and precision (0 = unspecified).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDefn {
    pub name: String,
    pub field_type: FieldType,
    pub width: u32,
    pub precision: u32,
}

impl FieldDefn {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            width: 0,
            precision: 0,
        }
    }

    pub fn with_width(mut self, width: u32, precision: u32) -> Self {
        self.width = width;
        self.precision = precision;
        self
    }
}

/// One attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    String(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Real(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "Null",
            FieldValue::Integer(_) => "Integer",
            FieldValue::Real(_) => "Real",
            FieldValue::String(_) => "String",
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(v) => ToSqlOutput::from(*v),
            FieldValue::Real(v) => ToSqlOutput::from(*v),
            FieldValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for FieldValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(FieldValue::Null),
            ValueRef::Integer(v) => Ok(FieldValue::Integer(v)),
            ValueRef::Real(v) => Ok(FieldValue::Real(v)),
            ValueRef::Text(bytes) => Ok(FieldValue::String(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

/// Geometry plus field values ordered like the owning layer's schema.
///
/// `fid` is the positional identity assigned by a persistent layer (insertion order);
/// transient features have none.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub fid: Option<i64>,
    pub geometry: Geometry,
    pub values: Vec<FieldValue>,
}

impl Feature {
    pub fn new(geometry: Geometry, values: Vec<FieldValue>) -> Self {
        Self {
            fid: None,
            geometry,
            values,
        }
    }
}

/// Full options for a pipeline run (CLI, `.rastvec.toml` and library callers).
#[derive(Clone, Debug)]
pub struct Opts {
    /// Name of the output vector layer.
    pub layer_name: String,
    /// Name of the integer field holding each polygon's segment label.
    pub label_field: String,
    /// Label value written for the first segment; later segments follow on.
    pub start_label: u32,
    /// Layer creation options as `KEY=VALUE`, stored with the layer metadata.
    pub layer_options: Vec<String>,
    /// Mask image: only pixels whose first band is strictly positive are vectorized.
    pub mask: Option<PathBuf>,
    /// Spatial reference of the output. When None, the input image's (if any) is used.
    pub srs: Option<String>,
    /// Streaming tile side in pixels. None or 0 = derive from `ram_mb`, then whole image.
    pub tile_size: Option<usize>,
    /// RAM budget in megabytes used to derive the tile size when `tile_size` is unset.
    pub ram_mb: Option<u64>,
    /// Max per-band difference for two neighbouring pixels to share a segment.
    pub range_radius: f32,
    /// Minimum segment size in pixels. 0 disables the small-region merge stage.
    pub min_size: u32,
    /// Attribute filter (SQL `WHERE` expression) applied as the last stage.
    pub filter: Option<String>,
    /// Remove intermediate label maps after a successful run.
    pub cleanup: bool,
    /// Directory for intermediate files. Default: next to the output.
    pub tmp_dir: Option<PathBuf>,
    /// Worker threads for feature computation. None = rayon's thread count.
    pub num_threads: Option<usize>,
    /// Douglas–Peucker tolerance (map units) applied to polygons before commit.
    pub simplify: Option<f64>,
    /// Show progress bar and debug logs.
    pub verbose: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            layer_name: DEFAULT_LAYER_NAME.to_string(),
            label_field: LABEL_FIELD.to_string(),
            start_label: DEFAULT_START_LABEL,
            layer_options: Vec::new(),
            mask: None,
            srs: None,
            tile_size: None,
            ram_mb: None,
            range_radius: DEFAULT_RANGE_RADIUS,
            min_size: 0,
            filter: None,
            cleanup: true,
            tmp_dir: None,
            num_threads: None,
            simplify: None,
            verbose: false,
        }
    }
}

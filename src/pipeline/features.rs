//! Per-feature computations run by the threaded processor.

use anyhow::{Result, anyhow};
use std::f64::consts::PI;
use std::sync::Arc;

use crate::raster::{ImageRaster, LabelRaster};
use crate::streaming::FeatureComputation;
use crate::types::{Feature, FieldDefn, FieldType, FieldValue};
use crate::utils::config::NBPIXELS_FIELD;

pub const AREA_FIELD: &str = "area";
pub const PERIMETER_FIELD: &str = "perimeter";
pub const COMPACTNESS_FIELD: &str = "compactness";

/// Area and perimeter in map units; compactness = 4πA/P² (1 for a disc).
#[derive(Clone, Copy, Debug, Default)]
pub struct GeometricFeatures;

impl FeatureComputation for GeometricFeatures {
    fn fields(&self) -> Vec<FieldDefn> {
        vec![
            FieldDefn::new(AREA_FIELD, FieldType::Real),
            FieldDefn::new(PERIMETER_FIELD, FieldType::Real),
            FieldDefn::new(COMPACTNESS_FIELD, FieldType::Real),
        ]
    }

    fn compute(&self, feature: &Feature) -> Result<Vec<FieldValue>> {
        let area = feature.geometry.area();
        let perimeter = feature.geometry.perimeter();
        let compactness = if perimeter > 0.0 {
            4.0 * PI * area / (perimeter * perimeter)
        } else {
            0.0
        };
        Ok(vec![
            FieldValue::Real(area),
            FieldValue::Real(perimeter),
            FieldValue::Real(compactness),
        ])
    }
}

/// Pixel count plus per-band mean and variance of the image pixels that carry the feature's
/// label and lie inside its rings.
#[derive(Clone, Debug)]
pub struct SpectralFeatures {
    labels: Arc<LabelRaster>,
    image: Arc<ImageRaster>,
    label_index: usize,
    label_offset: i64,
}

pub fn mean_field(band: usize) -> String {
    format!("meanB{band}")
}

pub fn var_field(band: usize) -> String {
    format!("varB{band}")
}

impl SpectralFeatures {
    /// `label_index` is the position of the label field in the features' value list.
    pub fn new(labels: Arc<LabelRaster>, image: Arc<ImageRaster>, label_index: usize) -> Self {
        Self {
            labels,
            image,
            label_index,
            label_offset: 0,
        }
    }

    /// Label values were written shifted by `offset` from the raster labels.
    pub fn with_label_offset(mut self, offset: i64) -> Self {
        self.label_offset = offset;
        self
    }

    /// Schema for an image with `bands` bands.
    pub fn fields_for_bands(bands: usize) -> Vec<FieldDefn> {
        let mut fields = vec![FieldDefn::new(NBPIXELS_FIELD, FieldType::Integer)];
        for b in 0..bands {
            fields.push(FieldDefn::new(mean_field(b), FieldType::Real));
            fields.push(FieldDefn::new(var_field(b), FieldType::Real));
        }
        fields
    }
}

impl FeatureComputation for SpectralFeatures {
    fn fields(&self) -> Vec<FieldDefn> {
        Self::fields_for_bands(self.image.bands)
    }

    fn compute(&self, feature: &Feature) -> Result<Vec<FieldValue>> {
        let label = feature
            .values
            .get(self.label_index)
            .and_then(FieldValue::as_i64)
            .ok_or_else(|| anyhow!("feature {:?} has no label value", feature.fid))?
            - self.label_offset;
        let bands = self.image.bands;
        let mut count = 0u64;
        let mut sum = vec![0.0f64; bands];
        let mut sum_sq = vec![0.0f64; bands];

        if let Some((x0, y0, x1, y1)) = feature.geometry.bbox() {
            let geo = self.labels.geo;
            let a = geo.invert(x0, y0);
            let b = geo.invert(x1, y1);
            let clamp = |v: f64, max: usize| v.max(0.0).min(max as f64) as usize;
            let (w, h) = (self.labels.width, self.labels.height);
            let (cx0, cx1) = (clamp(a[0].min(b[0]).floor(), w), clamp(a[0].max(b[0]).ceil(), w));
            let (cy0, cy1) = (clamp(a[1].min(b[1]).floor(), h), clamp(a[1].max(b[1]).ceil(), h));
            for y in cy0..cy1 {
                for x in cx0..cx1 {
                    if i64::from(self.labels.get(x, y)) != label {
                        continue;
                    }
                    let [mx, my] = geo.apply(x as f64 + 0.5, y as f64 + 0.5);
                    if !feature.geometry.contains(mx, my) {
                        continue;
                    }
                    count += 1;
                    for (k, v) in self.image.pixel(x, y).iter().enumerate() {
                        let v = f64::from(*v);
                        sum[k] += v;
                        sum_sq[k] += v * v;
                    }
                }
            }
        }

        let mut values = Vec::with_capacity(1 + 2 * bands);
        values.push(FieldValue::Integer(count as i64));
        for k in 0..bands {
            if count == 0 {
                values.push(FieldValue::Null);
                values.push(FieldValue::Null);
                continue;
            }
            let n = count as f64;
            let mean = sum[k] / n;
            let var = (sum_sq[k] / n - mean * mean).max(0.0);
            values.push(FieldValue::Real(mean));
            values.push(FieldValue::Real(var));
        }
        Ok(values)
    }
}

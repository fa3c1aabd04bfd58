use anyhow::Result;

use crate::error::RastvecError;
use crate::types::{Feature, FieldDefn, GeometryType, SpatialRef};

use super::layer::check_value;

/// In-memory feature collection holding one tile's polygons. Never persisted directly.
#[derive(Clone, Debug)]
pub struct MemoryLayer {
    pub name: String,
    pub srs: SpatialRef,
    pub geometry_type: GeometryType,
    pub fields: Vec<FieldDefn>,
    features: Vec<Feature>,
}

impl MemoryLayer {
    pub fn new(
        name: impl Into<String>,
        srs: SpatialRef,
        geometry_type: GeometryType,
        fields: Vec<FieldDefn>,
    ) -> Self {
        Self {
            name: name.into(),
            srs,
            geometry_type,
            fields,
            features: Vec::new(),
        }
    }

    /// Append a feature; its fid becomes its insertion index.
    pub fn create_feature(&mut self, mut feature: Feature) -> Result<()> {
        if feature.values.len() != self.fields.len() {
            return Err(RastvecError::config(format!(
                "memory layer {}: feature has {} values, schema has {} fields",
                self.name,
                feature.values.len(),
                self.fields.len()
            ))
            .into());
        }
        for (field, value) in self.fields.iter().zip(&feature.values) {
            check_value(&self.name, field, value)?;
        }
        feature.fid = Some(self.features.len() as i64);
        self.features.push(feature);
        Ok(())
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn retain<F: FnMut(&Feature) -> bool>(&mut self, f: F) {
        self.features.retain(f);
    }

    pub fn features_mut(&mut self) -> &mut [Feature] {
        &mut self.features
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }
}

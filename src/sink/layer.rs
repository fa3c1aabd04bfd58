//! Layer descriptors and the write transaction over a data source.

use anyhow::{Context, Result};
use rusqlite::{Transaction, params_from_iter};

use crate::error::RastvecError;
use crate::types::{Feature, FieldDefn, FieldValue, GeometryType, SpatialRef};

use super::datasource::LayerOptions;
use super::{FID_COLUMN, GEOMETRY_COLUMN, quote_ident};

/// Persistent layer: name, spatial reference, geometry type and ordered field schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub name: String,
    pub table_name: String,
    /// Index of the layer in creation order.
    pub position: usize,
    pub srs: SpatialRef,
    pub geometry_type: GeometryType,
    pub options: LayerOptions,
    pub fields: Vec<FieldDefn>,
}

impl Layer {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub(crate) fn select_sql(&self) -> String {
        let mut cols = vec![FID_COLUMN.to_string(), GEOMETRY_COLUMN.to_string()];
        cols.extend(self.fields.iter().map(|f| quote_ident(&f.name)));
        format!(
            "SELECT {} FROM {} ORDER BY {}",
            cols.join(", "),
            quote_ident(&self.table_name),
            FID_COLUMN
        )
    }

    fn insert_sql(&self) -> String {
        let mut cols = vec![GEOMETRY_COLUMN.to_string()];
        cols.extend(self.fields.iter().map(|f| quote_ident(&f.name)));
        let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table_name),
            cols.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Reject a value the field's type cannot hold before SQLite's type affinity stores it anyway.
pub(crate) fn check_value(
    layer: &str,
    field: &FieldDefn,
    value: &FieldValue,
) -> Result<(), RastvecError> {
    if field.field_type.accepts(value) {
        return Ok(());
    }
    Err(RastvecError::config(format!(
        "layer {layer}: field {} is {}, got a {} value",
        field.name,
        field.field_type.as_str(),
        value.type_name()
    )))
}

/// Open write transaction. Dropping it without [`SinkTransaction::commit`] rolls back.
pub struct SinkTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> SinkTransaction<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>) -> Self {
        Self { tx }
    }

    /// Append a feature; returns its fid. Values must follow the layer's field order.
    pub fn create_feature(&mut self, layer: &Layer, feature: &Feature) -> Result<i64> {
        if feature.values.len() != layer.fields.len() {
            return Err(RastvecError::config(format!(
                "layer {}: feature has {} values, schema has {} fields",
                layer.name,
                feature.values.len(),
                layer.fields.len()
            ))
            .into());
        }
        for (field, value) in layer.fields.iter().zip(&feature.values) {
            check_value(&layer.name, field, value)?;
        }
        let geometry = feature.geometry.to_json().context("encode geometry")?;
        let mut values = Vec::with_capacity(feature.values.len() + 1);
        values.push(FieldValue::String(geometry));
        values.extend(feature.values.iter().cloned());

        let mut stmt = self
            .tx
            .prepare_cached(&layer.insert_sql())
            .with_context(|| format!("prepare insert into {}", layer.name))?;
        stmt.execute(params_from_iter(values.iter()))
            .with_context(|| format!("insert feature into {}", layer.name))?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Set `values` on the named fields of feature `fid`.
    pub fn update_fields(
        &mut self,
        layer: &Layer,
        fid: i64,
        names: &[&str],
        values: &[FieldValue],
    ) -> Result<()> {
        if names.len() != values.len() {
            return Err(RastvecError::config(format!(
                "update of {}: {} names for {} values",
                layer.name,
                names.len(),
                values.len()
            ))
            .into());
        }
        if names.is_empty() {
            return Ok(());
        }
        for (name, value) in names.iter().zip(values) {
            let field = layer
                .field_index(name)
                .map(|i| &layer.fields[i])
                .ok_or_else(|| {
                    RastvecError::config(format!("layer {}: no field {name}", layer.name))
                })?;
            check_value(&layer.name, field, value)?;
        }
        let sets: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, n)| format!("{} = ?{}", quote_ident(n), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_ident(&layer.table_name),
            sets.join(", "),
            FID_COLUMN,
            names.len() + 1
        );
        let mut params: Vec<FieldValue> = values.to_vec();
        params.push(FieldValue::Integer(fid));
        let mut stmt = self.tx.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(params.iter()))
            .with_context(|| format!("update feature {fid} of {}", layer.name))?;
        Ok(())
    }

    /// Delete every feature for which `expression` is not true. Returns the number removed.
    pub(crate) fn delete_not_matching(&mut self, layer: &Layer, expression: &str) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE NOT COALESCE(({}), 0)",
            quote_ident(&layer.table_name),
            expression
        );
        let removed = self
            .tx
            .execute(&sql, [])
            .with_context(|| format!("filter layer {}", layer.name))?;
        Ok(removed)
    }

    pub fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .map_err(|e| RastvecError::Transaction(format!("commit transaction: {e}")).into())
    }
}

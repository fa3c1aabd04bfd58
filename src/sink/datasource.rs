//! Open the sink database and manage its layers.

use anyhow::{Context, Result};
use log::debug;
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::RastvecError;
use crate::geometry::Geometry;
use crate::types::{Feature, FieldDefn, FieldType, FieldValue, GeometryType, SpatialRef};

use super::handles::HandleGuard;
use super::layer::{Layer, SinkTransaction};
use super::{FID_COLUMN, GEOMETRY_COLUMN, SCHEMA, WAL_PRAGMAS, is_valid_identifier, quote_ident};

/// How a data source is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Enumerate layers and features only. The file must exist.
    ReadOnly,
    /// Read and write an existing data source.
    Update,
    /// Delete any existing file and start an empty data source.
    Overwrite,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

/// Format-specific layer creation options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerOptions {
    /// Drop and recreate the layer if it already exists.
    #[serde(default)]
    pub overwrite: bool,
    /// Free-form `KEY=VALUE` options stored with the layer metadata.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl LayerOptions {
    /// Parse `KEY=VALUE` pairs into `extra`. Keys are upper-cased; a later pair wins.
    pub fn from_pairs(pairs: &[String]) -> Result<Self, RastvecError> {
        let mut extra = BTreeMap::new();
        for pair in pairs {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(RastvecError::config(format!(
                    "layer option {pair:?} is not KEY=VALUE"
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(RastvecError::config(format!(
                    "layer option {pair:?} has an empty key"
                )));
            }
            extra.insert(key.to_ascii_uppercase(), value.trim().to_string());
        }
        Ok(Self {
            overwrite: false,
            extra,
        })
    }
}

/// Layer lookup key for [`DataSource::get_layer`].
#[derive(Clone, Copy, Debug)]
pub enum LayerRef<'a> {
    Name(&'a str),
    Index(usize),
}

/// SQLite-backed vector data source.
///
/// Field order matters: the connection is closed before the handle registration is released.
pub struct DataSource {
    conn: Connection,
    path: Option<PathBuf>,
    mode: OpenMode,
    _guard: Option<HandleGuard>,
}

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// Remove SQLite WAL and SHM files left next to `path`.
fn remove_wal_and_shm(path: &Path) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let parent = path.parent().unwrap_or(Path::new("."));
    let _ = std::fs::remove_file(parent.join(format!("{file_name}-wal")));
    let _ = std::fs::remove_file(parent.join(format!("{file_name}-shm")));
}

fn check_schema_present(conn: &Connection, path: &Path) -> Result<()> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('layers', 'layer_fields')",
            [],
            |row| row.get(0),
        )
        .with_context(|| format!("read schema of {}", path.display()))?;
    if n != 2 {
        return Err(RastvecError::config(format!(
            "{} is not a vector data source (missing layer metadata)",
            path.display()
        ))
        .into());
    }
    Ok(())
}

impl DataSource {
    /// Open the data source at `path` in `mode`. The handle registration is taken before the
    /// file is touched, so a lifetime violation never mutates anything.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let guard = HandleGuard::acquire(path, mode.is_writable())?;
        let conn = match mode {
            OpenMode::ReadOnly => {
                if !path.exists() {
                    return Err(RastvecError::config(format!(
                        "data source {} does not exist",
                        path.display()
                    ))
                    .into());
                }
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .with_context(|| format!("open {} read-only", path.display()))?;
                check_schema_present(&conn, path)?;
                conn
            }
            OpenMode::Update => {
                if !path.exists() {
                    return Err(RastvecError::config(format!(
                        "data source {} does not exist",
                        path.display()
                    ))
                    .into());
                }
                let conn = Connection::open(path)
                    .with_context(|| format!("open {} for update", path.display()))?;
                check_schema_present(&conn, path)?;
                apply_wal_and_schema(&conn)?;
                conn
            }
            OpenMode::Overwrite => {
                if path.exists() {
                    std::fs::remove_file(path)
                        .with_context(|| format!("remove existing {}", path.display()))?;
                }
                remove_wal_and_shm(path);
                let conn = Connection::open(path)
                    .with_context(|| format!("create {}", path.display()))?;
                apply_wal_and_schema(&conn)?;
                conn
            }
        };
        debug!("Opened {} ({:?})", path.display(), mode);
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            mode,
            _guard: Some(guard),
        })
    }

    /// Open an in-memory data source with the same schema (tests, scratch layers).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        conn.execute_batch(SCHEMA).context("create schema")?;
        Ok(Self {
            conn,
            path: None,
            mode: OpenMode::Overwrite,
            _guard: None,
        })
    }

    /// Close the data source. Writable file-backed sources checkpoint their WAL first.
    pub fn close(self) -> Result<()> {
        if self.mode.is_writable() && self.path.is_some() {
            self.conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .context("WAL checkpoint")?;
        }
        if let Some(p) = &self.path {
            debug!("Closed {}", p.display());
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn ensure_writable(&self, what: &str) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(RastvecError::config(format!(
                "cannot {what}: data source is opened read-only"
            ))
            .into());
        }
        Ok(())
    }

    pub fn layer_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM layers", [], |row| row.get(0))
            .context("count layers")?;
        Ok(n.max(0) as usize)
    }

    /// Layer names in creation order.
    pub fn layer_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM layers ORDER BY position")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Whether a layer of that name exists, ignoring ASCII case.
    pub fn has_layer(&self, name: &str) -> Result<bool> {
        Ok(self.stored_layer_name(name)?.is_some())
    }

    /// Create a layer with an empty schema. Fails when the layer exists unless
    /// `options.overwrite` is set, in which case the old layer is dropped first.
    pub fn create_layer(
        &mut self,
        name: &str,
        srs: &SpatialRef,
        geometry_type: GeometryType,
        options: &LayerOptions,
    ) -> Result<Layer> {
        self.create_layer_with_fields(name, srs, geometry_type, options, &[])
    }

    /// Create a layer together with its whole field schema. Names are checked up front and
    /// the metadata, table and columns are written in one transaction, so a rejected schema
    /// leaves the data source untouched. Layer names are case-insensitive.
    pub fn create_layer_with_fields(
        &mut self,
        name: &str,
        srs: &SpatialRef,
        geometry_type: GeometryType,
        options: &LayerOptions,
        fields: &[FieldDefn],
    ) -> Result<Layer> {
        self.ensure_writable("create layer")?;
        if !is_valid_identifier(name) {
            return Err(RastvecError::config(format!("invalid layer name {name:?}")).into());
        }
        for (i, field) in fields.iter().enumerate() {
            if !is_valid_identifier(&field.name) {
                return Err(
                    RastvecError::config(format!("invalid field name {:?}", field.name)).into(),
                );
            }
            if fields[..i]
                .iter()
                .any(|f| f.name.eq_ignore_ascii_case(&field.name))
            {
                return Err(RastvecError::config(format!(
                    "layer {name}: field {} declared twice",
                    field.name
                ))
                .into());
            }
        }
        let existing = self.stored_layer_name(name)?;
        if let Some(existing) = &existing
            && !options.overwrite
        {
            return Err(RastvecError::config(format!(
                "layer {name:?} collides with existing layer {existing:?} (set overwrite to recreate it)"
            ))
            .into());
        }

        let table_name = format!("layer_{}", name.to_ascii_lowercase());
        let options_json = serde_json::to_string(options).context("encode layer options")?;
        let tx = self.conn.transaction().context("begin transaction")?;
        if let Some(existing) = &existing {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(&table_name)))?;
            tx.execute("DELETE FROM layer_fields WHERE layer = ?1", [existing])?;
            tx.execute("DELETE FROM layers WHERE name = ?1", [existing])?;
            debug!("Dropped layer {existing} for overwrite");
        }
        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM layers",
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO layers (name, position, table_name, srs, geometry_type, options) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                name,
                position,
                table_name,
                srs.as_str(),
                geometry_type.as_str(),
                options_json
            ],
        )
        .context("insert layer metadata")?;
        let mut columns = vec![
            format!("{FID_COLUMN} INTEGER PRIMARY KEY AUTOINCREMENT"),
            format!("{GEOMETRY_COLUMN} TEXT NOT NULL"),
        ];
        columns.extend(
            fields
                .iter()
                .map(|f| format!("{} {}", quote_ident(&f.name), f.field_type.sql_type())),
        );
        tx.execute_batch(&format!(
            "CREATE TABLE {} ({});",
            quote_ident(&table_name),
            columns.join(", ")
        ))
        .context("create layer table")?;
        for (i, field) in fields.iter().enumerate() {
            insert_field_row(&tx, name, i, field)?;
        }
        tx.commit().context("commit transaction")?;
        debug!(
            "Created layer {name} ({table_name}, srs {srs}, {} field(s))",
            fields.len()
        );

        Ok(Layer {
            name: name.to_string(),
            table_name,
            position: position.max(0) as usize,
            srs: srs.clone(),
            geometry_type,
            options: options.clone(),
            fields: fields.to_vec(),
        })
    }

    /// Stored spelling of the layer matching `name` case-insensitively.
    fn stored_layer_name(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT name FROM layers WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()
            .context("look up layer")
    }

    /// Drop a layer, its table and its field metadata.
    pub fn delete_layer(&mut self, name: &str) -> Result<()> {
        self.ensure_writable("delete layer")?;
        let layer = self.get_layer(LayerRef::Name(name))?;
        let tx = self.conn.transaction().context("begin transaction")?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};",
            quote_ident(&layer.table_name)
        ))?;
        tx.execute("DELETE FROM layer_fields WHERE layer = ?1", [name])?;
        tx.execute("DELETE FROM layers WHERE name = ?1", [name])?;
        tx.commit().context("commit transaction")?;
        Ok(())
    }

    pub fn get_layer(&self, layer: LayerRef<'_>) -> Result<Layer> {
        let row = match layer {
            LayerRef::Name(name) => self
                .conn
                .query_row(
                    "SELECT name, position, table_name, srs, geometry_type, options FROM layers WHERE name = ?1",
                    [name],
                    read_layer_row,
                )
                .optional()?,
            LayerRef::Index(idx) => self
                .conn
                .query_row(
                    "SELECT name, position, table_name, srs, geometry_type, options FROM layers ORDER BY position LIMIT 1 OFFSET ?1",
                    [idx as i64],
                    read_layer_row,
                )
                .optional()?,
        };
        let Some((name, position, table_name, srs, geometry_type, options)) = row else {
            return Err(RastvecError::config(format!("no such layer: {layer:?}")).into());
        };
        let options: LayerOptions = serde_json::from_str(&options)
            .with_context(|| format!("decode options of layer {name}"))?;
        let fields = self.load_fields(&name)?;
        Ok(Layer {
            name,
            table_name,
            position: position.max(0) as usize,
            srs: srs.map(SpatialRef::new).unwrap_or_default(),
            geometry_type: GeometryType::from_str_lossy(&geometry_type),
            options,
            fields,
        })
    }

    fn load_fields(&self, layer: &str) -> Result<Vec<FieldDefn>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, field_type, width, precision FROM layer_fields WHERE layer = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map([layer], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut fields = Vec::new();
        for row in rows {
            let (name, field_type, width, precision) = row?;
            let field_type = FieldType::from_str_lossy(&field_type).ok_or_else(|| {
                RastvecError::config(format!(
                    "layer {layer}: field {name} has unknown type {field_type}"
                ))
            })?;
            fields.push(FieldDefn {
                name,
                field_type,
                width: width.max(0) as u32,
                precision: precision.max(0) as u32,
            });
        }
        Ok(fields)
    }

    /// Append a field to the layer schema (table column + metadata row).
    pub fn create_field(&mut self, layer: &mut Layer, field: FieldDefn) -> Result<()> {
        self.ensure_writable("create field")?;
        if !is_valid_identifier(&field.name) {
            return Err(RastvecError::config(format!("invalid field name {:?}", field.name)).into());
        }
        if layer
            .fields
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(&field.name))
        {
            return Err(RastvecError::config(format!(
                "layer {}: field {} already exists",
                layer.name, field.name
            ))
            .into());
        }
        let tx = self.conn.transaction().context("begin transaction")?;
        tx.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            quote_ident(&layer.table_name),
            quote_ident(&field.name),
            field.field_type.sql_type()
        ))
        .context("add field column")?;
        insert_field_row(&tx, &layer.name, layer.fields.len(), &field)?;
        tx.commit().context("commit transaction")?;
        layer.fields.push(field);
        Ok(())
    }

    /// Open a write transaction holding the write lock from the start. Dropping the returned
    /// value without `commit` rolls back.
    pub fn begin_transaction(&mut self) -> Result<SinkTransaction<'_>> {
        self.ensure_writable("begin transaction")?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| RastvecError::Transaction(format!("begin transaction: {e}")))?;
        Ok(SinkTransaction::new(tx))
    }

    pub fn feature_count(&self, layer: &Layer) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&layer.table_name)),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("count features of layer {}", layer.name))?;
        Ok(n.max(0) as usize)
    }

    /// Visit every feature of `layer` in insertion order without collecting them.
    pub fn for_each_feature<F>(&self, layer: &Layer, mut f: F) -> Result<()>
    where
        F: FnMut(Feature) -> Result<()>,
    {
        let mut stmt = self.conn.prepare(&layer.select_sql())?;
        let n_fields = layer.fields.len();
        let rows = stmt.query_map([], |row| read_feature_row(row, n_fields))?;
        for row in rows {
            f(row?)?;
        }
        Ok(())
    }

    /// All features of `layer` in insertion order.
    pub fn features(&self, layer: &Layer) -> Result<Vec<Feature>> {
        let mut out = Vec::new();
        self.for_each_feature(layer, |feat| {
            out.push(feat);
            Ok(())
        })?;
        Ok(out)
    }

    /// Number of features matching an attribute filter (SQL `WHERE` expression over field names).
    /// An expression SQLite cannot compile is a configuration error.
    pub fn count_matching(&self, layer: &Layer, expression: &str) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE ({})",
            quote_ident(&layer.table_name),
            expression
        );
        let mut stmt = self.conn.prepare(&sql).map_err(|e| {
            RastvecError::config(format!("invalid filter expression {expression:?}: {e}"))
        })?;
        let n: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// Keep only the features matching `expression`; returns how many were removed.
    /// The expression is validated before anything is deleted.
    pub fn apply_attribute_filter(&mut self, layer: &Layer, expression: &str) -> Result<usize> {
        self.ensure_writable("filter layer")?;
        let _ = self.count_matching(layer, expression)?;
        let mut tx = self.begin_transaction()?;
        let removed = tx.delete_not_matching(layer, expression)?;
        tx.commit()?;
        Ok(removed)
    }
}

fn insert_field_row(
    tx: &rusqlite::Transaction<'_>,
    layer: &str,
    position: usize,
    field: &FieldDefn,
) -> Result<()> {
    tx.execute(
        "INSERT INTO layer_fields (layer, position, name, field_type, width, precision) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            layer,
            position as i64,
            field.name,
            field.field_type.as_str(),
            field.width as i64,
            field.precision as i64
        ],
    )
    .context("insert field metadata")?;
    Ok(())
}

type LayerRow = (String, i64, String, Option<String>, String, String);

fn read_layer_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LayerRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn read_feature_row(row: &rusqlite::Row<'_>, n_fields: usize) -> rusqlite::Result<Feature> {
    let fid: i64 = row.get(0)?;
    let geometry_json: String = row.get(1)?;
    let geometry = Geometry::from_json(&geometry_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let mut values = Vec::with_capacity(n_fields);
    for i in 0..n_fields {
        values.push(row.get::<_, FieldValue>(i + 2)?);
    }
    Ok(Feature {
        fid: Some(fid),
        geometry,
        values,
    })
}

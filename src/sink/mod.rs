//! Vector sink: SQLite data source with named layers, typed fields and transactions.

mod datasource;
mod handles;
mod layer;
mod memory;

pub use datasource::{DataSource, LayerOptions, LayerRef, OpenMode};
pub use handles::open_handle_counts;
pub use layer::{Layer, SinkTransaction};
pub use memory::MemoryLayer;

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Metadata tables: one row per layer, one row per field (ordered by position).
/// Layer names compare case-insensitively, like the table names derived from them.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS layers (
    name TEXT PRIMARY KEY COLLATE NOCASE,
    position INTEGER NOT NULL UNIQUE,
    table_name TEXT NOT NULL,
    srs TEXT,
    geometry_type TEXT NOT NULL,
    options TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS layer_fields (
    layer TEXT NOT NULL COLLATE NOCASE,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    field_type TEXT NOT NULL,
    width INTEGER NOT NULL,
    precision INTEGER NOT NULL,
    PRIMARY KEY (layer, position)
);
"#;

/// Column holding the JSON-encoded geometry in every layer table.
pub(crate) const GEOMETRY_COLUMN: &str = "geometry";

/// Column holding the positional feature id in every layer table.
pub(crate) const FID_COLUMN: &str = "fid";

/// Layer and field names must be plain identifiers; they become table / column names.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.eq_ignore_ascii_case(GEOMETRY_COLUMN)
        && !name.eq_ignore_ascii_case(FID_COLUMN)
}

/// Double-quote an identifier for SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

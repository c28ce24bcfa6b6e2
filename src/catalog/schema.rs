//! SQL DDL for the catalog metadata database.
//!
//! Defines the `products` table and the `catalog_meta` key/value table. All DDL
//! uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    image_path TEXT NOT NULL,
    metadata TEXT,
    indexed_at TEXT NOT NULL
);

-- Build provenance: embedding_model, dimension, built_at
CREATE TABLE IF NOT EXISTS catalog_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Create all tables if they don't exist.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    tracing::debug!("catalog schema initialized");
    Ok(())
}

//! Catalog metadata store.
//!
//! Display metadata for every catalog item lives in SQLite, keyed by the same
//! identifiers the indexes return. The store is rewritten wholesale by the
//! offline build and only read while serving.

pub mod manifest;
pub mod schema;
pub mod types;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use types::CatalogItem;

/// Open (or create) the catalog database at the given path with the schema initialized.
pub fn open_catalog(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open catalog at {}", path.display()))?;

    // WAL lets the serving process read while a build rewrites the catalog.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;

    schema::init_schema(&conn).context("failed to initialize catalog schema")?;

    tracing::info!(path = %path.display(), "catalog opened");
    Ok(conn)
}

/// Open an in-memory catalog (tests and dry runs).
pub fn open_memory_catalog() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory catalog")?;
    schema::init_schema(&conn).context("failed to initialize catalog schema")?;
    Ok(conn)
}

/// Replace every product in one transaction and record build provenance.
pub fn replace_all(
    conn: &mut Connection,
    items: &[CatalogItem],
    embedding_model: &str,
    dimension: usize,
) -> Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM products", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO products (id, name, image_path, metadata, indexed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for item in items {
            let metadata = item.metadata.as_ref().map(|m| m.to_string());
            stmt.execute(params![item.id, item.name, item.image_path, metadata, now])
                .with_context(|| format!("failed to insert catalog item {}", item.id))?;
        }
    }

    set_meta(&tx, "embedding_model", embedding_model)?;
    set_meta(&tx, "dimension", &dimension.to_string())?;
    set_meta(&tx, "built_at", &now)?;
    tx.commit()?;

    tracing::info!(items = items.len(), "catalog metadata replaced");
    Ok(items.len())
}

/// Fetch metadata for the given ids. Unknown ids are simply absent from the map.
pub fn lookup(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, CatalogItem>> {
    let mut map = HashMap::with_capacity(ids.len());
    if ids.is_empty() {
        return Ok(map);
    }

    let placeholders: String = (1..=ids.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT id, name, image_path, metadata FROM products WHERE id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_item)?;
    for row in rows {
        let item = row?;
        map.insert(item.id.clone(), item);
    }
    Ok(map)
}

/// Every product, ordered by id.
pub fn all_items(conn: &Connection) -> Result<Vec<CatalogItem>> {
    let mut stmt =
        conn.prepare("SELECT id, name, image_path, metadata FROM products ORDER BY id")?;
    let items = stmt
        .query_map([], row_to_item)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn count(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
    Ok(n as usize)
}

pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM catalog_meta WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO catalog_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogItem> {
    let metadata: Option<String> = row.get(3)?;
    Ok(CatalogItem {
        id: row.get(0)?,
        name: row.get(1)?,
        image_path: row.get(2)?,
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

/// Shared, read-mostly handle used by the search path.
///
/// SQLite calls run on the blocking pool.
#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Warn when the catalog was built with a different model or dimension.
    pub fn check_provenance(&self, model: &str, dimension: usize) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("catalog lock poisoned: {e}"))?;

        if let Some(stored) = get_meta(&conn, "embedding_model")? {
            if stored != model {
                tracing::warn!(
                    stored = %stored,
                    configured = %model,
                    "embedding model changed, run `imsearch index build` to re-embed the catalog"
                );
            }
        }
        if let Some(stored) = get_meta(&conn, "dimension")? {
            anyhow::ensure!(
                stored == dimension.to_string(),
                "catalog was built with dimension {stored}, configured embedding.dimension is {dimension}"
            );
        }
        Ok(())
    }

    pub async fn lookup(&self, ids: Vec<String>) -> Result<HashMap<String, CatalogItem>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("catalog lock poisoned: {e}"))?;
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            lookup(&conn, &refs)
        })
        .await
        .context("catalog lookup task failed")?
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("catalog lock poisoned: {e}"))?;
        count(&conn)
    }
}

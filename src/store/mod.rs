//! Store catalog persistence.
//!
//! The catalog lives in a small SQLite database: categories and the items
//! they contain, each item tagged with the aisle it is shelved in. The
//! item names double as the recognition vocabulary for the ASR prompt.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use log::debug;
use rusqlite::Connection;

pub mod search;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    aisle TEXT NOT NULL,
    category_id INTEGER REFERENCES categories(id)
);

CREATE INDEX IF NOT EXISTS idx_items_category ON items(category_id);
"#;

/// A category of the store catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// A single shelved item. The aisle is stored as text because some stores
/// label aisles "12B"; numeric aisles are extracted where needed.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: String,
    pub aisle: String,
}

/// Catalog database wrapper.
#[derive(Clone)]
pub struct StoreDb {
    conn: Arc<Mutex<Connection>>,
}

impl StoreDb {
    /// Open or create the catalog database at a specific path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store dir: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store db: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        debug!("Store database opened at {}", path.display());
        Self::init(conn)
    }

    /// Open a throwaway in-memory catalog.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("Store DB lock poisoned")
    }

    /// All categories, sorted by name.
    pub fn categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Items belonging to a category, sorted by name.
    pub fn items_in_category(&self, category_id: i64) -> Result<Vec<Item>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, aisle FROM items WHERE category_id = ?1 ORDER BY name ASC",
        )?;
        let rows = stmt.query_map([category_id], |row| {
            Ok(Item {
                name: row.get(0)?,
                aisle: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every item in the store, sorted by name.
    pub fn all_items(&self) -> Result<Vec<Item>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name, aisle FROM items ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Item {
                name: row.get(0)?,
                aisle: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Lower-cased, deduplicated item names, empties dropped.
    ///
    /// This is the recognition vocabulary: it biases the model towards the
    /// things a shopper can actually ask for.
    pub fn item_names(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM items")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let names: BTreeSet<String> = rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Highest numeric aisle in the catalog, or `default` when the catalog
    /// is empty or has no positive numeric aisles.
    pub fn max_aisle(&self, default: u32) -> Result<u32> {
        let conn = self.conn();
        // Junk rows cast to 0 or negative, so read signed and fall back
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(CAST(aisle AS INTEGER)) FROM items",
            [],
            |row| row.get(0),
        )?;
        Ok(match max {
            Some(aisle) if aisle > 0 => u32::try_from(aisle).unwrap_or(default),
            _ => default,
        })
    }

    /// Insert a category, returning its id.
    pub fn add_category(&self, name: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert an item into a category.
    pub fn add_item(&self, name: &str, aisle: &str, category_id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO items (name, aisle, category_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, aisle, category_id],
        )?;
        Ok(())
    }
}

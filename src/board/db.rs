use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use super::models::{Axis, AxisOrders, GroupKey, Item, ItemId, Relations, Schema, TableSchema};
use super::position::Slot;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. One closure holds the lock for
/// its whole duration, so a read-compute-write sequence inside a single call
/// never interleaves with another request.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS table_schemas (
                    name TEXT PRIMARY KEY,
                    fields TEXT NOT NULL DEFAULT '[]',
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    table_name TEXT NOT NULL,
                    attributes TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS axis_orders (
                    board TEXT NOT NULL,
                    axis TEXT NOT NULL,
                    key_order TEXT NOT NULL DEFAULT '[]',
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (board, axis)
                );

                CREATE INDEX IF NOT EXISTS idx_records_table ON records(table_name);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Table schemas ─────────────────────────────────────────────────

    pub fn upsert_table_schema(&self, table: &TableSchema) -> Result<()> {
        let fields = serde_json::to_string(&table.fields).context("Failed to encode fields")?;
        self.conn
            .execute(
                "INSERT INTO table_schemas (name, fields, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(name) DO UPDATE SET
                     fields = excluded.fields,
                     updated_at = datetime('now')",
                params![table.name, fields],
            )
            .context("Failed to upsert table schema")?;
        Ok(())
    }

    pub fn load_schema(&self) -> Result<Schema> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, fields FROM table_schemas ORDER BY name")
            .context("Failed to prepare load_schema")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SchemaRow {
                    name: row.get(0)?,
                    fields: row.get(1)?,
                })
            })
            .context("Failed to query table schemas")?;
        let mut schema = Schema::default();
        for row in rows {
            schema.insert(row.context("Failed to read schema row")?.into_table()?);
        }
        Ok(schema)
    }

    // ── Records ───────────────────────────────────────────────────────

    pub fn insert_record(&self, table: &str, attributes: &Map<String, Value>) -> Result<Item> {
        let json = serde_json::to_string(attributes).context("Failed to encode attributes")?;
        self.conn
            .execute(
                "INSERT INTO records (table_name, attributes) VALUES (?1, ?2)",
                params![table, json],
            )
            .context("Failed to insert record")?;
        let id = self.conn.last_insert_rowid();
        self.get_record(table, id)?
            .context("Record not found after insert")
    }

    pub fn get_record(&self, table: &str, id: ItemId) -> Result<Option<Item>> {
        self.conn
            .query_row(
                "SELECT id, attributes FROM records WHERE table_name = ?1 AND id = ?2",
                params![table, id],
                |row| {
                    Ok(RecordRow {
                        id: row.get(0)?,
                        attributes: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query record")?
            .map(RecordRow::into_item)
            .transpose()
    }

    /// All records of a table in id order.
    pub fn list_records(&self, table: &str) -> Result<Vec<Item>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, attributes FROM records WHERE table_name = ?1 ORDER BY id")
            .context("Failed to prepare list_records")?;
        let rows = stmt
            .query_map(params![table], |row| {
                Ok(RecordRow {
                    id: row.get(0)?,
                    attributes: row.get(1)?,
                })
            })
            .context("Failed to query records")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read record row")?.into_item()?);
        }
        Ok(items)
    }

    /// Merge `patch` into a record's attributes. Returns the updated record,
    /// or `None` if it does not exist.
    pub fn update_record(
        &self,
        table: &str,
        id: ItemId,
        patch: &Map<String, Value>,
    ) -> Result<Option<Item>> {
        let Some(mut item) = self.get_record(table, id)? else {
            return Ok(None);
        };
        for (k, v) in patch {
            item.set(k, v.clone());
        }
        self.write_attributes(id, &item.attributes)?;
        Ok(Some(item))
    }

    /// Rewrite one position field for several records in one transaction.
    pub fn set_positions(&self, table: &str, field: &str, slots: &[Slot]) -> Result<()> {
        if slots.is_empty() {
            return Ok(());
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin position transaction")?;
        for slot in slots {
            if let Some(mut item) = self.get_record(table, slot.id)? {
                item.set(field, Value::from(slot.position));
                self.write_attributes(slot.id, &item.attributes)?;
            }
        }
        tx.commit().context("Failed to commit positions")?;
        Ok(())
    }

    fn write_attributes(&self, id: ItemId, attributes: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_string(attributes).context("Failed to encode attributes")?;
        self.conn
            .execute(
                "UPDATE records SET attributes = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![json, id],
            )
            .context("Failed to update record")?;
        Ok(())
    }

    pub fn delete_record(&self, table: &str, id: ItemId) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
                params![table, id],
            )
            .context("Failed to delete record")?;
        Ok(affected > 0)
    }

    pub fn count_records(&self, table: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE table_name = ?1",
                params![table],
                |row| row.get(0),
            )
            .context("Failed to count records")
    }

    /// Snapshot of every row of the given tables.
    pub fn load_relations(&self, tables: &[String]) -> Result<Relations> {
        let mut relations = Relations::default();
        for table in tables {
            relations.insert_rows(table, self.list_records(table)?);
        }
        Ok(relations)
    }

    // ── Axis orders ───────────────────────────────────────────────────

    pub fn get_axis_order(&self, board: &str, axis: Axis) -> Result<Vec<GroupKey>> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT key_order FROM axis_orders WHERE board = ?1 AND axis = ?2",
                params![board, axis.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query axis order")?;
        match stored {
            Some(json) => serde_json::from_str(&json).context("Failed to parse axis order JSON"),
            None => Ok(Vec::new()),
        }
    }

    pub fn load_orders(&self, board: &str) -> Result<AxisOrders> {
        Ok(AxisOrders {
            column: self.get_axis_order(board, Axis::Column)?,
            row: self.get_axis_order(board, Axis::Row)?,
        })
    }

    pub fn set_axis_order(&self, board: &str, axis: Axis, order: &[GroupKey]) -> Result<()> {
        let json = serde_json::to_string(order).context("Failed to encode axis order")?;
        self.conn
            .execute(
                "INSERT INTO axis_orders (board, axis, key_order, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(board, axis) DO UPDATE SET
                     key_order = excluded.key_order,
                     updated_at = datetime('now')",
                params![board, axis.as_str(), json],
            )
            .context("Failed to upsert axis order")?;
        Ok(())
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

struct RecordRow {
    id: i64,
    attributes: String,
}

impl RecordRow {
    fn into_item(self) -> Result<Item> {
        let attributes: Map<String, Value> = serde_json::from_str(&self.attributes)
            .with_context(|| format!("Failed to parse attributes of record {}", self.id))?;
        Ok(Item {
            id: self.id,
            attributes,
        })
    }
}

struct SchemaRow {
    name: String,
    fields: String,
}

impl SchemaRow {
    fn into_table(self) -> Result<TableSchema> {
        let fields = serde_json::from_str(&self.fields)
            .with_context(|| format!("Failed to parse fields of table '{}'", self.name))?;
        Ok(TableSchema {
            name: self.name,
            fields,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

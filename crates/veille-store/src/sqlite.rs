//! SQLite-backed store for items, taxonomy and assignment edges.
//!
//! Bulk edge operations pass the id set as a JSON array and expand it with
//! `json_each`, so each step is a single statement per edge table.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::schema::{ASSIGNMENTS_SQL, ITEMS_SQL, TAXONOMY_SQL};
use crate::store::Store;
use crate::types::*;
use veille_core::{
    split_nodes, CategoryRow, Error, Item, ItemId, ItemStatus, NodeId, NodeSet, Result,
    SubcategoryRow,
};

/// SQLite store. One connection, serialized behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteStore {
    /// Open or create the database file, creating parent directories.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
            }
        }

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        let counts = store.status_counts()?;
        info!(
            "SqliteStore initialized: {} items ({} pending, {} error), path={}",
            counts.total(),
            counts.pending,
            counts.error,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!("{}\n{}\n{}", ITEMS_SQL, TAXONOMY_SQL, ASSIGNMENTS_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Seeding (upstream ETL writes these in production)
    // ---------------------------------------------------------------

    pub fn add_category(&self, name: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached("INSERT INTO categories (name) VALUES (?1)")
            .map_err(db_err)?
            .insert(params![name])
            .map_err(db_err)?;
        Ok(id)
    }

    pub fn add_subcategory(&self, category_id: i64, name: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached("INSERT INTO subcategories (name, category_id) VALUES (?1, ?2)")
            .map_err(db_err)?
            .insert(params![name, category_id])
            .map_err(db_err)?;
        Ok(id)
    }

    /// Insert an item. Returns the new item ID.
    pub fn add_item(&self, content: &str, opts: AddItemOptions) -> Result<ItemId> {
        let created_at = opts.created_at.unwrap_or_else(now_millis);
        let status = opts.status.unwrap_or(ItemStatus::Pending);
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO items (title, content, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(db_err)?
            .insert(params![opts.title, content, status.as_str(), created_at])
            .map_err(db_err)?;
        Ok(id)
    }

    // ---------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------

    pub fn get_status(&self, id: ItemId) -> Result<Option<ItemStatus>> {
        Ok(self.get_item(id)?.map(|item| item.status))
    }

    pub fn get_grade(&self, id: ItemId) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let grade = conn
            .prepare_cached("SELECT grade FROM items WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![id], |row| row.get::<_, Option<String>>(0))
            .optional()
            .map_err(db_err)?
            .flatten();
        Ok(grade)
    }

    /// `graded`, `error`, or `None` when grading never ran.
    pub fn get_grade_status(&self, id: ItemId) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let status = conn
            .prepare_cached("SELECT grade_status FROM items WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![id], |row| row.get::<_, Option<String>>(0))
            .optional()
            .map_err(db_err)?
            .flatten();
        Ok(status)
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT status, COUNT(*) FROM items GROUP BY status")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_err)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            match status.parse::<ItemStatus>()? {
                ItemStatus::Pending => counts.pending = count,
                ItemStatus::Processing => counts.processing = count,
                ItemStatus::Done => counts.done = count,
                ItemStatus::Error => counts.error = count,
            }
        }
        Ok(counts)
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
        let status: String = row.get("status")?;
        let status = status.parse::<ItemStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Item {
            id: row.get("id")?,
            title: row.get("title")?,
            content: row.get("content")?,
            status,
            status_reason: row.get("status_reason")?,
        })
    }

    fn ids_json(ids: &[i64]) -> Result<String> {
        Ok(serde_json::to_string(ids)?)
    }
}

impl Store for SqliteStore {
    fn load_taxonomy(&self) -> Result<(Vec<CategoryRow>, Vec<SubcategoryRow>)> {
        let conn = self.conn.lock();

        let categories = conn
            .prepare_cached("SELECT id, name FROM categories ORDER BY id")
            .map_err(db_err)?
            .query_map([], |row| {
                Ok(CategoryRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let subcategories = conn
            .prepare_cached("SELECT id, name, category_id FROM subcategories ORDER BY id")
            .map_err(db_err)?
            .query_map([], |row| {
                Ok(SubcategoryRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category_id: row.get(2)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        Ok((categories, subcategories))
    }

    fn claim_items(&self, limit: usize, claimant: &str) -> Result<Vec<ItemId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = now_millis();
        let conn = self.conn.lock();
        // Single statement: the read and the flip to 'processing' are atomic.
        let mut ids = conn
            .prepare_cached(
                "UPDATE items
                 SET status = 'processing', claimed_by = ?1, claimed_at = ?2, updated_at = ?2
                 WHERE id IN (
                     SELECT id FROM items
                     WHERE status = 'pending'
                        OR (status = 'error' AND claimed_by IS NOT ?1)
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?3
                 )
                 RETURNING id",
            )
            .map_err(db_err)?
            .query_map(params![claimant, now, limit as i64], |row| row.get::<_, i64>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        ids.sort_unstable();
        debug!("Claimed {} items for {}", ids.len(), claimant);
        Ok(ids)
    }

    fn release_stale_claims(&self, older_than: Duration) -> Result<usize> {
        let now = now_millis();
        let held = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(held);
        let conn = self.conn.lock();
        let released = conn
            .execute(
                "UPDATE items
                 SET status = 'pending', status_reason = 'lease expired',
                     claimed_by = NULL, claimed_at = NULL, updated_at = ?2
                 WHERE status = 'processing' AND claimed_at <= ?1",
                params![cutoff, now],
            )
            .map_err(db_err)?;
        Ok(released)
    }

    fn renew_claim(&self, id: ItemId, claimant: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let renewed = conn
            .execute(
                "UPDATE items SET claimed_at = ?1
                 WHERE id = ?2 AND status = 'processing' AND claimed_by = ?3",
                params![now_millis(), id, claimant],
            )
            .map_err(db_err)?;
        Ok(renewed > 0)
    }

    fn finish_claim(
        &self,
        id: ItemId,
        claimant: &str,
        status: ItemStatus,
        reason: Option<&str>,
    ) -> Result<bool> {
        let reason = if status == ItemStatus::Error { reason } else { None };
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE items
                 SET status = ?1, status_reason = ?2, updated_at = ?3,
                     claimed_by = CASE WHEN ?1 IN ('processing', 'error') THEN claimed_by ELSE NULL END,
                     claimed_at = CASE WHEN ?1 = 'processing' THEN claimed_at ELSE NULL END
                 WHERE id = ?4 AND status = 'processing' AND claimed_by = ?5",
                params![status.as_str(), reason, now_millis(), id, claimant],
            )
            .map_err(db_err)?;
        Ok(updated > 0)
    }

    fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        let conn = self.conn.lock();
        let item = conn
            .prepare_cached(
                "SELECT id, title, content, status, status_reason FROM items WHERE id = ?1",
            )
            .map_err(db_err)?
            .query_row(params![id], Self::row_to_item)
            .optional()
            .map_err(db_err)?;
        Ok(item)
    }

    fn get_assignments(&self, id: ItemId) -> Result<NodeSet> {
        let conn = self.conn.lock();
        let mut nodes = NodeSet::new();

        let categories = conn
            .prepare_cached("SELECT category_id FROM item_categories WHERE item_id = ?1")
            .map_err(db_err)?
            .query_map(params![id], |row| row.get::<_, i64>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        nodes.extend(categories.into_iter().map(NodeId::Category));

        let subcategories = conn
            .prepare_cached("SELECT subcategory_id FROM item_subcategories WHERE item_id = ?1")
            .map_err(db_err)?
            .query_map(params![id], |row| row.get::<_, i64>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        nodes.extend(subcategories.into_iter().map(NodeId::Subcategory));

        Ok(nodes)
    }

    fn delete_assignments(&self, id: ItemId, nodes: &NodeSet) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let (categories, subcategories) = split_nodes(nodes);
        let categories = Self::ids_json(&categories)?;
        let subcategories = Self::ids_json(&subcategories)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let mut deleted = tx
            .execute(
                "DELETE FROM item_subcategories
                 WHERE item_id = ?1 AND subcategory_id IN (SELECT value FROM json_each(?2))",
                params![id, subcategories],
            )
            .map_err(db_err)?;
        deleted += tx
            .execute(
                "DELETE FROM item_categories
                 WHERE item_id = ?1 AND category_id IN (SELECT value FROM json_each(?2))",
                params![id, categories],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(deleted)
    }

    fn insert_assignments(&self, id: ItemId, nodes: &NodeSet) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let (categories, subcategories) = split_nodes(nodes);
        let categories = Self::ids_json(&categories)?;
        let subcategories = Self::ids_json(&subcategories)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let mut inserted = tx
            .execute(
                "INSERT OR IGNORE INTO item_categories (item_id, category_id)
                 SELECT ?1, value FROM json_each(?2)",
                params![id, categories],
            )
            .map_err(db_err)?;
        inserted += tx
            .execute(
                "INSERT OR IGNORE INTO item_subcategories (item_id, subcategory_id)
                 SELECT ?1, value FROM json_each(?2)",
                params![id, subcategories],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(inserted)
    }

    fn ungraded_items(&self, limit: usize) -> Result<Vec<ItemId>> {
        let conn = self.conn.lock();
        let ids = conn
            .prepare_cached(
                "SELECT id FROM items WHERE grade_status IS NULL ORDER BY id ASC LIMIT ?1",
            )
            .map_err(db_err)?
            .query_map(params![limit as i64], |row| row.get::<_, i64>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(ids)
    }

    fn set_grade(&self, id: ItemId, grade: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE items
                 SET grade = ?1, grade_status = 'graded', grade_reason = NULL, updated_at = ?2
                 WHERE id = ?3",
                params![grade, now_millis(), id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }

    fn set_grade_error(&self, id: ItemId, reason: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE items
                 SET grade_status = 'error', grade_reason = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![reason, now_millis(), id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }
}

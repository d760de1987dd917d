//! SQLite-backed record store.
//!
//! All access goes through one connection behind a mutex, so every
//! per-record read-modify-write in [`SqliteMemoryStore::update`] runs against
//! the committed value and concurrent mutators serialize instead of
//! overwriting each other.

use crate::config::MemoryConfig;
use crate::error::{ensure_unit_interval, Error, Result};
use crate::memory::schema::{initialize_schema, is_initialized};
use crate::memory::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const MEMORY_COLUMNS: &str = "seq, id, memory_type, title, content, importance, tags, created_at,
     last_accessed_at, access_count, salience, status, archived_at";

/// Default page size for [`MemoryScan`].
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 256;

/// SQLite-backed store for memories, persona attributes and reflections.
///
/// Cloning is cheap and yields a handle to the same database.
#[derive(Clone)]
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
    storage_type: &'static str,
}

impl std::fmt::Debug for SqliteMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMemoryStore")
            .field("storage_type", &self.storage_type)
            .finish()
    }
}

impl SqliteMemoryStore {
    /// Open or create a memory store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        if !is_initialized(&conn) {
            initialize_schema(&conn)?;
        }
        conn.pragma_update(None, "foreign_keys", "ON")?;
        debug!(path = %path.as_ref().display(), "Opened memory store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            storage_type: "sqlite",
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            storage_type: "sqlite_in_memory",
        })
    }

    /// Open the store described by a configuration.
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        match config.resolved_database_path() {
            Some(path) => Self::open(path),
            None => Self::in_memory(),
        }
    }

    /// Backend label reported by summaries.
    pub fn storage_type(&self) -> &'static str {
        self.storage_type
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(Error::from)
    }

    /// Run `f` inside an immediate transaction; commits only if `f` succeeds.
    pub(crate) fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ==================== Record Operations ====================

    /// Insert a new record and return its id.
    pub fn put(&self, record: &MemoryRecord) -> Result<MemoryId> {
        ensure_unit_interval("importance", record.importance)?;
        ensure_unit_interval("salience", record.salience)?;
        let tags = serde_json::to_string(&record.tags)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memories (
                    id, memory_type, title, content, importance, tags, created_at,
                    last_accessed_at, access_count, salience, status, archived_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.to_string(),
                    record.memory_type,
                    record.title,
                    record.content,
                    record.importance,
                    tags,
                    format_datetime(&record.created_at),
                    record.last_accessed_at.as_ref().map(format_datetime),
                    record.access_count as i64,
                    record.salience,
                    record.status.as_str(),
                    record.archived_at.as_ref().map(format_datetime),
                ],
            )?;
            Ok(())
        })?;

        debug!(memory_id = %record.id, memory_type = %record.memory_type, "Stored memory");
        Ok(record.id.clone())
    }

    /// Get a record by id, archived or not.
    pub fn get(&self, id: &MemoryId) -> Result<MemoryRecord> {
        self.with_conn(|conn| load_memory(conn, id))?
            .ok_or_else(|| Error::not_found("memory", id.to_string()))
    }

    /// Apply `mutator` to the current value of a record and persist it.
    ///
    /// The read, the mutation and the write happen in one transaction while
    /// the connection is held, so the mutator always sees the latest
    /// committed state. `id`, `seq` and `created_at` are immutable; changes
    /// to them are ignored. A mutator that leaves `importance` or `salience`
    /// outside [0, 1] aborts the update with `InvalidArgument`.
    pub fn update<F>(&self, id: &MemoryId, mutator: F) -> Result<MemoryRecord>
    where
        F: FnOnce(&mut MemoryRecord),
    {
        self.with_tx(|tx| {
            let mut record = load_memory(tx, id)?
                .ok_or_else(|| Error::not_found("memory", id.to_string()))?;
            let (seq, created_at) = (record.seq, record.created_at);

            mutator(&mut record);

            record.id = id.clone();
            record.seq = seq;
            record.created_at = created_at;
            ensure_unit_interval("importance", record.importance)?;
            ensure_unit_interval("salience", record.salience)?;

            tx.execute(
                "UPDATE memories SET
                    memory_type = ?2, title = ?3, content = ?4, importance = ?5, tags = ?6,
                    last_accessed_at = ?7, access_count = ?8, salience = ?9, status = ?10,
                    archived_at = ?11
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    record.memory_type,
                    record.title,
                    record.content,
                    record.importance,
                    serde_json::to_string(&record.tags)?,
                    record.last_accessed_at.as_ref().map(format_datetime),
                    record.access_count as i64,
                    record.salience,
                    record.status.as_str(),
                    record.archived_at.as_ref().map(format_datetime),
                ],
            )?;
            Ok(record)
        })
    }

    /// Count one retrieval hit: bump `access_count` and set `last_accessed_at`.
    ///
    /// Only the two bookkeeping columns are written, so this never clobbers a
    /// concurrent salience change. Archived records are left untouched and
    /// reported as `NotFound`, same as a missing id.
    pub fn record_access(&self, id: &MemoryId, at: DateTime<Utc>) -> Result<MemoryRecord> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?2
                 WHERE id = ?1 AND status = ?3",
                params![
                    id.to_string(),
                    format_datetime(&at),
                    MemoryStatus::Active.as_str()
                ],
            )?;
            if rows == 0 {
                return Ok(None);
            }
            load_memory(conn, id)
        })?
        .ok_or_else(|| Error::not_found("active memory", id.to_string()))
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&self, id: &MemoryId) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
            Ok(rows > 0)
        })
    }

    /// Lazily page through records matching `filter` in insertion order.
    ///
    /// Each page is read in a single statement and is a consistent snapshot,
    /// but the connection is released between pages, so writes committed
    /// mid-scan may show up in later pages. Use [`Self::snapshot`] when the
    /// whole result must come from one point in time. Records inserted after
    /// the scan passes their position are not revisited, so the scan always
    /// terminates.
    pub fn scan(&self, filter: &MemoryFilter) -> MemoryScan<'_> {
        MemoryScan {
            store: self,
            filter: filter.clone(),
            cursor: 0,
            page_size: DEFAULT_SCAN_PAGE_SIZE,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// All records matching `filter`, read as one consistent snapshot.
    pub fn snapshot(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        let records = self.with_conn(|conn| query_page(conn, filter, 0, None))?;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    /// Aggregate counts over all records.
    pub fn stats(&self) -> Result<MemoryStats> {
        self.with_conn(|conn| {
            let (total, active, average_importance): (i64, i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0),
                        AVG(importance)
                 FROM memories",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let mut stmt =
                conn.prepare("SELECT memory_type, COUNT(*) FROM memories GROUP BY memory_type")?;
            let memories_by_type = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            Ok(MemoryStats {
                total_memories: total as u64,
                active_memories: active as u64,
                archived_memories: (total - active) as u64,
                average_importance: average_importance.unwrap_or(0.0),
                memories_by_type,
            })
        })
    }
}

/// Aggregate statistics about stored memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: u64,
    pub active_memories: u64,
    pub archived_memories: u64,
    pub average_importance: f64,
    pub memories_by_type: BTreeMap<String, u64>,
}

/// Lazy, restartable iterator over stored records.
///
/// Created by [`SqliteMemoryStore::scan`].
pub struct MemoryScan<'a> {
    store: &'a SqliteMemoryStore,
    filter: MemoryFilter,
    cursor: i64,
    page_size: usize,
    buffer: VecDeque<MemoryRecord>,
    exhausted: bool,
}

impl<'a> MemoryScan<'a> {
    /// Set how many rows are fetched per page.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn fill(&mut self) -> Result<()> {
        let filter = &self.filter;
        let cursor = self.cursor;
        let page_size = self.page_size;
        let page = self
            .store
            .with_conn(|conn| query_page(conn, filter, cursor, Some(page_size)))?;

        if page.len() < page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = last.seq;
        }
        self.buffer
            .extend(page.into_iter().filter(|r| self.filter.matches(r)));
        Ok(())
    }
}

impl<'a> Iterator for MemoryScan<'a> {
    type Item = Result<MemoryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

fn query_page(
    conn: &Connection,
    filter: &MemoryFilter,
    after_seq: i64,
    limit: Option<usize>,
) -> rusqlite::Result<Vec<MemoryRecord>> {
    let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE seq > ?");
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(after_seq)];

    if !filter.include_archived {
        sql.push_str(" AND status = ?");
        params_vec.push(Box::new(MemoryStatus::Active.as_str()));
    }

    if let Some(ref types) = filter.memory_types {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<&str> = types.iter().map(|_| "?").collect();
        sql.push_str(&format!(" AND memory_type IN ({})", placeholders.join(",")));
        for t in types {
            params_vec.push(Box::new(t.clone()));
        }
    }

    sql.push_str(" ORDER BY seq ASC");
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_refs.as_slice(), row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn load_memory(conn: &Connection, id: &MemoryId) -> rusqlite::Result<Option<MemoryRecord>> {
    conn.query_row(
        &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
        params![id.to_string()],
        row_to_memory,
    )
    .optional()
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let id_str: String = row.get(1)?;
    let id = MemoryId::parse(&id_str).map_err(|e| conversion_error(1, e))?;

    let tags_json: String = row.get(6)?;
    let tags: BTreeSet<String> =
        serde_json::from_str(&tags_json).map_err(|e| conversion_error(6, e))?;

    let status_str: String = row.get(11)?;
    let status = MemoryStatus::parse(&status_str)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(11, status_str, Type::Text))?;

    Ok(MemoryRecord {
        id,
        seq: row.get(0)?,
        memory_type: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        importance: row.get(5)?,
        tags,
        created_at: parse_datetime(row, 7)?,
        last_accessed_at: parse_optional_datetime(row, 8)?,
        access_count: row.get::<_, i64>(9)? as u64,
        salience: row.get(10)?,
        status,
        archived_at: parse_optional_datetime(row, 12)?,
    })
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parse_optional_datetime(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

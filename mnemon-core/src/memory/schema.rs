//! SQLite schema and migrations for the memory store.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // WAL lets readers proceed while a sweep commits
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

/// Apply version 1 schema.
fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "BEGIN;

        CREATE TABLE IF NOT EXISTS memories (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            memory_type TEXT NOT NULL,
            title TEXT,
            content TEXT NOT NULL,
            importance REAL NOT NULL CHECK (importance >= 0.0 AND importance <= 1.0),
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            last_accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0,
            salience REAL NOT NULL CHECK (salience >= 0.0 AND salience <= 1.0),
            status TEXT NOT NULL DEFAULT 'active',
            archived_at TEXT
        );

        CREATE TABLE IF NOT EXISTS persona_attributes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            persona_type TEXT NOT NULL,
            attribute_name TEXT NOT NULL,
            current_value TEXT NOT NULL,
            confidence_score REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (persona_type, attribute_name)
        );

        CREATE TABLE IF NOT EXISTS persona_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attribute_id INTEGER NOT NULL,
            value TEXT NOT NULL,
            confidence_score REAL,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY (attribute_id) REFERENCES persona_attributes(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS reflections (
            id TEXT PRIMARY KEY,
            reflection_trigger TEXT NOT NULL,
            situation_summary TEXT NOT NULL,
            generated_text TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            related_memory_ids TEXT NOT NULL DEFAULT '[]',
            memory_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
        CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
        CREATE INDEX IF NOT EXISTS idx_persona_history_attr ON persona_history(attribute_id);
        CREATE INDEX IF NOT EXISTS idx_persona_history_time ON persona_history(recorded_at);
        CREATE INDEX IF NOT EXISTS idx_reflections_time ON reflections(generated_at);

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;",
    )
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='memories'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

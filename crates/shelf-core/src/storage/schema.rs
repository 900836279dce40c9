//! SQLite schema for persisted book records
//!
//! Each tracked book has one row. The record's flat field map is stored as
//! JSON in `fields`; `vid` and `path` are duplicated into columns so the
//! table can be inspected and queried without decoding JSON.

use rusqlite::{Connection, OptionalExtension, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_info (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS book_records (
        bid TEXT PRIMARY KEY,
        vid TEXT NOT NULL,
        path TEXT NOT NULL,
        fields TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_book_records_vid ON book_records(vid);
"#;

/// Create missing tables and stamp the schema version
///
/// Safe to run on a database that already has records.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Version stamped in `schema_info`, if any
pub fn schema_version(conn: &Connection) -> Result<Option<i32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Whether the database is new or stamped with an older version
pub fn needs_init(conn: &Connection) -> bool {
    // Fails when schema_info does not exist yet
    !matches!(schema_version(conn), Ok(Some(v)) if v >= SCHEMA_VERSION)
}

//! SQLite record store
//!
//! Records are kept in `book_records`, keyed by book id. Rows are enumerated
//! in rowid order, so records come back in the order they were first saved.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use super::{MetadataStore, StoredRecord};
use crate::error::RecordError;
use crate::record::MetadataRecord;

/// SQLite-backed metadata store
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| StorageError::OpenDatabase {
            path: path.to_path_buf(),
            source,
        })?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        debug!("Opened metadata database at {:?}", path);
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Number of stored records
    pub fn count(&self) -> StorageResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM book_records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Last save time of a record, if it exists
    pub fn updated_at(&self, bid: &str) -> StorageResult<Option<chrono::DateTime<chrono::Utc>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT updated_at FROM book_records WHERE bid = ?")?;
        let mut rows = stmt.query(params![bid])?;
        match rows.next()? {
            Some(row) => {
                let millis: i64 = row.get(0)?;
                Ok(chrono::DateTime::from_timestamp_millis(millis))
            }
            None => Ok(None),
        }
    }
}

impl MetadataStore for SqliteStore {
    fn load_all(&self) -> StorageResult<Vec<Result<StoredRecord, RecordError>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT rowid, bid, fields FROM book_records ORDER BY rowid")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(rowid, bid, json)| {
                let origin = format!("row {} ({})", rowid, bid);
                match serde_json::from_str::<Value>(&json) {
                    Ok(Value::Object(fields)) => Ok(StoredRecord { origin, fields }),
                    Ok(_) => Err(RecordError::Malformed {
                        origin,
                        reason: "fields are not a JSON object".to_string(),
                    }),
                    Err(e) => Err(RecordError::Malformed {
                        origin,
                        reason: e.to_string(),
                    }),
                }
            })
            .collect())
    }

    fn save(&mut self, record: &MetadataRecord) -> StorageResult<()> {
        let fields = serde_json::to_string(&record.to_fields()).map_err(|source| {
            StorageError::Encode {
                bid: record.bid.to_string(),
                source,
            }
        })?;
        let now = chrono::Utc::now().timestamp_millis();

        self.conn.execute(
            r#"
            INSERT INTO book_records (bid, vid, path, fields, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(bid) DO UPDATE SET
                vid = excluded.vid,
                path = excluded.path,
                fields = excluded.fields,
                updated_at = excluded.updated_at
            "#,
            params![record.bid.as_str(), record.vid, record.path, fields, now],
        )?;
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite ({})", path.display()),
            None => "sqlite (in memory)".to_string(),
        }
    }
}

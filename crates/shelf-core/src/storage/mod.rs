//! Metadata storage
//!
//! Tracked books' metadata lives outside the vaults, one record per book.
//! The catalog only needs two things from a store: enumerate every record,
//! and persist one record.
//!
//! ## Backends
//!
//! - **SQLite** (`SqliteStore`): one row per book in `book_records`
//! - **Files** (`FileStore`): one JSON file per book, written atomically
//! - **Memory** (`MemoryStore`): for tests and embedding

pub mod error;
pub mod files;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use files::FileStore;
pub use memory::MemoryStore;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

use crate::error::RecordError;
use crate::record::{MetadataRecord, RecordFields};

/// One item enumerated from a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Where the item came from, for warnings (file name, row id)
    pub origin: String,
    pub fields: RecordFields,
}

/// Backend for persisted book records
///
/// `load_all` fails as a whole only when the store cannot be enumerated at
/// all; individual unreadable items are returned as [`RecordError`]s so the
/// rest can still be merged.
pub trait MetadataStore: Send {
    /// Enumerate every stored record, in a stable order
    fn load_all(&self) -> StorageResult<Vec<Result<StoredRecord, RecordError>>>;

    /// Insert or replace the record for `record.bid`
    fn save(&mut self, record: &MetadataRecord) -> StorageResult<()>;

    /// Short human-readable description (backend and location)
    fn describe(&self) -> String;
}

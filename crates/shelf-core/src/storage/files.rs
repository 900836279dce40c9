//! File-per-record store
//!
//! Each record is a pretty-printed JSON object at
//! `{data_dir}/book-data/{bid}.json`. Writes are atomic (temp file, sync,
//! rename), so a crash never leaves a half-written record behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::{MetadataStore, StoredRecord};
use crate::error::RecordError;
use crate::record::MetadataRecord;

/// Directory under the data dir holding record files
pub const RECORD_DIR: &str = "book-data";

const RECORD_EXT: &str = "json";

/// Directory-backed metadata store
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store records under `data_dir/book-data`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(RECORD_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for a book id
    pub fn record_path(&self, bid: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", bid, RECORD_EXT))
    }
}

impl MetadataStore for FileStore {
    fn load_all(&self) -> StorageResult<Vec<Result<StoredRecord, RecordError>>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            // Nothing saved yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_io(e, self.dir.clone())),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::from_io(e, self.dir.clone()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths.iter().map(|path| read_record(path)).collect())
    }

    fn save(&mut self, record: &MetadataRecord) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(&Value::Object(record.to_fields())).map_err(
            |source| StorageError::Encode {
                bid: record.bid.to_string(),
                source,
            },
        )?;
        atomic_write(&self.record_path(record.bid.as_str()), &json)
    }

    fn describe(&self) -> String {
        format!("files ({})", self.dir.display())
    }
}

fn read_record(path: &Path) -> Result<StoredRecord, RecordError> {
    let origin = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let content = fs::read_to_string(path).map_err(|e| RecordError::Malformed {
        origin: origin.clone(),
        reason: e.to_string(),
    })?;

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(fields)) => Ok(StoredRecord { origin, fields }),
        Ok(_) => Err(RecordError::Malformed {
            origin,
            reason: "not a JSON object".to_string(),
        }),
        Err(e) => Err(RecordError::Malformed {
            origin,
            reason: e.to_string(),
        }),
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookId, BookMeta};
    use serde_json::json;
    use tempfile::TempDir;

    fn sample(bid: &str) -> MetadataRecord {
        let mut meta = BookMeta {
            title: Some("Dune".to_string()),
            ..BookMeta::default()
        };
        meta.extra.insert("rating".to_string(), json!(5));
        MetadataRecord {
            vid: "main".to_string(),
            bid: BookId::parse(bid).unwrap(),
            path: "/dune.epub".to_string(),
            name: Some("dune".to_string()),
            ext: Some("epub".to_string()),
            meta,
        }
    }

    #[test]
    fn test_missing_dir_loads_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_with_extras() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FileStore::new(temp_dir.path());

        store.save(&sample("bbb")).unwrap();
        store.save(&sample("aaa")).unwrap();

        assert!(store.record_path("aaa").exists());
        assert!(!store.dir().join("aaa.tmp").exists());

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        let first = loaded[0].as_ref().unwrap();
        assert_eq!(first.origin, "aaa.json");

        let record = MetadataRecord::from_fields(&first.origin, first.fields.clone()).unwrap();
        assert_eq!(record, sample("aaa"));
        assert_eq!(record.meta.extra["rating"], json!(5));
    }

    #[test]
    fn test_unreadable_record_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FileStore::new(temp_dir.path());
        store.save(&sample("good")).unwrap();
        fs::write(store.dir().join("broken.json"), "{ nope").unwrap();
        fs::write(store.dir().join("list.json"), "[1, 2]").unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("file.json");

        atomic_write(&nested_path, b"{}").unwrap();

        assert_eq!(fs::read_to_string(&nested_path).unwrap(), "{}");
    }
}

//! Metadata store errors
//!
//! Filesystem failures are classified by [`io::ErrorKind`] so callers can
//! tell a full disk or a permission problem from a genuinely broken store.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A metadata store could not be opened, read or written
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cannot create store directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied on '{path}'")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No space left to write '{path}'")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Expected file or directory is missing
    #[error("'{path}' does not exist")]
    NotFound { path: PathBuf },

    /// Any other filesystem failure on `path`
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The temp file was written but could not replace the record
    #[error("Cannot move '{from}' into place as '{to}': {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot open record database '{path}': {source}")]
    OpenDatabase {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Record database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cannot encode record of book {bid}: {source}")]
    Encode {
        bid: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Wrap an I/O error on `path`, picking the most specific variant
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                path,
                source: error,
            },
            io::ErrorKind::NotFound => StorageError::NotFound { path },
            _ if reports_no_space(&error) => StorageError::DiskFull {
                path,
                source: error,
            },
            _ => StorageError::Io {
                path,
                source: error,
            },
        }
    }

    /// What the user can do about it, if anything
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        Some(match self {
            StorageError::DiskFull { .. } => "Free some disk space, then save the book again.",
            StorageError::PermissionDenied { .. } | StorageError::CreateDirectory { .. } => {
                "Make sure the data directory (data_dir) is writable by the current user."
            }
            StorageError::AtomicWriteFailed { .. } => {
                "The previous record is unchanged. Delete the leftover .tmp file and retry."
            }
            StorageError::OpenDatabase { .. } => {
                "Check data_dir, or switch to plain record files with `shelf config set store files`."
            }
            _ => return None,
        })
    }
}

/// `ErrorKind::StorageFull` is not available on every toolchain we build
/// with, so look at the message as well
fn reports_no_space(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    ["no space left", "disk full", "quota exceeded", "not enough space"]
        .iter()
        .any(|needle| msg.contains(needle))
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err(kind: io::ErrorKind, msg: &str) -> io::Error {
        io::Error::new(kind, msg.to_string())
    }

    #[test]
    fn test_from_io_classification() {
        let path = || PathBuf::from("/data/book-data/x.json");

        let denied = StorageError::from_io(io_err(io::ErrorKind::PermissionDenied, "no"), path());
        assert!(matches!(denied, StorageError::PermissionDenied { .. }));
        assert!(denied.recovery_suggestion().unwrap().contains("data_dir"));

        let missing = StorageError::from_io(io_err(io::ErrorKind::NotFound, "gone"), path());
        assert!(matches!(missing, StorageError::NotFound { .. }));
        assert!(missing.recovery_suggestion().is_none());

        let full = StorageError::from_io(
            io_err(io::ErrorKind::Other, "No space left on device"),
            path(),
        );
        assert!(matches!(full, StorageError::DiskFull { .. }));
        assert!(full.recovery_suggestion().is_some());

        let other = StorageError::from_io(io_err(io::ErrorKind::Other, "bad sector"), path());
        assert!(matches!(other, StorageError::Io { .. }));
        assert!(other.recovery_suggestion().is_none());
        assert!(other.to_string().contains("x.json"));
    }

    #[test]
    fn test_atomic_write_failure() {
        let err = StorageError::AtomicWriteFailed {
            from: PathBuf::from("/data/book-data/abc.tmp"),
            to: PathBuf::from("/data/book-data/abc.json"),
            source: io_err(io::ErrorKind::Other, "cross-device link"),
        };

        let msg = err.to_string();
        assert!(msg.contains("abc.tmp"));
        assert!(msg.contains("abc.json"));
        assert!(err.recovery_suggestion().unwrap().contains(".tmp"));
    }
}

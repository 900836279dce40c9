//! Error types
//!
//! A full pass never fails. Everything that goes wrong while walking vaults
//! or merging metadata records is collected as a [`SyncWarning`] and handed
//! back in the [`SyncReport`](crate::report::SyncReport). Operations on a
//! single book return a [`CatalogError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A vault could not take part in the current pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No root path configured for the vault
    #[error("Vault '{vid}' has no root path configured")]
    Unset { vid: String },

    /// The vault ID cannot be used as an index key prefix
    #[error("Vault id '{vid}' is invalid: {reason}")]
    InvalidId { vid: String, reason: String },

    /// The same vault ID is configured twice
    #[error("Vault id '{vid}' is configured more than once; later entry ignored")]
    Duplicate { vid: String },

    /// The root directory does not exist or is not a directory
    #[error("Vault '{vid}' root '{path}' is unreachable: {reason}")]
    Unreachable {
        vid: String,
        path: PathBuf,
        reason: String,
    },
}

/// A persisted metadata record was skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A required identity field is absent or empty
    #[error("Record {origin} is missing required field '{field}'")]
    MissingField { origin: String, field: &'static str },

    /// A known field has the wrong shape, or the item could not be parsed
    #[error("Record {origin} is malformed: {reason}")]
    Malformed { origin: String, reason: String },

    /// The record's vault was not loaded in this pass
    #[error("Record {bid} belongs to vault '{vid}', which is not loaded; skipped for this pass")]
    VaultNotLoaded { bid: String, vid: String },

    /// A second record for an id already merged in this pass
    #[error("Record for book {bid} at '{path}' repeats an id already merged in this pass; ignored")]
    Duplicate { bid: String, path: String },

    /// Another identity already owns the file at the record's path
    #[error("Record {bid} points at {vid}:{path}, which already belongs to book {other}")]
    Conflict {
        bid: String,
        vid: String,
        path: String,
        other: String,
    },
}

/// Anything that went wrong during a synchronization pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncWarning {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Record(#[from] RecordError),

    /// A directory or entry could not be read; prior state is kept
    #[error("Cannot read '{path}': {reason}")]
    Io { path: PathBuf, reason: String },

    /// The metadata store could not be enumerated at all
    #[error("Metadata store unavailable: {0}")]
    Store(String),
}

/// A catalog operation on a single entry failed
#[derive(Error, Debug)]
pub enum CatalogError {
    /// No entry matches the id or path
    #[error("No book or folder matches '{0}'")]
    NotFound(String),

    /// The operation needs a book, not a folder
    #[error("'{0}' is a folder, not a book")]
    NotABook(String),

    /// The entry's vault is not loaded
    #[error("Vault '{0}' is not loaded")]
    VaultNotLoaded(String),

    /// The record could not be persisted
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

impl SyncWarning {
    /// Create an I/O warning with path context
    pub fn io(path: impl Into<PathBuf>, error: &io::Error) -> Self {
        let reason = match error.kind() {
            io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            io::ErrorKind::NotFound => "not found".to_string(),
            _ => error.to_string(),
        };
        SyncWarning::Io {
            path: path.into(),
            reason,
        }
    }

    /// Short label for grouping warnings in output
    pub fn kind(&self) -> &'static str {
        match self {
            SyncWarning::Config(_) => "config",
            SyncWarning::Record(_) => "record",
            SyncWarning::Io { .. } => "io",
            SyncWarning::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_warning_classification() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let warning = SyncWarning::io("/vault/secret", &err);

        assert_eq!(warning.kind(), "io");
        assert!(warning.to_string().contains("permission denied"));
        assert!(warning.to_string().contains("/vault/secret"));
    }

    #[test]
    fn test_record_error_display() {
        let warning: SyncWarning = RecordError::VaultNotLoaded {
            bid: "abc".to_string(),
            vid: "papers".to_string(),
        }
        .into();

        assert_eq!(warning.kind(), "record");
        let msg = warning.to_string();
        assert!(msg.contains("papers"));
        assert!(msg.contains("not loaded"));
    }

    #[test]
    fn test_config_error_display() {
        let warning: SyncWarning = ConfigError::Unreachable {
            vid: "main".to_string(),
            path: PathBuf::from("/missing"),
            reason: "not found".to_string(),
        }
        .into();

        assert_eq!(warning.kind(), "config");
        assert!(warning.to_string().contains("/missing"));
    }
}

//! Shelf Core Library
//!
//! This crate provides the core functionality for Shelf, a catalog of book
//! files spread over several directory roots ("vaults").
//!
//! # Architecture
//!
//! - **Raw tree**: one folder/book tree per vault, mirroring disk
//! - **Metadata records**: per-book metadata persisted outside the vaults,
//!   keyed by a stable book id
//! - **Display tree**: a read-only projection of one vault, by path or
//!   grouped by tag, author or year
//!
//! A synchronization pass walks every vault, merges all stored records into
//! the raw tree (books whose file disappeared are kept as *lost*), and
//! rebuilds the display tree.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut catalog = Catalog::open(config)?;
//!
//! let report = catalog.synchronize();
//! let id = catalog.resolve("library:/novels/dune.epub")?;
//! catalog.update_book(id, &BookEdit { add_tags: vec!["sf".into()], ..Default::default() })?;
//! ```
//!
//! # Modules
//!
//! - `catalog`: Catalog state and operations (main entry point)
//! - `service`: Async wrapper with coalesced reloads and snapshots
//! - `tree`: Arena of folders and books
//! - `walker`: Vault scanning
//! - `reconcile`: Merging stored records into the tree
//! - `display`: Display tree projection
//! - `storage`: Metadata record stores
//! - `config`: Application configuration

pub mod catalog;
pub mod config;
pub mod display;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod service;
pub mod storage;
pub mod tree;
pub mod walker;

pub use catalog::{Catalog, CatalogSnapshot, Target, VaultInfo, ViewSettings};
pub use config::{Config, StoreKind, VaultConfig};
pub use display::{DisplayFolder, DisplayMode, DisplayNode};
pub use error::{CatalogError, ConfigError, RecordError, SyncWarning};
pub use models::{BookEdit, BookId, BookMeta, BookStatus, EditEffect};
pub use record::MetadataRecord;
pub use report::SyncReport;
pub use service::{CatalogService, ServiceError};
pub use storage::{FileStore, MemoryStore, MetadataStore, SqliteStore, StorageError};
pub use tree::{Entry, EntryId, EntryKind, Tree, TreeStats};

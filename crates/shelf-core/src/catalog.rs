//! The book catalog
//!
//! [`Catalog`] owns the raw tree, the metadata store and the current display
//! tree. [`Catalog::synchronize`] is the only operation that rescans disk:
//!
//! 1. configured vaults are validated and walked
//! 2. every stored record is merged by the reconciler
//! 3. the display tree is rebuilt
//!
//! Everything else works on the in-memory state and persists single records.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, VaultConfig};
use crate::display::{self, DisplayFolder, DisplayMode};
use crate::error::{CatalogError, ConfigError, SyncWarning};
use crate::models::{BookEdit, BookId, EditEffect};
use crate::reconcile::Reconciler;
use crate::record::MetadataRecord;
use crate::report::SyncReport;
use crate::storage::MetadataStore;
use crate::tree::{index_key, normalize_entry_path, Entry, EntryId, Tree, TreeStats};
use crate::walker::{ExtensionFilter, VaultWalker};

/// A vault that was loaded in the last pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultInfo {
    pub id: String,
    pub name: String,
    pub root: PathBuf,
}

/// What the display tree currently shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewSettings {
    /// Vault to show; `None` follows the configured current vault
    pub vault: Option<String>,
    pub mode: DisplayMode,
    pub ascending: bool,
}

/// A book addressed by id or by `vid:/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(BookId),
    Path { vid: String, path: String },
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((vid, path)) = s.split_once(':') {
            if !vid.is_empty() && path.starts_with('/') {
                return Ok(Target::Path {
                    vid: vid.to_string(),
                    path: normalize_entry_path(path),
                });
            }
        }
        BookId::parse(s)
            .map(Target::Id)
            .ok_or_else(|| "expected a book id or vault:/path".to_string())
    }
}

impl Target {
    pub fn find(&self, tree: &Tree) -> Option<EntryId> {
        match self {
            Target::Id(bid) => tree.book_by_id(bid).filter(|id| tree.contains(*id)),
            Target::Path { vid, path } if path.is_empty() => tree.root(vid),
            Target::Path { vid, path } => tree.lookup(vid, path).or_else(|| {
                // Lost books are not indexed; find them by their recorded path
                tree.tracked().into_iter().map(|(_, id)| id).find(|id| {
                    tree.get(*id)
                        .is_some_and(|e| e.vid == *vid && e.path == *path)
                })
            }),
        }
    }
}

/// Read-only copy of the catalog state after a completed pass
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    /// Number of completed passes when the snapshot was taken
    pub generation: u64,
    pub tree: Tree,
    pub display: DisplayFolder,
    pub view: ViewSettings,
    pub vaults: Vec<VaultInfo>,
    pub report: SyncReport,
}

impl CatalogSnapshot {
    pub fn book_by_id(&self, bid: &BookId) -> Option<&Entry> {
        self.tree.book_by_id(bid).and_then(|id| self.tree.get(id))
    }

    pub fn entry_by_path(&self, vid: &str, path: &str) -> Option<&Entry> {
        self.tree
            .lookup(vid, &normalize_entry_path(path))
            .and_then(|id| self.tree.get(id))
    }

    pub fn resolve(&self, target: &Target) -> Option<EntryId> {
        target.find(&self.tree)
    }

    /// Absolute filesystem path of an entry whose vault was loaded
    pub fn full_path(&self, id: EntryId) -> Option<PathBuf> {
        let entry = self.tree.get(id)?;
        let vault = self.vaults.iter().find(|v| v.id == entry.vid)?;
        Some(vault.root.join(entry.path.trim_start_matches('/')))
    }
}

pub struct Catalog {
    config: Config,
    store: Box<dyn MetadataStore>,
    tree: Tree,
    vaults: BTreeMap<String, VaultInfo>,
    view: ViewSettings,
    display: DisplayFolder,
    last_report: SyncReport,
    passes: u64,
}

impl Catalog {
    pub fn new(config: Config, store: Box<dyn MetadataStore>) -> Self {
        let view = ViewSettings {
            vault: config.current_vault.clone(),
            mode: config.tree.mode,
            ascending: config.tree.ascending,
        };
        Self {
            config,
            store,
            tree: Tree::new(),
            vaults: BTreeMap::new(),
            view,
            display: DisplayFolder::default(),
            last_report: SyncReport::default(),
            passes: 0,
        }
    }

    /// Open the configured store and create an empty catalog
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let store = config
            .open_store()
            .context("Failed to open metadata store")?;
        Ok(Self::new(config, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the configuration; takes effect on the next pass
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn display(&self) -> &DisplayFolder {
        &self.display
    }

    pub fn view(&self) -> &ViewSettings {
        &self.view
    }

    pub fn store_description(&self) -> String {
        self.store.describe()
    }

    /// Report of the last completed pass
    pub fn last_report(&self) -> &SyncReport {
        &self.last_report
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    // ==================== Synchronization ====================

    /// Run a full pass: walk every vault, merge all records, rebuild display
    ///
    /// Never fails; problems are listed in the returned report.
    pub fn synchronize(&mut self) -> SyncReport {
        let started = Instant::now();
        let mut report = SyncReport::default();
        let configured = self.config.vaults();

        self.forget_removed_vaults(&configured, &mut report);
        self.walk_vaults(&configured, &mut report);

        let records = self.load_records(&mut report);
        Reconciler::new(&mut self.tree, &mut report).reconcile(records);

        report.stats = self.tree.stats();
        self.rebuild_display();
        self.passes += 1;

        info!(
            "Pass {} done in {:?}: {} vault(s), {} book(s), {} tracked, {} lost, {} warning(s)",
            self.passes,
            started.elapsed(),
            report.vaults_scanned.len(),
            report.stats.books,
            report.stats.tracked,
            report.stats.lost,
            report.warnings.len()
        );
        self.last_report = report.clone();
        report
    }

    fn forget_removed_vaults(&mut self, configured: &[VaultConfig], report: &mut SyncReport) {
        let wanted: HashSet<&str> = configured.iter().map(|v| v.id.as_str()).collect();
        let removed: Vec<String> = self
            .tree
            .roots()
            .map(|(vid, _)| vid.to_string())
            .filter(|vid| !wanted.contains(vid.as_str()))
            .collect();

        for vid in removed {
            info!("Vault '{}' is no longer configured; dropping it", vid);
            report.entries_removed += self.tree.drop_vault(&vid);
            self.vaults.remove(&vid);
        }
    }

    fn walk_vaults(&mut self, configured: &[VaultConfig], report: &mut SyncReport) {
        let filter = ExtensionFilter::new(&self.config.extensions);
        let mut seen = HashSet::new();

        for vault in configured {
            let root_dir = match self.validate_vault(vault, &mut seen) {
                Ok(dir) => dir,
                Err(e) => {
                    report.vaults_skipped.push(vault.id.clone());
                    report.warn(e);
                    continue;
                }
            };

            let name = vault
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| dir_name(&root_dir, &vault.id));
            debug!("Walking vault '{}' at {:?}", vault.id, root_dir);

            let root = self.tree.ensure_root(&vault.id, &name);
            VaultWalker::new(&vault.id, &root_dir, &filter).walk(&mut self.tree, root, "", report);

            self.vaults.insert(
                vault.id.clone(),
                VaultInfo {
                    id: vault.id.clone(),
                    name,
                    root: root_dir,
                },
            );
            report.vaults_scanned.push(vault.id.clone());
        }
    }

    fn validate_vault(
        &self,
        vault: &VaultConfig,
        seen: &mut HashSet<String>,
    ) -> Result<PathBuf, ConfigError> {
        let vid = vault.id.clone();
        if vid.trim().is_empty() {
            return Err(ConfigError::InvalidId {
                vid,
                reason: "id is empty".to_string(),
            });
        }
        if vid.contains(':') {
            return Err(ConfigError::InvalidId {
                vid,
                reason: "id must not contain ':'".to_string(),
            });
        }
        if !seen.insert(vid.clone()) {
            return Err(ConfigError::Duplicate { vid });
        }
        if vault.path.trim().is_empty() {
            return Err(ConfigError::Unset { vid });
        }

        let root = self.config.resolve_root(&vault.path);
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(ConfigError::Unreachable {
                vid,
                path: root,
                reason: "not a directory".to_string(),
            }),
            Err(e) => {
                let reason = match SyncWarning::io(&root, &e) {
                    SyncWarning::Io { reason, .. } => reason,
                    other => other.to_string(),
                };
                Err(ConfigError::Unreachable {
                    vid,
                    path: root,
                    reason,
                })
            }
        }
    }

    fn load_records(&self, report: &mut SyncReport) -> Vec<MetadataRecord> {
        let stored = match self.store.load_all() {
            Ok(items) => items,
            Err(e) => {
                report.warn(SyncWarning::Store(e.to_string()));
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(stored.len());
        for item in stored {
            match item.and_then(|s| MetadataRecord::from_fields(&s.origin, s.fields)) {
                Ok(record) => records.push(record),
                Err(e) => {
                    report.records_skipped += 1;
                    report.warn(e);
                }
            }
        }
        records
    }

    // ==================== Lookups ====================

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.tree.get(id)
    }

    pub fn book_by_id(&self, bid: &BookId) -> Option<EntryId> {
        self.tree.book_by_id(bid).filter(|id| self.tree.contains(*id))
    }

    pub fn entry_by_path(&self, vid: &str, path: &str) -> Option<EntryId> {
        let path = normalize_entry_path(path);
        if path.is_empty() {
            return self.tree.root(vid);
        }
        self.tree.lookup(vid, &path)
    }

    /// Find the entry named by a book id or `vid:/path` string
    pub fn resolve(&self, target: &str) -> Result<EntryId, CatalogError> {
        let parsed: Target = target
            .parse()
            .map_err(|_| CatalogError::NotFound(target.to_string()))?;
        parsed
            .find(&self.tree)
            .ok_or_else(|| CatalogError::NotFound(target.to_string()))
    }

    /// Absolute filesystem path of an entry
    pub fn full_path(&self, id: EntryId) -> Result<PathBuf, CatalogError> {
        let entry = self.get(id)?;
        let vault = self
            .vaults
            .get(&entry.vid)
            .ok_or_else(|| CatalogError::VaultNotLoaded(entry.vid.clone()))?;
        Ok(vault.root.join(entry.path.trim_start_matches('/')))
    }

    /// Display name of a vault: configured name, else its directory name
    pub fn vault_name(&self, vid: &str) -> String {
        if let Some(info) = self.vaults.get(vid) {
            return info.name.clone();
        }
        self.config
            .vaults()
            .into_iter()
            .find(|v| v.id == vid)
            .map(|v| match v.name {
                Some(name) if !name.trim().is_empty() => name,
                _ => dir_name(&self.config.resolve_root(&v.path), vid),
            })
            .unwrap_or_else(|| vid.to_string())
    }

    /// Vaults loaded in the last pass, by id
    pub fn vaults(&self) -> impl Iterator<Item = &VaultInfo> {
        self.vaults.values()
    }

    /// Books of one vault, or of all vaults
    pub fn books(&self, vid: Option<&str>) -> Vec<EntryId> {
        self.tree
            .roots()
            .filter(|(v, _)| vid.map_or(true, |want| want == *v))
            .flat_map(|(_, root)| self.tree.books_under(root))
            .collect()
    }

    /// Tracked books not currently found on disk, sorted by id
    pub fn lost_books(&self) -> Vec<EntryId> {
        self.tree
            .tracked()
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| self.tree.get(*id).is_some_and(|e| e.lost))
            .collect()
    }

    pub fn stats(&self) -> TreeStats {
        self.tree.stats()
    }

    fn get(&self, id: EntryId) -> Result<&Entry, CatalogError> {
        self.tree
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(format!("entry {:?}", id)))
    }

    // ==================== Identity and metadata ====================

    /// Give a book a stable id on first use and persist its record
    ///
    /// If the record cannot be saved the id is withdrawn again.
    pub fn ensure_book_id(&mut self, id: EntryId) -> Result<BookId, CatalogError> {
        let entry = self.get(id)?;
        if let Some(bid) = entry.bid() {
            return Ok(bid.clone());
        }
        if entry.is_folder() {
            return Err(CatalogError::NotABook(entry.key()));
        }

        let bid = loop {
            let candidate = BookId::generate();
            if self.tree.book_by_id(&candidate).is_none() {
                break candidate;
            }
        };
        self.set_bid(id, Some(bid.clone()));
        self.tree.register_id(bid.clone(), id);

        if let Err(e) = self.persist(id) {
            self.set_bid(id, None);
            self.tree.unregister_id(&bid);
            return Err(e);
        }

        if let Some(entry) = self.tree.get(id) {
            info!("Tracking {} as {}", entry.key(), bid);
        }
        Ok(bid)
    }

    /// Persist one book's record, assigning an id first if needed
    pub fn save_book(&mut self, id: EntryId) -> Result<BookId, CatalogError> {
        let entry = self.get(id)?;
        match entry.bid().cloned() {
            None => self.ensure_book_id(id),
            Some(bid) => {
                self.persist(id)?;
                Ok(bid)
            }
        }
    }

    /// Apply an edit, save the record, and rebuild the display tree if the
    /// current grouping or ordering is affected
    pub fn update_book(&mut self, id: EntryId, edit: &BookEdit) -> Result<EditEffect, CatalogError> {
        let entry = self.get(id)?;
        if entry.is_folder() {
            return Err(CatalogError::NotABook(entry.key()));
        }
        let untracked = entry.bid().is_none();

        let effect = match self.tree.get_mut(id).and_then(Entry::as_book_mut) {
            Some(book) => edit.apply(&mut book.meta),
            None => EditEffect::default(),
        };

        // The edit stays in memory even when saving fails
        let saved = if effect.any() || untracked {
            self.save_book(id).map(|_| ())
        } else {
            Ok(())
        };
        if self.display_affected(id, &effect) {
            debug!("Edit changes the current view; rebuilding");
            self.rebuild_display();
        }
        saved.map(|_| effect)
    }

    fn display_affected(&self, id: EntryId, effect: &EditEffect) -> bool {
        let in_view = match (self.tree.get(id), self.current_vault()) {
            (Some(entry), Some(vid)) => entry.vid == vid,
            _ => false,
        };
        let grouping = match self.view.mode {
            DisplayMode::Path => false,
            DisplayMode::Tag => effect.tags,
            DisplayMode::Author => effect.authors,
            DisplayMode::Year => effect.publish_year,
        };
        in_view && (effect.title || grouping)
    }

    fn set_bid(&mut self, id: EntryId, bid: Option<BookId>) {
        if let Some(book) = self.tree.get_mut(id).and_then(Entry::as_book_mut) {
            book.bid = bid;
        }
    }

    fn record_for(&self, id: EntryId) -> Option<MetadataRecord> {
        let entry = self.tree.get(id)?;
        let book = entry.as_book()?;
        Some(MetadataRecord {
            vid: entry.vid.clone(),
            bid: book.bid.clone()?,
            path: entry.path.clone(),
            name: Some(entry.name.clone()),
            ext: Some(book.ext.clone()),
            meta: book.meta.clone(),
        })
    }

    fn persist(&mut self, id: EntryId) -> Result<(), CatalogError> {
        let record = self
            .record_for(id)
            .ok_or_else(|| CatalogError::NotFound(format!("entry {:?}", id)))?;
        self.store.save(&record)?;
        debug!("Saved record {} ({})", record.bid, index_key(&record.vid, &record.path));
        Ok(())
    }

    // ==================== Display ====================

    /// Vault the display tree shows
    pub fn current_vault(&self) -> Option<String> {
        self.view
            .vault
            .clone()
            .or_else(|| self.config.current_vault_id())
    }

    /// Change what the display tree shows and rebuild it
    pub fn set_display(&mut self, vault: Option<String>, mode: DisplayMode, ascending: bool) {
        self.view = ViewSettings {
            vault,
            mode,
            ascending,
        };
        self.rebuild_display();
    }

    pub fn rebuild_display(&mut self) {
        let vid = self.current_vault();
        self.display = match vid.as_deref().and_then(|v| self.tree.root(v)) {
            Some(root) => display::build(&self.tree, root, self.view.mode, self.view.ascending),
            None => DisplayFolder {
                name: vid.map(|v| self.vault_name(&v)).unwrap_or_default(),
                ..DisplayFolder::default()
            },
        };
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            generation: self.passes,
            tree: self.tree.clone(),
            display: self.display.clone(),
            view: self.view.clone(),
            vaults: self.vaults.values().cloned().collect(),
            report: self.last_report.clone(),
        }
    }
}

fn dir_name(root: &Path, fallback: &str) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BASE_VAULT_ID;
    use crate::error::RecordError;
    use crate::storage::{FileStore, MemoryStore, StorageError, StorageResult, StoredRecord};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const LIB: &str = BASE_VAULT_ID;

    fn touch(base: &Path, rel: &str) {
        let path = base.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn test_config(temp_dir: &TempDir) -> Config {
        let base = temp_dir.path().join("books");
        fs::create_dir_all(&base).unwrap();
        Config {
            data_dir: temp_dir.path().join("data"),
            base_dir: base,
            extensions: vec!["pdf".to_string(), "epub".to_string()],
            ..Config::default()
        }
    }

    fn catalog(temp_dir: &TempDir) -> Catalog {
        Catalog::new(test_config(temp_dir), Box::new(MemoryStore::new()))
    }

    fn books_dir(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("books")
    }

    fn tracked(catalog: &mut Catalog, path: &str) -> (EntryId, BookId) {
        let id = catalog.entry_by_path(LIB, path).unwrap();
        let bid = catalog.ensure_book_id(id).unwrap();
        (id, bid)
    }

    struct FailingStore;

    impl MetadataStore for FailingStore {
        fn load_all(&self) -> StorageResult<Vec<Result<StoredRecord, RecordError>>> {
            Err(StorageError::NotFound {
                path: PathBuf::from("/nowhere"),
            })
        }

        fn save(&mut self, _record: &MetadataRecord) -> StorageResult<()> {
            Err(StorageError::from_io(
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                PathBuf::from("/nowhere"),
            ))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn test_worked_example() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "novels/a.pdf");
        touch(&books_dir(&temp_dir), "novels/sub/b.pdf");
        let mut catalog = catalog(&temp_dir);

        let report = catalog.synchronize();

        assert!(!report.has_warnings());
        assert_eq!(report.vaults_scanned, vec![LIB]);
        let display = catalog.display();
        assert_eq!(display.count, 2);
        let novels = display.folder("novels").unwrap();
        assert_eq!(novels.books().count(), 1);
        assert_eq!(novels.folder("sub").unwrap().books().count(), 1);
        assert_eq!(display.name, "books");
    }

    #[test]
    fn test_synchronize_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "a.pdf");
        touch(&books_dir(&temp_dir), "x/b.epub");
        touch(&books_dir(&temp_dir), "x/c.pdf");
        let mut catalog = catalog(&temp_dir);
        catalog.synchronize();
        tracked(&mut catalog, "/x/b.epub");

        let first = catalog.synchronize();
        let root = catalog.tree().root(LIB).unwrap();
        let outline = catalog.tree().outline(root);
        let ids = catalog.tree().tracked();

        let second = catalog.synchronize();
        assert_eq!(catalog.tree().outline(root), outline);
        assert_eq!(catalog.tree().tracked(), ids);
        assert_eq!(first.stats, second.stats);
        assert_eq!(second.entries_added, 0);
        assert_eq!(second.entries_removed, 0);
    }

    #[test]
    fn test_deletion_semantics() {
        let temp_dir = TempDir::new().unwrap();
        let books = books_dir(&temp_dir);
        touch(&books, "keep/tracked.pdf");
        touch(&books, "keep/untracked.pdf");
        let mut catalog = catalog(&temp_dir);
        catalog.synchronize();
        let (_, bid) = tracked(&mut catalog, "/keep/tracked.pdf");

        fs::remove_file(books.join("keep/tracked.pdf")).unwrap();
        fs::remove_file(books.join("keep/untracked.pdf")).unwrap();
        catalog.synchronize();

        assert!(catalog.entry_by_path(LIB, "/keep/untracked.pdf").is_none());
        let lost = catalog.book_by_id(&bid).unwrap();
        assert!(catalog.entry(lost).unwrap().lost);
        assert_eq!(catalog.lost_books(), vec![lost]);
        assert!(catalog.tree().is_attached(lost));

        // And back again
        touch(&books, "keep/tracked.pdf");
        let report = catalog.synchronize();
        assert_eq!(report.books_recovered, 1);
        let found = catalog.book_by_id(&bid).unwrap();
        assert!(!catalog.entry(found).unwrap().lost);
        assert!(catalog.lost_books().is_empty());
    }

    #[test]
    fn test_lost_book_survives_folder_removal() {
        let temp_dir = TempDir::new().unwrap();
        let books = books_dir(&temp_dir);
        touch(&books, "series/one.pdf");
        let mut catalog = catalog(&temp_dir);
        catalog.synchronize();
        let (_, bid) = tracked(&mut catalog, "/series/one.pdf");

        fs::remove_dir_all(books.join("series")).unwrap();
        catalog.synchronize();

        let id = catalog.book_by_id(&bid).unwrap();
        let entry = catalog.entry(id).unwrap();
        assert!(entry.lost);
        assert_eq!(entry.path, "/series/one.pdf");
        let parent = catalog.entry(entry.parent.unwrap()).unwrap();
        assert_eq!(parent.path, "/series");
        assert!(parent.lost);
        assert_eq!(catalog.resolve("library:/series/one.pdf").unwrap(), id);
    }

    #[test]
    fn test_record_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "scifi/dune.epub");
        let config = test_config(&temp_dir);

        let bid = {
            let mut catalog = Catalog::new(config.clone(), Box::new(FileStore::new(&config.data_dir)));
            catalog.synchronize();
            let id = catalog.entry_by_path(LIB, "/scifi/dune.epub").unwrap();
            let edit = BookEdit {
                add_tags: vec!["classic".into()],
                authors: Some(vec!["Frank Herbert".into()]),
                publish_year: Some(Some(1965)),
                ..BookEdit::default()
            };
            catalog.update_book(id, &edit).unwrap();
            catalog.entry(id).unwrap().bid().cloned().unwrap()
        };

        // A field written by some other tool
        let file = FileStore::new(&config.data_dir).record_path(bid.as_str());
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        value["rating"] = json!(4);
        fs::write(&file, value.to_string()).unwrap();

        let mut fresh = Catalog::new(config.clone(), Box::new(FileStore::new(&config.data_dir)));
        fresh.synchronize();
        let id = fresh.book_by_id(&bid).unwrap();
        let entry = fresh.entry(id).unwrap();
        assert_eq!(entry.vid, LIB);
        assert_eq!(entry.path, "/scifi/dune.epub");
        assert!(!entry.lost);
        let meta = &entry.as_book().unwrap().meta;
        assert_eq!(meta.tags, vec!["classic"]);
        assert_eq!(meta.authors, vec!["Frank Herbert"]);
        assert_eq!(meta.publish_year, Some(1965));
        assert_eq!(meta.extra["rating"], json!(4));

        // Saving again keeps the foreign field
        fresh.save_book(id).unwrap();
        let saved = fs::read_to_string(&file).unwrap();
        assert!(saved.contains("rating"));
    }

    #[test]
    fn test_unloaded_vault_records_are_kept() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryStore::with_fields(vec![json!({
            "vid": "elsewhere", "bid": "abc", "path": "/a.pdf"
        })
        .as_object()
        .cloned()
        .unwrap()]);
        let mut catalog = Catalog::new(test_config(&temp_dir), Box::new(store));

        let report = catalog.synchronize();

        assert_eq!(report.records_skipped, 1);
        assert!(report.warnings.iter().any(|w| matches!(
            w,
            SyncWarning::Record(RecordError::VaultNotLoaded { .. })
        )));
        assert!(catalog.book_by_id(&BookId::parse("abc").unwrap()).is_none());
    }

    #[test]
    fn test_invalid_and_unreachable_vaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.vaults = vec![
            VaultConfig {
                id: "bad:id".into(),
                path: "/tmp".into(),
                name: None,
            },
            VaultConfig {
                id: "missing".into(),
                path: "@does-not-exist".into(),
                name: None,
            },
            VaultConfig {
                id: "unset".into(),
                path: String::new(),
                name: None,
            },
            VaultConfig {
                id: LIB.into(),
                path: "/tmp".into(),
                name: None,
            },
        ];
        let mut catalog = Catalog::new(config, Box::new(MemoryStore::new()));

        let report = catalog.synchronize();

        assert_eq!(report.vaults_scanned, vec![LIB]);
        assert_eq!(report.vaults_skipped.len(), 4);
        let config_warnings = report.warnings.iter().filter(|w| w.kind() == "config").count();
        assert_eq!(config_warnings, 4);
        assert!(catalog.tree().root("missing").is_none());
    }

    #[test]
    fn test_unreachable_vault_keeps_known_books() {
        let temp_dir = TempDir::new().unwrap();
        let extra = temp_dir.path().join("extra");
        touch(&extra, "e.pdf");
        let mut config = test_config(&temp_dir);
        config.add_vault("extra", extra.to_str().unwrap(), None).unwrap();
        let mut catalog = Catalog::new(config, Box::new(MemoryStore::new()));
        catalog.synchronize();
        let id = catalog.entry_by_path("extra", "/e.pdf").unwrap();
        let bid = catalog.ensure_book_id(id).unwrap();

        fs::rename(&extra, temp_dir.path().join("extra-moved")).unwrap();
        let report = catalog.synchronize();

        assert_eq!(report.vaults_skipped, vec!["extra"]);
        assert!(report.warnings.iter().any(|w| w.kind() == "config"));
        assert_eq!(catalog.book_by_id(&bid), Some(id));
        assert_eq!(catalog.entry_by_path("extra", "/e.pdf"), Some(id));
        assert!(!catalog.entry(id).unwrap().lost);
    }

    #[test]
    fn test_record_with_bad_field_keeps_identity() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "old.pdf");
        let store = MemoryStore::with_fields(vec![json!({
            "vid": LIB, "bid": "keepme0000000001", "path": "/old.pdf", "publishYear": "c. 1850"
        })
        .as_object()
        .cloned()
        .unwrap()]);
        let mut catalog = Catalog::new(test_config(&temp_dir), Box::new(store));

        let report = catalog.synchronize();

        assert!(!report.has_warnings());
        let bid = BookId::parse("keepme0000000001").unwrap();
        let id = catalog.entry_by_path(LIB, "/old.pdf").unwrap();
        assert_eq!(catalog.book_by_id(&bid), Some(id));
        assert_eq!(catalog.ensure_book_id(id).unwrap(), bid);

        let book = catalog.entry(id).unwrap().as_book().unwrap();
        assert_eq!(book.meta.publish_year, None);
        assert_eq!(book.meta.extra.get("publishYear"), Some(&json!("c. 1850")));
    }

    #[test]
    fn test_removed_vault_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let extra = temp_dir.path().join("extra");
        touch(&extra, "e.pdf");
        let mut config = test_config(&temp_dir);
        config.add_vault("extra", extra.to_str().unwrap(), Some("Extra".into())).unwrap();
        let mut catalog = Catalog::new(config.clone(), Box::new(MemoryStore::new()));
        catalog.synchronize();
        assert_eq!(catalog.vault_name("extra"), "Extra");
        assert_eq!(catalog.books(Some("extra")).len(), 1);

        config.remove_vault("extra");
        catalog.set_config(config);
        catalog.synchronize();

        assert!(catalog.tree().root("extra").is_none());
        assert!(catalog.books(Some("extra")).is_empty());
        assert_eq!(catalog.vaults().count(), 1);
    }

    #[test]
    fn test_store_failure_is_a_warning() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "a.pdf");
        let mut catalog = Catalog::new(test_config(&temp_dir), Box::new(FailingStore));

        let report = catalog.synchronize();
        assert!(report.warnings.iter().any(|w| w.kind() == "store"));
        assert_eq!(report.stats.books, 1);

        // Saving fails and the id is withdrawn
        let id = catalog.entry_by_path(LIB, "/a.pdf").unwrap();
        assert!(matches!(
            catalog.ensure_book_id(id),
            Err(CatalogError::Storage(_))
        ));
        assert!(catalog.entry(id).unwrap().bid().is_none());
        assert!(catalog.tree().tracked().is_empty());
    }

    #[test]
    fn test_ensure_book_id_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "a.pdf");
        let mut catalog = catalog(&temp_dir);
        catalog.synchronize();

        let (id, bid) = tracked(&mut catalog, "/a.pdf");
        assert_eq!(catalog.ensure_book_id(id).unwrap(), bid);
        assert_eq!(catalog.resolve(bid.as_str()).unwrap(), id);

        let root = catalog.tree().root(LIB).unwrap();
        assert!(matches!(
            catalog.ensure_book_id(root),
            Err(CatalogError::NotABook(_))
        ));
    }

    #[test]
    fn test_update_book_rebuilds_grouped_view() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "a.pdf");
        touch(&books_dir(&temp_dir), "b.pdf");
        let mut catalog = catalog(&temp_dir);
        catalog.synchronize();
        catalog.set_display(None, DisplayMode::Tag, true);
        assert_eq!(catalog.display().folder("unknown").unwrap().count, 2);

        let id = catalog.entry_by_path(LIB, "/a.pdf").unwrap();
        let edit = BookEdit {
            add_tags: vec!["a".into(), "b".into()],
            ..BookEdit::default()
        };
        let effect = catalog.update_book(id, &edit).unwrap();

        assert!(effect.tags);
        let display = catalog.display();
        assert_eq!(display.folder("a").unwrap().books().collect::<Vec<_>>(), vec![id]);
        assert_eq!(display.folder("b").unwrap().books().collect::<Vec<_>>(), vec![id]);
        assert_eq!(display.folder("unknown").unwrap().count, 1);
        assert!(catalog.entry(id).unwrap().bid().is_some());
    }

    #[test]
    fn test_full_path() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "x/a.pdf");
        let mut catalog = catalog(&temp_dir);
        catalog.synchronize();

        let id = catalog.entry_by_path(LIB, "x/a.pdf").unwrap();
        let full = catalog.full_path(id).unwrap();
        assert_eq!(full, books_dir(&temp_dir).join("x").join("a.pdf"));
        assert!(full.exists());
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(
            "lib:/a//b.pdf".parse::<Target>().unwrap(),
            Target::Path {
                vid: "lib".into(),
                path: "/a/b.pdf".into()
            }
        );
        assert_eq!(
            "abc".parse::<Target>().unwrap(),
            Target::Id(BookId::parse("abc").unwrap())
        );
        assert!("".parse::<Target>().is_err());
    }

    #[test]
    fn test_snapshot_lookups() {
        let temp_dir = TempDir::new().unwrap();
        touch(&books_dir(&temp_dir), "a.pdf");
        let mut catalog = catalog(&temp_dir);
        catalog.synchronize();
        let (_, bid) = tracked(&mut catalog, "/a.pdf");

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.book_by_id(&bid).unwrap().path, "/a.pdf");
        assert!(snapshot.entry_by_path(LIB, "a.pdf").is_some());
        assert_eq!(snapshot.vaults.len(), 1);

        let id = snapshot.tree.book_by_id(&bid).unwrap();
        assert_eq!(
            snapshot.full_path(id).unwrap(),
            books_dir(&temp_dir).join("a.pdf")
        );
    }
}

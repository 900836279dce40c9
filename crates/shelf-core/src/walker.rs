//! Vault scanning
//!
//! Walks one vault directory level by level and brings the raw tree in line
//! with what is on disk, using a mark-and-sweep over each folder's children:
//!
//! 1. every current child is marked unseen
//! 2. the directory is listed; found folders and allowed book files are
//!    looked up in the index (or created) and marked seen
//! 3. children still unseen are pruned: untracked entries are deleted,
//!    tracked books only lose their index key so the reconciler can mark
//!    them lost
//!
//! A directory that cannot be listed keeps its previous children.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SyncWarning;
use crate::report::SyncReport;
use crate::tree::{split_extension, Entry, EntryId, EntryKind, Mark, Tree};

/// Case-insensitive allow-list of book file extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: HashSet<String>,
}

impl ExtensionFilter {
    /// Build from extensions with or without a leading dot
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn allows(&self, ext: &str) -> bool {
        !ext.is_empty() && self.allowed.contains(&ext.to_lowercase())
    }
}

/// Scanner for a single vault root
pub struct VaultWalker<'a> {
    vid: &'a str,
    root: &'a Path,
    filter: &'a ExtensionFilter,
}

/// One directory listing entry
struct Listed {
    name: OsString,
    path: PathBuf,
}

enum Kind {
    Dir,
    File,
    Skip,
}

enum Prune {
    Subtree,
    Entry,
    IndexOnly,
}

impl<'a> VaultWalker<'a> {
    pub fn new(vid: &'a str, root: &'a Path, filter: &'a ExtensionFilter) -> Self {
        Self { vid, root, filter }
    }

    /// Synchronize `folder` (at vault-relative `sub_path`) and everything
    /// below it with the filesystem
    pub fn walk(&self, tree: &mut Tree, folder: EntryId, sub_path: &str, report: &mut SyncReport) {
        for child in tree.children(folder).to_vec() {
            if let Some(entry) = tree.get_mut(child) {
                entry.mark = Mark::Unseen;
            }
        }

        let dir = self.root.join(sub_path.trim_start_matches('/'));
        let listing = match list_dir(&dir, report) {
            Ok(listing) => listing,
            Err(e) => {
                report.warn(SyncWarning::io(&dir, &e));
                for child in tree.children(folder).to_vec() {
                    if let Some(entry) = tree.get_mut(child) {
                        entry.mark = Mark::Seen;
                    }
                }
                return;
            }
        };

        for item in listing {
            let Some(name) = item.name.to_str() else {
                report.warn(SyncWarning::Io {
                    path: item.path.clone(),
                    reason: "file name is not valid UTF-8".to_string(),
                });
                continue;
            };
            let path = format!("{}/{}", sub_path, name);

            let kind = match classify(&item.path) {
                Ok(kind) => kind,
                Err(e) => {
                    report.warn(SyncWarning::io(&item.path, &e));
                    // Keep whatever we knew about it
                    if let Some(known) = tree.lookup(self.vid, &path) {
                        if let Some(entry) = tree.get_mut(known) {
                            entry.mark = Mark::Seen;
                        }
                    }
                    continue;
                }
            };

            match kind {
                Kind::Dir => {
                    if name.starts_with('.') {
                        continue;
                    }
                    let child = self.find_or_create(tree, folder, &path, name, None, report);
                    self.walk(tree, child, &path, report);
                }
                Kind::File => {
                    let (stem, ext) = split_extension(name);
                    if !self.filter.allows(ext) {
                        continue;
                    }
                    self.find_or_create(tree, folder, &path, stem, Some(ext), report);
                }
                Kind::Skip => {
                    debug!("Skipping {:?}", item.path);
                }
            }
        }

        self.sweep(tree, folder, report);
    }

    /// Look up the entry at `path`, creating it when missing or of the wrong
    /// kind; `ext` is `Some` for books
    fn find_or_create(
        &self,
        tree: &mut Tree,
        parent: EntryId,
        path: &str,
        name: &str,
        ext: Option<&str>,
        report: &mut SyncReport,
    ) -> EntryId {
        let wants_folder = ext.is_none();
        let existing = tree
            .lookup(self.vid, path)
            .filter(|id| tree.get(*id).is_some_and(|e| e.is_folder() == wants_folder));

        let id = match existing {
            Some(id) => {
                if tree.get(id).and_then(|e| e.parent) != Some(parent) {
                    tree.attach(parent, id);
                }
                id
            }
            None => {
                let entry = match ext {
                    None => Entry::folder(self.vid, path, name),
                    Some(ext) => Entry::book(self.vid, path, name, ext),
                };
                let id = tree.insert(entry);
                tree.attach(parent, id);
                if let Some(displaced) = tree.index_insert(id) {
                    debug!(
                        "{}:{} changed kind, old entry {:?} left to sweep",
                        self.vid, path, displaced
                    );
                }
                debug!("New entry {}:{}", self.vid, path);
                report.entries_added += 1;
                id
            }
        };

        if let Some(entry) = tree.get_mut(id) {
            entry.mark = Mark::Seen;
            entry.lost = false;
        }
        id
    }

    /// Prune children of `folder` that were not seen in this listing
    fn sweep(&self, tree: &mut Tree, folder: EntryId, report: &mut SyncReport) {
        for child in tree.children(folder).to_vec() {
            let Some(entry) = tree.get(child) else {
                continue;
            };
            if entry.mark == Mark::Seen || entry.lost {
                continue;
            }

            let key = entry.key();
            let prune = match &entry.kind {
                EntryKind::Folder(_) => Prune::Subtree,
                EntryKind::Book(book) if book.bid.is_none() => Prune::Entry,
                EntryKind::Book(_) => Prune::IndexOnly,
            };

            match prune {
                Prune::Subtree => {
                    debug!("Folder gone: {}", key);
                    report.entries_removed += tree.purge(child);
                }
                Prune::Entry => {
                    debug!("Book gone: {}", key);
                    tree.remove(child);
                    report.entries_removed += 1;
                }
                Prune::IndexOnly => {
                    debug!("Tracked book gone, leaving for reconciliation: {}", key);
                    tree.index_remove(child);
                }
            }
        }
    }
}

/// List a directory sorted by name; per-entry failures become warnings
fn list_dir(dir: &Path, report: &mut SyncReport) -> io::Result<Vec<Listed>> {
    let mut listing = Vec::new();
    for entry in fs::read_dir(dir)? {
        match entry {
            Ok(entry) => listing.push(Listed {
                name: entry.file_name(),
                path: entry.path(),
            }),
            Err(e) => report.warn(SyncWarning::io(dir, &e)),
        }
    }
    listing.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listing)
}

/// Directory or file, following file symlinks but not directory symlinks
fn classify(path: &Path) -> io::Result<Kind> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        let target = fs::metadata(path)?;
        return Ok(if target.is_file() { Kind::File } else { Kind::Skip });
    }
    Ok(if meta.is_dir() {
        Kind::Dir
    } else if meta.is_file() {
        Kind::File
    } else {
        Kind::Skip
    })
}

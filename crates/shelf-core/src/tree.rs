//! Raw catalog tree
//!
//! Folders and books live in a flat arena addressed by [`EntryId`]. Parent
//! and child links are ids, so the index (by `vid:path`), the id map (by
//! [`BookId`]) and the per-vault roots can all point at the same entry
//! without shared ownership.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::models::{BookId, BookMeta};

/// Handle of an entry in the [`Tree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(usize);

/// Mark used by the walker's mark-and-sweep
///
/// Only meaningful while a walk is in progress: children are reset to
/// `Unseen`, flipped to `Seen` when found on disk, and whatever is still
/// `Unseen` afterwards gets pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mark {
    Unseen,
    #[default]
    Seen,
}

/// A folder's owned children, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Folder {
    pub children: Vec<EntryId>,
}

/// A book file, tracked once it has a [`BookId`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Book {
    /// File extension as found on disk (without the dot)
    pub ext: String,
    pub bid: Option<BookId>,
    pub meta: BookMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Folder(Folder),
    Book(Book),
}

/// A node of the raw tree
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub parent: Option<EntryId>,
    pub vid: String,
    /// Vault-relative path starting with `/`; empty for vault roots
    pub path: String,
    pub name: String,
    /// Remembered but not currently found on disk
    pub lost: bool,
    pub(crate) mark: Mark,
    pub kind: EntryKind,
}

impl Entry {
    pub fn folder(vid: &str, path: &str, name: &str) -> Self {
        Self {
            parent: None,
            vid: vid.to_string(),
            path: path.to_string(),
            name: name.to_string(),
            lost: false,
            mark: Mark::Seen,
            kind: EntryKind::Folder(Folder::default()),
        }
    }

    pub fn book(vid: &str, path: &str, name: &str, ext: &str) -> Self {
        Self {
            parent: None,
            vid: vid.to_string(),
            path: path.to_string(),
            name: name.to_string(),
            lost: false,
            mark: Mark::Seen,
            kind: EntryKind::Book(Book {
                ext: ext.to_string(),
                ..Book::default()
            }),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, EntryKind::Folder(_))
    }

    pub fn as_book(&self) -> Option<&Book> {
        match &self.kind {
            EntryKind::Book(book) => Some(book),
            EntryKind::Folder(_) => None,
        }
    }

    pub fn as_book_mut(&mut self) -> Option<&mut Book> {
        match &mut self.kind {
            EntryKind::Book(book) => Some(book),
            EntryKind::Folder(_) => None,
        }
    }

    pub fn children(&self) -> &[EntryId] {
        match &self.kind {
            EntryKind::Folder(folder) => &folder.children,
            EntryKind::Book(_) => &[],
        }
    }

    /// Book id, if this is a tracked book
    pub fn bid(&self) -> Option<&BookId> {
        self.as_book().and_then(|b| b.bid.as_ref())
    }

    /// Title for display: the metadata title, else the entry name
    pub fn title(&self) -> &str {
        self.as_book()
            .and_then(|b| b.meta.title.as_deref())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.name)
    }

    pub fn key(&self) -> String {
        index_key(&self.vid, &self.path)
    }
}

/// Index key of an entry
pub fn index_key(vid: &str, path: &str) -> String {
    format!("{}:{}", vid, path)
}

/// Normalize a vault-relative path: slash separated, leading `/`, no empty
/// or `.` segments. The vault root normalizes to the empty string.
pub fn normalize_entry_path(path: &str) -> String {
    let joined = path
        .split(['/', '\\'])
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        joined
    } else {
        format!("/{}", joined)
    }
}

/// Parent of a normalized path (`""` for top-level entries)
pub fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Last segment of a normalized path
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// Split a file name into (stem, extension); the extension has no dot
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (name, ""),
    }
}

/// Arena of entries plus the index, id map and vault roots
#[derive(Debug, Clone, Default)]
pub struct Tree {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    index: HashMap<String, EntryId>,
    ids: HashMap<BookId, EntryId>,
    roots: BTreeMap<String, EntryId>,
}

/// Entry counts for status output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub folders: usize,
    pub books: usize,
    pub tracked: usize,
    pub lost: usize,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Arena ====================

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.get(id).is_some()
    }

    /// Store a new, unattached entry
    pub fn insert(&mut self, entry: Entry) -> EntryId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                EntryId(slot)
            }
            None => {
                self.slots.push(Some(entry));
                EntryId(self.slots.len() - 1)
            }
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn children(&self, id: EntryId) -> &[EntryId] {
        self.get(id).map(Entry::children).unwrap_or(&[])
    }

    /// Make `child` the last child of `parent`, detaching it first if needed
    pub fn attach(&mut self, parent: EntryId, child: EntryId) {
        self.detach(child);
        if let Some(EntryKind::Folder(folder)) = self.get_mut(parent).map(|e| &mut e.kind) {
            folder.children.push(child);
        } else {
            return;
        }
        if let Some(entry) = self.get_mut(child) {
            entry.parent = Some(parent);
        }
    }

    /// Unlink `child` from its parent, keeping it in the arena
    pub fn detach(&mut self, child: EntryId) {
        let Some(parent) = self.get(child).and_then(|e| e.parent) else {
            return;
        };
        if let Some(EntryKind::Folder(folder)) = self.get_mut(parent).map(|e| &mut e.kind) {
            folder.children.retain(|c| *c != child);
        }
        if let Some(entry) = self.get_mut(child) {
            entry.parent = None;
        }
    }

    /// Whether the parent chain of `id` reaches its vault root intact
    pub fn is_attached(&self, id: EntryId) -> bool {
        let mut current = id;
        for _ in 0..=self.slots.len() {
            let Some(entry) = self.get(current) else {
                return false;
            };
            match entry.parent {
                None => return self.roots.get(&entry.vid) == Some(&current),
                Some(parent) => {
                    if !self.children(parent).contains(&current) {
                        return false;
                    }
                    current = parent;
                }
            }
        }
        false
    }

    // ==================== Index ====================

    pub fn lookup(&self, vid: &str, path: &str) -> Option<EntryId> {
        self.index.get(&index_key(vid, path)).copied()
    }

    /// Point the index key of `id` at it, returning the entry it displaced
    pub(crate) fn index_insert(&mut self, id: EntryId) -> Option<EntryId> {
        let key = self.get(id)?.key();
        self.index.insert(key, id).filter(|old| *old != id)
    }

    /// Drop the index key of `id`, but only if it still points at `id`
    pub(crate) fn index_remove(&mut self, id: EntryId) {
        let Some(key) = self.get(id).map(Entry::key) else {
            return;
        };
        if self.index.get(&key) == Some(&id) {
            self.index.remove(&key);
        }
    }

    // ==================== Identities ====================

    pub fn book_by_id(&self, bid: &BookId) -> Option<EntryId> {
        self.ids.get(bid).copied()
    }

    /// All tracked books, sorted by id
    pub fn tracked(&self) -> Vec<(BookId, EntryId)> {
        let mut out: Vec<_> = self.ids.iter().map(|(b, e)| (b.clone(), *e)).collect();
        out.sort();
        out
    }

    pub(crate) fn register_id(&mut self, bid: BookId, id: EntryId) {
        self.ids.insert(bid, id);
    }

    pub(crate) fn unregister_id(&mut self, bid: &BookId) -> Option<EntryId> {
        self.ids.remove(bid)
    }

    // ==================== Roots ====================

    pub fn root(&self, vid: &str) -> Option<EntryId> {
        self.roots.get(vid).copied()
    }

    pub fn roots(&self) -> impl Iterator<Item = (&str, EntryId)> {
        self.roots.iter().map(|(vid, id)| (vid.as_str(), *id))
    }

    /// Get the root folder of a vault, creating it on first use
    pub fn ensure_root(&mut self, vid: &str, name: &str) -> EntryId {
        if let Some(root) = self.root(vid) {
            if let Some(entry) = self.get_mut(root) {
                entry.name = name.to_string();
            }
            return root;
        }
        let root = self.insert(Entry::folder(vid, "", name));
        self.roots.insert(vid.to_string(), root);
        root
    }

    // ==================== Removal ====================

    /// Forget a vault entirely: its subtree and the identities of its books
    ///
    /// Returns the number of destroyed entries.
    pub(crate) fn drop_vault(&mut self, vid: &str) -> usize {
        let Some(root) = self.roots.remove(vid) else {
            return 0;
        };
        let mut destroyed = self.purge(root);

        let orphaned: Vec<(BookId, EntryId)> = self
            .ids
            .iter()
            .filter(|(_, id)| self.get(**id).is_some_and(|e| e.vid == vid))
            .map(|(bid, id)| (bid.clone(), *id))
            .collect();
        for (bid, id) in orphaned {
            self.ids.remove(&bid);
            self.release(id);
            destroyed += 1;
        }
        destroyed
    }

    /// Delete an untracked entry outright
    pub(crate) fn remove(&mut self, id: EntryId) {
        self.detach(id);
        self.index_remove(id);
        self.release(id);
    }

    /// Remove a subtree from the tree and the index
    ///
    /// Untracked entries are destroyed. Tracked books are only unlinked and
    /// unindexed so their identity and metadata survive for reconciliation.
    /// Returns the number of destroyed entries.
    pub(crate) fn purge(&mut self, id: EntryId) -> usize {
        self.detach(id);
        self.purge_detached(id)
    }

    fn purge_detached(&mut self, id: EntryId) -> usize {
        let children = self.children(id).to_vec();
        let mut destroyed = 0;
        for child in children {
            if let Some(entry) = self.get_mut(child) {
                entry.parent = None;
            }
            destroyed += self.purge_detached(child);
        }

        self.index_remove(id);
        let tracked = self.get(id).and_then(Entry::bid).is_some();
        if tracked {
            if let Some(entry) = self.get_mut(id) {
                entry.parent = None;
            }
            destroyed
        } else {
            self.release(id);
            destroyed + 1
        }
    }

    fn release(&mut self, id: EntryId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            if slot.take().is_some() {
                self.free.push(id.0);
            }
        }
    }

    // ==================== Traversal ====================

    /// Ids of all books under `id` (depth first, child order)
    pub fn books_under(&self, id: EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        self.collect_books(id, &mut out);
        out
    }

    fn collect_books(&self, id: EntryId, out: &mut Vec<EntryId>) {
        let Some(entry) = self.get(id) else {
            return;
        };
        match &entry.kind {
            EntryKind::Book(_) => out.push(id),
            EntryKind::Folder(folder) => {
                for child in &folder.children {
                    self.collect_books(*child, out);
                }
            }
        }
    }

    /// Indented text outline of a subtree
    ///
    /// Each line is `path` for folders and `path [bid] (lost)` for books, in
    /// child order. Two passes over an unchanged vault produce the same
    /// outline even when entry ids differ.
    pub fn outline(&self, id: EntryId) -> Vec<String> {
        let mut lines = Vec::new();
        self.outline_into(id, 0, &mut lines);
        lines
    }

    fn outline_into(&self, id: EntryId, depth: usize, lines: &mut Vec<String>) {
        let Some(entry) = self.get(id) else {
            return;
        };
        let mut line = format!("{}{}", "  ".repeat(depth), entry.path);
        if let Some(bid) = entry.bid() {
            line.push_str(&format!(" [{}]", bid));
        }
        if entry.lost {
            line.push_str(" (lost)");
        }
        lines.push(line);
        for child in entry.children() {
            self.outline_into(*child, depth + 1, lines);
        }
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        for entry in self.slots.iter().flatten() {
            match &entry.kind {
                EntryKind::Folder(_) => stats.folders += 1,
                EntryKind::Book(book) => {
                    stats.books += 1;
                    if book.bid.is_some() {
                        stats.tracked += 1;
                    }
                    if entry.lost {
                        stats.lost += 1;
                    }
                }
            }
        }
        stats
    }
}

//! Merging persisted records into the walked tree
//!
//! The walker only knows what is on disk; the metadata store only knows
//! what was tracked. For every record the reconciler decides which tree node
//! carries the identity:
//!
//! - a book found on disk at the record's path adopts the identity (and any
//!   stale lost node holding it is dropped)
//! - otherwise the book is lost: it keeps (or gets) a node at the recorded
//!   path, under folders synthesized as needed
//!
//! Afterwards every tracked book's `lost` flag is recomputed from the index
//! and synthesized folders that no longer hold anything are pruned.

use std::collections::HashSet;

use tracing::debug;

use crate::error::RecordError;
use crate::models::BookId;
use crate::record::MetadataRecord;
use crate::report::SyncReport;
use crate::tree::{file_name, parent_path, split_extension, Entry, EntryId, EntryKind, Tree};

pub struct Reconciler<'a> {
    tree: &'a mut Tree,
    report: &'a mut SyncReport,
    merged: HashSet<BookId>,
}

impl<'a> Reconciler<'a> {
    pub fn new(tree: &'a mut Tree, report: &'a mut SyncReport) -> Self {
        Self {
            tree,
            report,
            merged: HashSet::new(),
        }
    }

    /// Merge records in arrival order, then restore the lost-flag invariant
    pub fn reconcile<I>(mut self, records: I)
    where
        I: IntoIterator<Item = MetadataRecord>,
    {
        for record in records {
            self.apply(record);
        }
        self.finish();
    }

    fn apply(&mut self, record: MetadataRecord) {
        let Some(root) = self.tree.root(&record.vid) else {
            self.skip(RecordError::VaultNotLoaded {
                bid: record.bid.to_string(),
                vid: record.vid.clone(),
            });
            return;
        };

        if !self.merged.insert(record.bid.clone()) {
            self.skip(RecordError::Duplicate {
                bid: record.bid.to_string(),
                path: record.path.clone(),
            });
            return;
        }

        let previous = self
            .tree
            .book_by_id(&record.bid)
            .filter(|id| self.tree.contains(*id));
        let discovered = self
            .tree
            .lookup(&record.vid, &record.path)
            .filter(|id| self.tree.get(*id).is_some_and(|e| !e.is_folder()));

        if let Some(found) = discovered {
            let owner = self.tree.get(found).and_then(Entry::bid).cloned();
            match owner {
                Some(other) if other != record.bid => {
                    self.report.warn(RecordError::Conflict {
                        bid: record.bid.to_string(),
                        vid: record.vid.clone(),
                        path: record.path.clone(),
                        other: other.to_string(),
                    });
                }
                _ => {
                    if let Some(stale) = previous.filter(|prev| *prev != found) {
                        debug!("Book {} found again at {}", record.bid, record.path);
                        self.tree.remove(stale);
                        self.report.books_recovered += 1;
                    }
                    self.bind(found, &record, false);
                    return;
                }
            }
        }

        let book = match previous {
            Some(prev) => {
                if !self.chain_matches(prev, &record.vid, &record.path) {
                    debug!("Relocating book {} to {}:{}", record.bid, record.vid, record.path);
                    self.relocate(prev, root, &record.vid, &record.path);
                    self.report.books_relocated += 1;
                }
                prev
            }
            None => {
                debug!("Book {} is lost ({}:{})", record.bid, record.vid, record.path);
                let (stem, ext) = split_extension(file_name(&record.path));
                let name = record.name.as_deref().unwrap_or(stem);
                let ext = record.ext.as_deref().unwrap_or(ext);
                let parent = self.ensure_chain(root, &record.vid, &record.path);
                let id = self
                    .tree
                    .insert(Entry::book(&record.vid, &record.path, name, ext));
                self.tree.attach(parent, id);
                id
            }
        };
        self.bind(book, &record, true);
    }

    fn skip(&mut self, error: RecordError) {
        self.report.records_skipped += 1;
        self.report.warn(error);
    }

    /// Attach identity and metadata to a node and register it
    fn bind(&mut self, id: EntryId, record: &MetadataRecord, lost: bool) {
        if let Some(entry) = self.tree.get_mut(id) {
            entry.lost = lost;
            if let Some(book) = entry.as_book_mut() {
                book.bid = Some(record.bid.clone());
                book.meta = record.meta.clone();
            }
        }
        self.tree.register_id(record.bid.clone(), id);
        self.report.records_applied += 1;
    }

    /// Whether the node sits at `vid:path` under an intact parent chain
    fn chain_matches(&self, id: EntryId, vid: &str, path: &str) -> bool {
        let Some(entry) = self.tree.get(id) else {
            return false;
        };
        if entry.vid != vid || entry.path != path {
            return false;
        }
        let parent_ok = entry
            .parent
            .and_then(|p| self.tree.get(p))
            .is_some_and(|p| p.vid == vid && p.path == parent_path(path));
        parent_ok && self.tree.is_attached(id)
    }

    /// Move a tracked book to `vid:path`, rebuilding its folder chain
    fn relocate(&mut self, id: EntryId, root: EntryId, vid: &str, path: &str) {
        self.tree.index_remove(id);
        self.tree.detach(id);

        if let Some(entry) = self.tree.get_mut(id) {
            if entry.vid != vid || entry.path != path {
                let (stem, ext) = split_extension(file_name(path));
                entry.name = stem.to_string();
                if let Some(book) = entry.as_book_mut() {
                    book.ext = ext.to_string();
                }
            }
            entry.vid = vid.to_string();
            entry.path = path.to_string();
        }

        let parent = self.ensure_chain(root, vid, path);
        self.tree.attach(parent, id);
    }

    /// Find or synthesize the folder that should hold `path`
    ///
    /// Missing folders are created as lost and indexed when their key is
    /// free.
    fn ensure_chain(&mut self, root: EntryId, vid: &str, path: &str) -> EntryId {
        let mut current = root;
        let mut prefix = String::new();

        for segment in parent_path(path).split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);

            let existing = self.tree.children(current).iter().copied().find(|c| {
                self.tree
                    .get(*c)
                    .is_some_and(|e| e.is_folder() && e.path == prefix)
            });

            current = match existing {
                Some(folder) => folder,
                None => {
                    let mut folder = Entry::folder(vid, &prefix, segment);
                    folder.lost = true;
                    let id = self.tree.insert(folder);
                    self.tree.attach(current, id);
                    if self.tree.lookup(vid, &prefix).is_none() {
                        self.tree.index_insert(id);
                    }
                    id
                }
            };
        }
        current
    }

    fn finish(&mut self) {
        for (bid, id) in self.tree.tracked() {
            let Some(entry) = self.tree.get(id) else {
                continue;
            };
            let (vid, path) = (entry.vid.clone(), entry.path.clone());

            // Purged with its folder and not mentioned by any record
            if !self.tree.is_attached(id) {
                if let Some(root) = self.tree.root(&vid) {
                    debug!("Reattaching book {} at {}:{}", bid, vid, path);
                    self.relocate(id, root, &vid, &path);
                }
            }

            let lost = self.tree.lookup(&vid, &path) != Some(id);
            if let Some(entry) = self.tree.get_mut(id) {
                entry.lost = lost;
            }
        }

        let roots: Vec<EntryId> = self.tree.roots().map(|(_, id)| id).collect();
        for root in roots {
            self.prune_lost_folders(root);
        }
    }

    /// Remove synthesized folders left without any book
    fn prune_lost_folders(&mut self, id: EntryId) {
        let Some(entry) = self.tree.get(id) else {
            return;
        };
        if !matches!(entry.kind, EntryKind::Folder(_)) {
            return;
        }
        let lost = entry.lost && entry.parent.is_some();

        for child in self.tree.children(id).to_vec() {
            self.prune_lost_folders(child);
        }

        if lost && self.tree.children(id).is_empty() {
            if let Some(entry) = self.tree.get(id) {
                debug!("Pruning empty folder {}", entry.key());
            }
            self.tree.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookMeta;
    use crate::tree::Entry;

    fn record(vid: &str, bid: &str, path: &str) -> MetadataRecord {
        MetadataRecord {
            vid: vid.to_string(),
            bid: BookId::parse(bid).unwrap(),
            path: path.to_string(),
            name: None,
            ext: None,
            meta: BookMeta::default(),
        }
    }

    /// root -> /novels -> /novels/a.pdf, all indexed
    fn walked() -> (Tree, EntryId, EntryId) {
        let mut tree = Tree::new();
        let root = tree.ensure_root("main", "Main");
        let novels = tree.insert(Entry::folder("main", "/novels", "novels"));
        tree.attach(root, novels);
        tree.index_insert(novels);
        let a = tree.insert(Entry::book("main", "/novels/a.pdf", "a", "pdf"));
        tree.attach(novels, a);
        tree.index_insert(a);
        (tree, root, a)
    }

    fn run(tree: &mut Tree, records: Vec<MetadataRecord>) -> SyncReport {
        let mut report = SyncReport::default();
        Reconciler::new(tree, &mut report).reconcile(records);
        report
    }

    #[test]
    fn test_binds_discovered_book() {
        let (mut tree, _root, a) = walked();
        let mut rec = record("main", "book0000000000a1", "/novels/a.pdf");
        rec.meta.tags = vec!["sf".to_string()];

        let report = run(&mut tree, vec![rec]);

        assert_eq!(report.records_applied, 1);
        let entry = tree.get(a).unwrap();
        assert!(!entry.lost);
        assert_eq!(entry.bid().unwrap().as_str(), "book0000000000a1");
        assert_eq!(entry.as_book().unwrap().meta.tags, vec!["sf"]);
        assert_eq!(
            tree.book_by_id(&BookId::parse("book0000000000a1").unwrap()),
            Some(a)
        );
    }

    #[test]
    fn test_missing_book_is_resurrected_lost() {
        let (mut tree, root, _a) = walked();
        let report = run(
            &mut tree,
            vec![record("main", "lost000000000001", "/gone/deeper/x.epub")],
        );

        assert_eq!(report.records_applied, 1);
        let bid = BookId::parse("lost000000000001").unwrap();
        let book = tree.book_by_id(&bid).unwrap();
        let entry = tree.get(book).unwrap();
        assert!(entry.lost);
        assert_eq!(entry.name, "x");
        assert_eq!(entry.as_book().unwrap().ext, "epub");
        assert!(tree.is_attached(book));
        assert!(tree.lookup("main", "/gone/deeper/x.epub").is_none());

        let gone = tree.lookup("main", "/gone").unwrap();
        assert!(tree.get(gone).unwrap().lost);
        assert!(tree.children(root).contains(&gone));
        let deeper = tree.lookup("main", "/gone/deeper").unwrap();
        assert_eq!(tree.get(book).unwrap().parent, Some(deeper));
    }

    #[test]
    fn test_folder_at_book_path_means_lost() {
        let (mut tree, _root, _a) = walked();
        run(&mut tree, vec![record("main", "folder0000000001", "/novels")]);

        let book = tree
            .book_by_id(&BookId::parse("folder0000000001").unwrap())
            .unwrap();
        assert!(tree.get(book).unwrap().lost);
        assert!(tree.get(tree.lookup("main", "/novels").unwrap()).unwrap().is_folder());
    }

    #[test]
    fn test_unknown_vault_skipped() {
        let (mut tree, _root, _a) = walked();
        let report = run(&mut tree, vec![record("elsewhere", "x", "/a.pdf")]);

        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.records_applied, 0);
        assert!(matches!(
            report.warnings[0],
            crate::error::SyncWarning::Record(RecordError::VaultNotLoaded { .. })
        ));
        assert!(tree.tracked().is_empty());
    }

    #[test]
    fn test_duplicate_record_skipped() {
        let (mut tree, _root, a) = walked();
        let report = run(
            &mut tree,
            vec![
                record("main", "dup", "/novels/a.pdf"),
                record("main", "dup", "/elsewhere.pdf"),
            ],
        );

        assert_eq!(report.records_applied, 1);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(tree.book_by_id(&BookId::parse("dup").unwrap()), Some(a));
    }

    #[test]
    fn test_conflicting_identity() {
        let (mut tree, _root, a) = walked();
        let report = run(
            &mut tree,
            vec![
                record("main", "first", "/novels/a.pdf"),
                record("main", "second", "/novels/a.pdf"),
            ],
        );

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(tree.book_by_id(&BookId::parse("first").unwrap()), Some(a));
        let second = tree.book_by_id(&BookId::parse("second").unwrap()).unwrap();
        assert_ne!(second, a);
        assert!(tree.get(second).unwrap().lost);
    }

    #[test]
    fn test_record_path_edit_relocates() {
        let (mut tree, root, a) = walked();
        run(&mut tree, vec![record("main", "moved", "/novels/a.pdf")]);

        // The record's path was edited by hand to somewhere with no file
        let report = run(&mut tree, vec![record("main", "moved", "/archive/a.pdf")]);

        assert_eq!(report.books_relocated, 1);
        let entry = tree.get(a).unwrap();
        assert_eq!(entry.path, "/archive/a.pdf");
        assert!(entry.lost);
        let archive = tree.lookup("main", "/archive").unwrap();
        assert_eq!(entry.parent, Some(archive));
        assert!(tree.children(root).contains(&archive));
        assert!(tree.lookup("main", "/novels/a.pdf").is_none());
    }

    #[test]
    fn test_rediscovered_book_adopts_identity() {
        let (mut tree, _root, a) = walked();
        run(&mut tree, vec![record("main", "back", "/novels/b.pdf")]);
        let lost = tree.book_by_id(&BookId::parse("back").unwrap()).unwrap();
        assert!(tree.get(lost).unwrap().lost);

        // The file appears on disk and is walked as an untracked book
        let novels = tree.lookup("main", "/novels").unwrap();
        let b = tree.insert(Entry::book("main", "/novels/b.pdf", "b", "pdf"));
        tree.attach(novels, b);
        tree.index_insert(b);

        let report = run(&mut tree, vec![record("main", "back", "/novels/b.pdf")]);

        assert_eq!(report.books_recovered, 1);
        assert_eq!(tree.book_by_id(&BookId::parse("back").unwrap()), Some(b));
        assert!(!tree.get(b).unwrap().lost);
        assert!(!tree.contains(lost) || tree.get(lost).unwrap().bid().is_none());
        assert_eq!(tree.children(novels), &[a, b]);
    }

    #[test]
    fn test_empty_lost_folders_pruned() {
        let (mut tree, root, _a) = walked();
        run(&mut tree, vec![record("main", "wander", "/far/away/x.pdf")]);
        assert!(tree.lookup("main", "/far/away").is_some());

        run(&mut tree, vec![record("main", "wander", "/x.pdf")]);

        assert!(tree.lookup("main", "/far").is_none());
        assert!(tree.lookup("main", "/far/away").is_none());
        let book = tree.book_by_id(&BookId::parse("wander").unwrap()).unwrap();
        assert_eq!(tree.get(book).unwrap().parent, Some(root));
    }

    #[test]
    fn test_detached_book_without_record_is_reattached() {
        let (mut tree, _root, a) = walked();
        run(&mut tree, vec![record("main", "orphan", "/novels/a.pdf")]);

        let novels = tree.lookup("main", "/novels").unwrap();
        tree.purge(novels);
        assert!(!tree.is_attached(a));

        run(&mut tree, Vec::new());

        assert!(tree.is_attached(a));
        assert!(tree.get(a).unwrap().lost);
        let folder = tree.get(a).unwrap().parent.unwrap();
        assert_eq!(tree.get(folder).unwrap().path, "/novels");
        assert!(tree.get(folder).unwrap().lost);
    }
}

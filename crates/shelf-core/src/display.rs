//! Display tree
//!
//! A read-only projection of one vault's raw tree, either mirroring its
//! folders or grouped by a metadata field. Book leaves are [`EntryId`]s into
//! the raw tree; the projection owns its folders and never links back into
//! the raw tree's parent/child structure.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tree::{Entry, EntryId, EntryKind, Tree};

/// Name of the group holding books without a value for the grouping field
pub const UNKNOWN_GROUP: &str = "unknown";

/// How the display tree is organized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Mirror the folder structure on disk
    #[default]
    Path,
    Tag,
    Author,
    Year,
}

impl DisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Path => "path",
            DisplayMode::Tag => "tag",
            DisplayMode::Author => "author",
            DisplayMode::Year => "year",
        }
    }

    /// Group keys of a book under this mode (deduplicated, in field order)
    fn group_keys(&self, entry: &Entry) -> Vec<String> {
        let Some(book) = entry.as_book() else {
            return Vec::new();
        };
        let raw: Vec<String> = match self {
            DisplayMode::Path => Vec::new(),
            DisplayMode::Tag => book.meta.tags.clone(),
            DisplayMode::Author => book.meta.authors.clone(),
            DisplayMode::Year => book.meta.publish_year.map(|y| y.to_string()).into_iter().collect(),
        };

        let mut keys: Vec<String> = Vec::with_capacity(raw.len());
        for value in raw {
            let value = value.trim();
            if !value.is_empty() && !keys.iter().any(|k| k == value) {
                keys.push(value.to_string());
            }
        }
        keys
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "path" | "folder" => Ok(DisplayMode::Path),
            "tag" | "tags" => Ok(DisplayMode::Tag),
            "author" | "authors" => Ok(DisplayMode::Author),
            "year" | "publishyear" => Ok(DisplayMode::Year),
            other => Err(format!(
                "unknown display mode '{}' (expected path, tag, author or year)",
                other
            )),
        }
    }
}

/// A folder of the display tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayFolder {
    pub name: String,
    /// Raw folder this mirrors (path mode only)
    pub source: Option<EntryId>,
    /// Books in this folder and all folders below it
    pub count: usize,
    pub children: Vec<DisplayNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayNode {
    Folder(DisplayFolder),
    Book(EntryId),
}

impl DisplayFolder {
    fn new(name: &str, source: Option<EntryId>) -> Self {
        Self {
            name: name.to_string(),
            source,
            count: 0,
            children: Vec::new(),
        }
    }

    /// Direct child folders
    pub fn folders(&self) -> impl Iterator<Item = &DisplayFolder> {
        self.children.iter().filter_map(|c| match c {
            DisplayNode::Folder(f) => Some(f),
            DisplayNode::Book(_) => None,
        })
    }

    /// Direct book leaves
    pub fn books(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.children.iter().filter_map(|c| match c {
            DisplayNode::Book(id) => Some(*id),
            DisplayNode::Folder(_) => None,
        })
    }

    pub fn folder(&self, name: &str) -> Option<&DisplayFolder> {
        self.folders().find(|f| f.name == name)
    }

    /// Every book leaf in this subtree, in display order
    pub fn all_books(&self) -> Vec<EntryId> {
        let mut out = Vec::new();
        self.collect_books(&mut out);
        out
    }

    fn collect_books(&self, out: &mut Vec<EntryId>) {
        for child in &self.children {
            match child {
                DisplayNode::Book(id) => out.push(*id),
                DisplayNode::Folder(folder) => folder.collect_books(out),
            }
        }
    }

    fn accumulate(&mut self) -> usize {
        let mut count = 0;
        for child in &mut self.children {
            count += match child {
                DisplayNode::Book(_) => 1,
                DisplayNode::Folder(folder) => folder.accumulate(),
            };
        }
        self.count = count;
        count
    }
}

/// Project the subtree at `root` into a display tree
///
/// The root keeps the raw root's name. Unknown or deleted `root` ids yield an
/// empty folder.
pub fn build(tree: &Tree, root: EntryId, mode: DisplayMode, ascending: bool) -> DisplayFolder {
    let name = tree.get(root).map(|e| e.name.as_str()).unwrap_or_default();
    let mut display = match mode {
        DisplayMode::Path => mirror(tree, root),
        _ => group(tree, root, mode),
    };
    display.name = name.to_string();
    display.accumulate();
    sort(&mut display, tree, mode, ascending);
    display
}

fn mirror(tree: &Tree, id: EntryId) -> DisplayFolder {
    let Some(entry) = tree.get(id) else {
        return DisplayFolder::default();
    };
    let mut folder = DisplayFolder::new(&entry.name, Some(id));
    for child in entry.children() {
        match tree.get(*child).map(|e| &e.kind) {
            Some(EntryKind::Folder(_)) => {
                folder.children.push(DisplayNode::Folder(mirror(tree, *child)))
            }
            Some(EntryKind::Book(_)) => folder.children.push(DisplayNode::Book(*child)),
            None => {}
        }
    }
    folder
}

fn group(tree: &Tree, root: EntryId, mode: DisplayMode) -> DisplayFolder {
    let mut groups: BTreeMap<String, DisplayFolder> = BTreeMap::new();

    for book in tree.books_under(root) {
        let Some(entry) = tree.get(book) else {
            continue;
        };
        let mut keys = mode.group_keys(entry);
        if keys.is_empty() {
            keys.push(UNKNOWN_GROUP.to_string());
        }
        for key in keys {
            groups
                .entry(key)
                .or_insert_with_key(|k| DisplayFolder::new(k, None))
                .children
                .push(DisplayNode::Book(book));
        }
    }

    let mut display = DisplayFolder::new("", Some(root));
    display.children = groups.into_values().map(DisplayNode::Folder).collect();
    display
}

/// Case-insensitive comparison with a case-sensitive tiebreak
fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn sort(folder: &mut DisplayFolder, tree: &Tree, mode: DisplayMode, ascending: bool) {
    for child in &mut folder.children {
        if let DisplayNode::Folder(sub) = child {
            sort(sub, tree, mode, ascending);
        }
    }

    let title = |id: &EntryId| tree.get(*id).map(Entry::title).unwrap_or_default();
    folder.children.sort_by(|a, b| {
        let ordering = match (a, b) {
            (DisplayNode::Folder(_), DisplayNode::Book(_)) => return Ordering::Less,
            (DisplayNode::Book(_), DisplayNode::Folder(_)) => return Ordering::Greater,
            (DisplayNode::Folder(x), DisplayNode::Folder(y)) => match mode {
                DisplayMode::Path => compare_names(&x.name, &y.name),
                _ => x
                    .count
                    .cmp(&y.count)
                    .then_with(|| compare_names(&x.name, &y.name)),
            },
            (DisplayNode::Book(x), DisplayNode::Book(y)) => {
                compare_names(title(x), title(y)).then_with(|| x.cmp(y))
            }
        };
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

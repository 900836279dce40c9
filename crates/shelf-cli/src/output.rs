//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use shelf_core::{
    BookMeta, BookStatus, DisplayFolder, DisplayNode, Entry, EntryId, SyncReport, Tree,
};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// A book as shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct BookView {
    pub id: Option<String>,
    pub vault: String,
    pub path: String,
    pub title: String,
    pub ext: String,
    pub lost: bool,
    /// Stored metadata, unknown fields included
    pub meta: BookMeta,
}

impl BookView {
    pub fn from_entry(entry: &Entry) -> Option<Self> {
        let book = entry.as_book()?;
        Some(Self {
            id: book.bid.as_ref().map(|b| b.to_string()),
            vault: entry.vid.clone(),
            path: entry.path.clone(),
            title: entry.title().to_string(),
            ext: book.ext.clone(),
            lost: entry.lost,
            meta: book.meta.clone(),
        })
    }

    /// `vid:/path`, the address accepted by every book command
    pub fn address(&self) -> String {
        format!("{}:{}", self.vault, self.path)
    }

    fn status(&self) -> BookStatus {
        self.meta.status()
    }
}

#[derive(Serialize)]
struct TreeNodeView {
    name: String,
    count: usize,
    folders: Vec<TreeNodeView>,
    books: Vec<BookView>,
}

impl TreeNodeView {
    fn new(folder: &DisplayFolder, tree: &Tree) -> Self {
        Self {
            name: folder.name.clone(),
            count: folder.count,
            folders: folder
                .folders()
                .map(|f| TreeNodeView::new(f, tree))
                .collect(),
            books: folder
                .books()
                .filter_map(|id| tree.get(id))
                .filter_map(BookView::from_entry)
                .collect(),
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single book with all of its metadata
    pub fn print_book(&self, book: &BookView) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "ID:       {}",
                    book.id.as_deref().unwrap_or("(untracked)")
                );
                println!("Title:    {}", book.title);
                println!("Location: {}", book.address());
                println!("Format:   {}", book.ext);
                println!("Status:   {}", book.status());
                if !book.meta.authors.is_empty() {
                    println!("Authors:  {}", book.meta.authors.join(", "));
                }
                if let Some(year) = book.meta.publish_year {
                    println!("Year:     {}", year);
                }
                if !book.meta.tags.is_empty() {
                    println!("Tags:     {}", book.meta.tags.join(", "));
                }
                if book.lost {
                    println!();
                    println!("This book is no longer found on disk.");
                }
            }
            OutputFormat::Json => print_json(book),
            OutputFormat::Quiet => {
                println!("{}", book.id.clone().unwrap_or_else(|| book.address()));
            }
        }
    }

    /// Print a list of books
    pub fn print_books(&self, books: &[BookView]) {
        match self.format {
            OutputFormat::Human => {
                if books.is_empty() {
                    println!("No books found.");
                    return;
                }
                for book in books {
                    let id = book.id.as_deref().unwrap_or("-");
                    let lost = if book.lost { " [lost]" } else { "" };
                    println!(
                        "{:<16} | {}{} | {}",
                        id,
                        truncate(&book.title, 40),
                        lost,
                        truncate(&book.address(), 50)
                    );
                }
                println!("\n{} book(s)", books.len());
            }
            OutputFormat::Json => print_json(books),
            OutputFormat::Quiet => {
                for book in books {
                    println!("{}", book.id.clone().unwrap_or_else(|| book.address()));
                }
            }
        }
    }

    /// Print a display tree
    pub fn print_tree(&self, root: &DisplayFolder, tree: &Tree) {
        match self.format {
            OutputFormat::Human => {
                println!("{} ({})", root.name, root.count);
                for line in tree_lines(root, tree) {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => print_json(&TreeNodeView::new(root, tree)),
            OutputFormat::Quiet => {
                for id in root.all_books() {
                    if let Some(book) = tree.get(id).and_then(BookView::from_entry) {
                        println!("{}", book.address());
                    }
                }
            }
        }
    }

    /// Print the outcome of a synchronization pass
    pub fn print_report(&self, report: &SyncReport) {
        match self.format {
            OutputFormat::Human => {
                println!("Scanned {} vault(s)", report.vaults_scanned.len());
                if !report.vaults_skipped.is_empty() {
                    println!("Skipped: {}", report.vaults_skipped.join(", "));
                }
                println!(
                    "Books:   {} ({} tracked, {} lost)",
                    report.stats.books, report.stats.tracked, report.stats.lost
                );
                println!("Folders: {}", report.stats.folders);
                println!(
                    "Changes: {} added, {} removed, {} relocated, {} recovered",
                    report.entries_added,
                    report.entries_removed,
                    report.books_relocated,
                    report.books_recovered
                );
                println!(
                    "Records: {} applied, {} skipped",
                    report.records_applied, report.records_skipped
                );
                if report.has_warnings() {
                    println!();
                    println!("── Warnings ({}) ──", report.warnings.len());
                    for warning in &report.warnings {
                        println!("⚠ {}", warning);
                    }
                }
            }
            OutputFormat::Json => {
                let warnings: Vec<_> = report
                    .warnings
                    .iter()
                    .map(|w| serde_json::json!({"kind": w.kind(), "message": w.to_string()}))
                    .collect();
                print_json(&serde_json::json!({
                    "vaults_scanned": report.vaults_scanned,
                    "vaults_skipped": report.vaults_skipped,
                    "entries_added": report.entries_added,
                    "entries_removed": report.entries_removed,
                    "records_applied": report.records_applied,
                    "records_skipped": report.records_skipped,
                    "books_relocated": report.books_relocated,
                    "books_recovered": report.books_recovered,
                    "stats": report.stats,
                    "warnings": warnings
                }));
            }
            OutputFormat::Quiet => {
                if report.has_warnings() {
                    for warning in &report.warnings {
                        eprintln!("{}", warning);
                    }
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

/// Indented outline of a display tree, folders before books
fn tree_lines(root: &DisplayFolder, tree: &Tree) -> Vec<String> {
    let mut lines = Vec::new();
    push_lines(root, tree, "", &mut lines);
    lines
}

fn push_lines(folder: &DisplayFolder, tree: &Tree, prefix: &str, lines: &mut Vec<String>) {
    let last = folder.children.len().saturating_sub(1);
    for (i, child) in folder.children.iter().enumerate() {
        let (branch, indent) = if i == last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        match child {
            DisplayNode::Folder(sub) => {
                lines.push(format!("{}{}{}/ ({})", prefix, branch, sub.name, sub.count));
                push_lines(sub, tree, &format!("{}{}", prefix, indent), lines);
            }
            DisplayNode::Book(id) => {
                lines.push(format!("{}{}{}", prefix, branch, book_label(tree, *id)));
            }
        }
    }
}

fn book_label(tree: &Tree, id: EntryId) -> String {
    match tree.get(id) {
        Some(entry) if entry.lost => format!("{} [lost]", entry.title()),
        Some(entry) => entry.title().to_string(),
        None => "?".to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::display::{self, DisplayMode};
    use shelf_core::tree::Entry;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title", 10), "a longe...");
        assert_eq!(truncate("ünïcödé títlé", 8), "ünïcö...");
    }

    #[test]
    fn test_tree_lines() {
        let mut tree = Tree::new();
        let root = tree.ensure_root("main", "Main");
        let novels = tree.insert(Entry::folder("main", "/novels", "novels"));
        tree.attach(root, novels);
        let a = tree.insert(Entry::book("main", "/novels/a.pdf", "a", "pdf"));
        tree.attach(novels, a);
        let b = tree.insert(Entry::book("main", "/b.pdf", "b", "pdf"));
        tree.attach(root, b);

        let display = display::build(&tree, root, DisplayMode::Path, true);
        assert_eq!(
            tree_lines(&display, &tree),
            vec!["├── novels/ (1)", "│   └── a", "└── b"]
        );
    }

    #[test]
    fn test_book_view() {
        let mut entry = Entry::book("main", "/x/dune.epub", "dune", "epub");
        entry.lost = true;
        let view = BookView::from_entry(&entry).unwrap();
        assert_eq!(view.address(), "main:/x/dune.epub");
        assert_eq!(view.title, "dune");
        assert!(view.id.is_none());
        assert!(view.lost);

        let folder = Entry::folder("main", "/x", "x");
        assert!(BookView::from_entry(&folder).is_none());
    }
}

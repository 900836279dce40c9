//! Book command handlers

use anyhow::{bail, Context, Result};

use shelf_core::{BookEdit, BookStatus, CatalogService, Target};

use crate::output::{BookView, Output};

/// Field changes requested on the command line
#[derive(Debug, Default)]
pub struct EditArgs {
    pub status: Option<BookStatus>,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub clear_year: bool,
}

impl EditArgs {
    fn into_edit(self) -> BookEdit {
        BookEdit {
            status: self.status,
            // An empty title clears it
            title: self.title.map(Some),
            set_tags: self.tags,
            add_tags: self.add_tags,
            remove_tags: self.remove_tags,
            authors: if self.authors.is_empty() {
                None
            } else {
                Some(self.authors)
            },
            publish_year: if self.clear_year {
                Some(None)
            } else {
                self.year.map(Some)
            },
        }
    }
}

/// List books, optionally limited to one vault or to lost books
pub async fn list(
    service: &CatalogService,
    vault: Option<String>,
    lost: bool,
    output: &Output,
) -> Result<()> {
    let snapshot = service.ready().await?;
    let tree = &snapshot.tree;

    let ids = match &vault {
        Some(vid) => match tree.root(vid) {
            Some(root) => tree.books_under(root),
            None => bail!("Unknown vault: {}", vid),
        },
        None => tree.roots().flat_map(|(_, root)| tree.books_under(root)).collect(),
    };

    let mut books: Vec<BookView> = ids
        .into_iter()
        .filter_map(|id| tree.get(id))
        .filter(|entry| !lost || entry.lost)
        .filter_map(BookView::from_entry)
        .collect();
    books.sort_by(|a, b| (&a.vault, &a.path).cmp(&(&b.vault, &b.path)));

    output.print_books(&books);
    Ok(())
}

/// Show one book
pub async fn show(service: &CatalogService, target: &str, output: &Output) -> Result<()> {
    let entry = service
        .lookup(target)
        .await?
        .with_context(|| format!("No book found for '{}'", target))?;
    let Some(book) = BookView::from_entry(&entry) else {
        bail!("'{}' is a folder, not a book", target);
    };
    output.print_book(&book);
    Ok(())
}

/// Give a book a stable id and store its record
pub async fn track(service: &CatalogService, target: &str, output: &Output) -> Result<()> {
    let bid = service
        .track(target)
        .await
        .with_context(|| format!("Failed to track '{}'", target))?;

    if output.is_quiet() {
        println!("{}", bid);
    } else {
        output.success(&format!("Tracking {} as {}", target, bid));
    }
    Ok(())
}

/// Change a book's metadata
pub async fn edit(
    service: &CatalogService,
    target: &str,
    args: EditArgs,
    output: &Output,
) -> Result<()> {
    let edit = args.into_edit();
    if edit.is_empty() {
        bail!("Nothing to change. See `shelf edit --help` for the available fields.");
    }

    let effect = service
        .update(target, edit)
        .await
        .with_context(|| format!("Failed to update '{}'", target))?;

    if effect.any() {
        output.success(&format!("Updated {}", target));
    } else {
        output.message("No changes.");
    }
    Ok(())
}

/// Open a book with the system's default application
pub async fn open(service: &CatalogService, target: &str, output: &Output) -> Result<()> {
    let snapshot = service.ready().await?;
    let parsed: Target = target.parse().map_err(anyhow::Error::msg)?;

    let id = snapshot
        .resolve(&parsed)
        .with_context(|| format!("No book found for '{}'", target))?;
    let Some(entry) = snapshot.tree.get(id) else {
        bail!("No book found for '{}'", target);
    };
    if entry.is_folder() {
        bail!("'{}' is a folder, not a book", target);
    }
    if entry.lost {
        bail!("'{}' is no longer on disk; run `shelf scan` after restoring it", target);
    }

    let path = snapshot
        .full_path(id)
        .with_context(|| format!("Vault '{}' is not loaded", entry.vid))?;
    open::that(&path).with_context(|| format!("Failed to open {}", path.display()))?;

    output.success(&format!("Opened {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_args_mapping() {
        let edit = EditArgs {
            title: Some(String::new()),
            authors: vec!["Frank Herbert".to_string()],
            clear_year: true,
            year: Some(1965),
            ..EditArgs::default()
        }
        .into_edit();

        assert_eq!(edit.title, Some(Some(String::new())));
        assert_eq!(edit.authors, Some(vec!["Frank Herbert".to_string()]));
        // Clearing wins over a new value
        assert_eq!(edit.publish_year, Some(None));
        assert!(edit.set_tags.is_none());
    }

    #[test]
    fn test_empty_edit_args() {
        assert!(EditArgs::default().into_edit().is_empty());
    }
}

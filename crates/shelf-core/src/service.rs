//! Async access to a shared catalog
//!
//! [`CatalogService`] owns a [`Catalog`] behind a `tokio` mutex and runs
//! passes and edits on the blocking pool. Readers never wait for a pass:
//! they get the last published [`CatalogSnapshot`] from a watch channel.
//!
//! Reload requests are ticketed. A request only runs a pass of its own if no
//! pass has started since it was issued; otherwise the newer pass already
//! covers it. Rapid repeated reloads therefore collapse into one or two
//! passes instead of queueing up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::catalog::{Catalog, CatalogSnapshot, Target};
use crate::error::CatalogError;
use crate::models::{BookEdit, BookId, EditEffect};
use crate::tree::Entry;

/// Errors from the async service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The blocking task running the operation panicked or was cancelled
    #[error("Catalog task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

type Published = Option<Arc<CatalogSnapshot>>;

struct Inner {
    catalog: Arc<Mutex<Catalog>>,
    /// Tickets handed out to reload requests
    requested: AtomicU64,
    /// Highest ticket covered by the last pass that started
    started: AtomicU64,
    syncing: AtomicBool,
    snapshots: watch::Sender<Published>,
}

/// Cloneable handle to a catalog shared between tasks
#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<Inner>,
}

impl CatalogService {
    pub fn new(catalog: Catalog) -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                catalog: Arc::new(Mutex::new(catalog)),
                requested: AtomicU64::new(0),
                started: AtomicU64::new(0),
                syncing: AtomicBool::new(false),
                snapshots,
            }),
        }
    }

    /// Last completed snapshot, if any pass has finished
    pub fn snapshot(&self) -> Published {
        self.inner.snapshots.borrow().clone()
    }

    /// Receive every newly published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Published> {
        self.inner.snapshots.subscribe()
    }

    /// Whether a pass is running right now
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    /// Request a full pass and wait until one that covers the request is
    /// done
    pub async fn reload(&self) -> ServiceResult<Arc<CatalogSnapshot>> {
        let ticket = self.inner.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = Arc::clone(&self.inner.catalog).lock_owned().await;

        if self.inner.started.load(Ordering::SeqCst) >= ticket {
            if let Some(snapshot) = self.snapshot() {
                debug!("Reload #{} already covered by a newer pass", ticket);
                return Ok(snapshot);
            }
        }
        self.run_pass(guard).await
    }

    /// Snapshot of the first completed pass, running it if needed
    pub async fn ready(&self) -> ServiceResult<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        let guard = Arc::clone(&self.inner.catalog).lock_owned().await;
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        self.run_pass(guard).await
    }

    /// Find a book by id or `vid:/path`
    pub async fn lookup(&self, target: &str) -> ServiceResult<Option<Entry>> {
        let snapshot = self.ready().await?;
        let Ok(target) = target.parse::<Target>() else {
            return Ok(None);
        };
        Ok(snapshot
            .resolve(&target)
            .and_then(|id| snapshot.tree.get(id))
            .cloned())
    }

    /// Assign an id to a book (if it has none) and persist its record
    pub async fn track(&self, target: &str) -> ServiceResult<BookId> {
        let target = target.to_string();
        self.with_catalog(move |catalog| {
            let id = catalog.resolve(&target)?;
            catalog.ensure_book_id(id)
        })
        .await
    }

    /// Edit a book's metadata and persist it
    pub async fn update(&self, target: &str, edit: BookEdit) -> ServiceResult<EditEffect> {
        let target = target.to_string();
        self.with_catalog(move |catalog| {
            let id = catalog.resolve(&target)?;
            catalog.update_book(id, &edit)
        })
        .await
    }

    /// Run `f` against the catalog on the blocking pool and republish
    ///
    /// The snapshot is published whether or not `f` fails, since a failed
    /// operation may still have changed the catalog.
    async fn with_catalog<T, F>(&self, f: F) -> ServiceResult<T>
    where
        F: FnOnce(&mut Catalog) -> Result<T, CatalogError> + Send + 'static,
        T: Send + 'static,
    {
        self.ready().await?;
        let guard = Arc::clone(&self.inner.catalog).lock_owned().await;
        let inner = Arc::clone(&self.inner);

        let result = tokio::task::spawn_blocking(move || -> Result<T, CatalogError> {
            let mut catalog = guard;
            let out = f(&mut *catalog);
            inner
                .snapshots
                .send_replace(Some(Arc::new(catalog.snapshot())));
            out
        })
        .await?;
        Ok(result?)
    }

    async fn run_pass(
        &self,
        guard: OwnedMutexGuard<Catalog>,
    ) -> ServiceResult<Arc<CatalogSnapshot>> {
        let inner = Arc::clone(&self.inner);
        inner
            .started
            .store(inner.requested.load(Ordering::SeqCst), Ordering::SeqCst);
        inner.syncing.store(true, Ordering::SeqCst);

        let result = tokio::task::spawn_blocking(move || {
            let mut catalog = guard;
            catalog.synchronize();
            let snapshot = Arc::new(catalog.snapshot());
            inner.snapshots.send_replace(Some(Arc::clone(&snapshot)));
            inner.syncing.store(false, Ordering::SeqCst);
            snapshot
        })
        .await;

        if result.is_err() {
            self.inner.syncing.store(false, Ordering::SeqCst);
        }
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, BASE_VAULT_ID};
    use crate::error::RecordError;
    use crate::record::MetadataRecord;
    use crate::storage::{MemoryStore, MetadataStore, StorageError, StorageResult, StoredRecord};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn service(temp_dir: &TempDir) -> CatalogService {
        let base = temp_dir.path().join("books");
        fs::create_dir_all(base.join("shelf")).unwrap();
        fs::write(base.join("shelf").join("a.pdf"), b"x").unwrap();
        let config = Config {
            data_dir: temp_dir.path().join("data"),
            base_dir: base,
            extensions: vec!["pdf".to_string()],
            ..Config::default()
        };
        CatalogService::new(Catalog::new(config, Box::new(MemoryStore::new())))
    }

    /// Loads nothing and refuses every save
    struct ReadOnlyStore;

    impl MetadataStore for ReadOnlyStore {
        fn load_all(&self) -> StorageResult<Vec<Result<StoredRecord, RecordError>>> {
            Ok(Vec::new())
        }

        fn save(&mut self, _record: &MetadataRecord) -> StorageResult<()> {
            Err(StorageError::from_io(
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                PathBuf::from("/read-only"),
            ))
        }

        fn describe(&self) -> String {
            "read-only".to_string()
        }
    }

    async fn passes(service: &CatalogService) -> u64 {
        service.inner.catalog.lock().await.passes()
    }

    #[tokio::test]
    async fn test_lookup_triggers_first_pass() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        assert!(service.snapshot().is_none());

        let entry = service
            .lookup(&format!("{}:/shelf/a.pdf", BASE_VAULT_ID))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.name, "a");
        assert!(service.snapshot().is_some());
        assert!(!service.is_syncing());
        assert_eq!(passes(&service).await, 1);

        // Later lookups use the snapshot
        service.lookup("nothing-here").await.unwrap();
        assert_eq!(passes(&service).await, 1);
    }

    #[tokio::test]
    async fn test_queued_reloads_are_coalesced() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        service.ready().await.unwrap();

        // Hold the catalog so every request queues behind the lock
        let held = Arc::clone(&service.inner.catalog).lock_owned().await;
        let before = service.inner.requested.load(Ordering::SeqCst);
        let mut handles = Vec::new();
        for _ in 0..3 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.reload().await }));
        }
        while service.inner.requested.load(Ordering::SeqCst) < before + 3 {
            tokio::task::yield_now().await;
        }
        drop(held);

        for handle in handles {
            let snapshot = handle.await.unwrap().unwrap();
            assert_eq!(snapshot.generation, 2);
        }
        assert_eq!(passes(&service).await, 2);
    }

    #[tokio::test]
    async fn test_update_publishes_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        let mut updates = service.subscribe();
        let target = format!("{}:/shelf/a.pdf", BASE_VAULT_ID);

        let bid = service.track(&target).await.unwrap();
        let edit = BookEdit {
            add_tags: vec!["later".to_string()],
            ..BookEdit::default()
        };
        let effect = service.update(bid.as_str(), edit).await.unwrap();
        assert!(effect.tags);

        assert!(updates.has_changed().unwrap());
        let latest = updates.borrow_and_update().clone().unwrap();
        let entry = latest.book_by_id(&bid).unwrap();
        assert_eq!(entry.as_book().unwrap().meta.tags, vec!["later"]);
    }

    #[tokio::test]
    async fn test_failed_save_still_publishes_edit() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("books");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("a.pdf"), b"x").unwrap();
        let config = Config {
            data_dir: temp_dir.path().join("data"),
            base_dir: base,
            extensions: vec!["pdf".to_string()],
            ..Config::default()
        };
        let service = CatalogService::new(Catalog::new(config, Box::new(ReadOnlyStore)));
        service.ready().await.unwrap();

        let edit = BookEdit {
            add_tags: vec!["unsaved".to_string()],
            ..BookEdit::default()
        };
        let result = service
            .update(&format!("{}:/a.pdf", BASE_VAULT_ID), edit)
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::Catalog(CatalogError::Storage(_)))
        ));

        let snapshot = service.snapshot().unwrap();
        let entry = snapshot.entry_by_path(BASE_VAULT_ID, "/a.pdf").unwrap();
        let book = entry.as_book().unwrap();
        assert_eq!(book.meta.tags, vec!["unsaved"]);
        assert!(book.bid.is_none());
    }

    #[tokio::test]
    async fn test_unknown_target_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let result = service.track("library:/missing.pdf").await;
        assert!(matches!(
            result,
            Err(ServiceError::Catalog(CatalogError::NotFound(_)))
        ));
    }
}

//! Embedded, file-backed storage.
//!
//! Each collection is one JSON-lines file inside the store's directory (see [`crate::file`]).
//! Every operation takes the collection's async mutex, loads the file, applies its change and
//! rewrites the file atomically. Queries run in-process through the shared pipeline.
//!
//! The store follows the semantics of classic embedded document databases rather than the
//! reference in-memory backend:
//!
//! - a second `order_by` on an ordered query is rejected; use `then_by`
//! - `update` of a missing item silently inserts it
//! - bulk upserts count only items whose stored content changed
//! - `insert_or_update` is a read followed by a write, not one atomic step

use async_trait::async_trait;
use bson::Bson;
use futures::{StreamExt, stream};
use mea::mutex::Mutex;
use parking_lot::Mutex as SyncMutex;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::fs;

use datalayer_core::{
    backend::{DocumentStream, StoreBackend, StoreBackendBuilder},
    capability::{BulkFailure, Capabilities, NegativePaging, UpdateMissing},
    document::StoreKey,
    error::{StoreError, StoreResult},
    pipeline::{self, InProcessPlan},
    sequence::QuerySequence,
};

use crate::file::{self, CollectionFile, Record};

pub(crate) const BACKEND: &str = "embedded";

/// File-backed storage backend rooted at a directory.
///
/// The directory is created by [`initialize`](StoreBackend::initialize); until then every
/// operation fails with [`StoreError::NotInitialized`].
#[derive(Debug, Clone)]
pub struct EmbeddedStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    initialized: AtomicBool,
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmbeddedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                initialized: AtomicBool::new(false),
                locks: SyncMutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a builder for a store rooted at `root`.
    pub fn builder(root: impl Into<PathBuf>) -> EmbeddedStoreBuilder {
        EmbeddedStoreBuilder { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.inner.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized(format!(
                "embedded store at {}",
                self.inner.root.display()
            )))
        }
    }

    fn lock_for(&self, collection: &str) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn file(&self, collection: &str) -> StoreResult<CollectionFile> {
        self.ensure_initialized()?;
        CollectionFile::new(&self.inner.root, collection)
    }

    fn plan(&self, query: &QuerySequence) -> StoreResult<InProcessPlan> {
        pipeline::plan(BACKEND, self.capabilities(), query)
    }

    /// Loads a collection under its lock, lets `change` edit the records, and persists them
    /// if `change` reports a modification.
    async fn modify<T>(
        &self,
        collection: &str,
        change: impl FnOnce(&mut Vec<Record>) -> (bool, StoreResult<T>) + Send,
    ) -> StoreResult<T> {
        let file = self.file(collection)?;
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;

        let mut records = file.load().await?;
        let (modified, result) = change(&mut records);

        if modified {
            file.persist(&records).await?;
        }

        result
    }

    async fn read(&self, collection: &str) -> StoreResult<Vec<Record>> {
        let file = self.file(collection)?;
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;

        file.load().await
    }
}

fn position(records: &[Record], key: &StoreKey) -> Option<usize> {
    records.iter().position(|record| &record.key == key)
}

#[async_trait]
impl StoreBackend for EmbeddedStore {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            multiple_order_by: false,
            negative_paging: NegativePaging::Clamp,
            update_missing: UpdateMissing::Upsert,
            bulk_failure: BulkFailure::AbortBatch,
            upsert_counts_unchanged: false,
            atomic_upsert: false,
        }
    }

    async fn initialize(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.inner.root)
            .await
            .map_err(|err| StoreError::Initialization(format!("{}: {err}", self.inner.root.display())))?;
        self.inner.initialized.store(true, Ordering::Release);

        tracing::info!(backend = BACKEND, root = %self.inner.root.display(), "opened embedded store");
        Ok(())
    }

    async fn get_document(&self, key: &StoreKey, collection: &str) -> StoreResult<Option<Bson>> {
        Ok(self
            .read(collection)
            .await?
            .into_iter()
            .find(|record| &record.key == key)
            .map(|record| record.document))
    }

    async fn insert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        self.modify(collection, |records| {
            if position(records, &key).is_some() {
                return (false, Err(StoreError::duplicate_key(&key, collection)));
            }

            records.push(Record::new(key, document));
            (true, Ok(()))
        })
        .await
    }

    async fn insert_documents(&self, documents: Vec<(StoreKey, Bson)>, collection: &str) -> StoreResult<u64> {
        self.modify(collection, |records| {
            let mut inserted = 0;

            for (key, document) in documents {
                if position(records, &key).is_some() {
                    if inserted > 0 {
                        tracing::warn!(backend = BACKEND, collection, inserted, "bulk insert aborted after partial write");
                    }
                    return (inserted > 0, Err(StoreError::duplicate_key(&key, collection)));
                }

                records.push(Record::new(key, document));
                inserted += 1;
            }

            (inserted > 0, Ok(inserted))
        })
        .await
    }

    async fn update_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        self.modify(collection, |records| {
            match position(records, &key) {
                Some(index) => records[index].document = document,
                None => records.push(Record::new(key, document)),
            }
            (true, Ok(()))
        })
        .await
    }

    async fn update_documents(&self, documents: Vec<(StoreKey, Bson)>, collection: &str) -> StoreResult<u64> {
        self.modify(collection, |records| {
            let mut updated = 0;

            for (key, document) in documents {
                match position(records, &key) {
                    Some(index) => records[index].document = document,
                    None => records.push(Record::new(key, document)),
                }
                updated += 1;
            }

            (updated > 0, Ok(updated))
        })
        .await
    }

    async fn upsert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<bool> {
        let incoming = file::fingerprint(&document)?;

        match self.get_document(&key, collection).await? {
            Some(existing) if file::fingerprint(&existing)? == incoming => Ok(false),
            _ => {
                self.update_document(key, document, collection).await?;
                Ok(true)
            }
        }
    }

    async fn upsert_documents(&self, documents: Vec<(StoreKey, Bson)>, collection: &str) -> StoreResult<u64> {
        let documents = documents
            .into_iter()
            .map(|(key, document)| Ok((key, file::fingerprint(&document)?, document)))
            .collect::<StoreResult<Vec<_>>>()?;

        self.modify(collection, |records| {
            let mut changed = 0;

            for (key, incoming, document) in documents {
                match position(records, &key) {
                    Some(index) => {
                        match file::fingerprint(&records[index].document) {
                            Ok(existing) if existing == incoming => continue,
                            Ok(_) => records[index].document = document,
                            Err(err) => return (changed > 0, Err(err)),
                        }
                    }
                    None => records.push(Record::new(key, document)),
                }
                changed += 1;
            }

            (changed > 0, Ok(changed))
        })
        .await
    }

    async fn delete_document(&self, key: &StoreKey, collection: &str) -> StoreResult<bool> {
        self.modify(collection, |records| match position(records, key) {
            Some(index) => {
                records.remove(index);
                (true, Ok(true))
            }
            None => (false, Ok(false)),
        })
        .await
    }

    async fn delete_documents(&self, keys: Vec<StoreKey>, collection: &str) -> StoreResult<u64> {
        self.modify(collection, |records| {
            let before = records.len();
            records.retain(|record| !keys.contains(&record.key));
            let deleted = (before - records.len()) as u64;

            (deleted > 0, Ok(deleted))
        })
        .await
    }

    async fn count_documents(&self, collection: &str) -> StoreResult<u64> {
        Ok(self.read(collection).await?.len() as u64)
    }

    async fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        let file = self.file(collection)?;
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;

        file.remove().await
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.ensure_initialized()?;

        let mut entries = match fs::read_dir(&self.inner.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::backend(BACKEND, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::backend(BACKEND, err))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(file::EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    async fn query_documents(&self, query: &QuerySequence, collection: &str) -> StoreResult<DocumentStream> {
        let plan = self.plan(query)?;
        let records = self.read(collection).await?;

        let results = plan
            .execute(records, |record| &record.document)
            .into_iter()
            .map(|record| Ok(record.document))
            .collect::<Vec<_>>();

        tracing::debug!(backend = BACKEND, collection, operations = %query, results = results.len(), "executed query");

        Ok(stream::iter(results).boxed())
    }

    async fn count_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let plan = self.plan(query)?;
        let records = self.read(collection).await?;

        Ok(plan.execute(records, |record| &record.document).len() as u64)
    }

    async fn delete_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let plan = self.plan(query)?;

        self.modify(collection, |records| {
            let doomed = plan
                .execute(records.iter().collect(), |record| &record.document)
                .into_iter()
                .map(|record| record.key.clone())
                .collect::<Vec<_>>();

            for key in &doomed {
                if let Some(index) = position(records, key) {
                    records.remove(index);
                }
            }

            (!doomed.is_empty(), Ok(doomed.len() as u64))
        })
        .await
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.inner.initialized.store(false, Ordering::Release);
        self.inner.locks.lock().clear();

        tracing::info!(backend = BACKEND, root = %self.inner.root.display(), "closed embedded store");
        Ok(())
    }
}

/// Builder for [`EmbeddedStore`].
#[derive(Debug, Clone)]
pub struct EmbeddedStoreBuilder {
    root: PathBuf,
}

#[async_trait]
impl StoreBackendBuilder for EmbeddedStoreBuilder {
    type Backend = EmbeddedStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        if self.root.as_os_str().is_empty() {
            return Err(StoreError::Initialization(
                "embedded store requires a directory path".to_string(),
            ));
        }

        Ok(EmbeddedStore::new(self.root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn item(id: i32, name: &str) -> (StoreKey, Bson) {
        (
            StoreKey::new(id.to_string()),
            Bson::Document(doc! { "id": id, "name": name }),
        )
    }

    async fn open(dir: &tempfile::TempDir) -> EmbeddedStore {
        let store = EmbeddedStore::builder(dir.path().join("db")).build().await.unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::new(dir.path());

        let err = store.count_documents("people").await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn data_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let (key, document) = item(1, "Ada");

        open(&dir).await.insert_document(key.clone(), document.clone(), "people").await.unwrap();

        let reopened = open(&dir).await;
        assert_eq!(reopened.get_document(&key, "people").await.unwrap(), Some(document));
        assert_eq!(reopened.list_collections().await.unwrap(), vec!["people".to_string()]);
    }

    #[tokio::test]
    async fn update_of_missing_item_inserts_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let (key, document) = item(5, "Grace");

        store.update_document(key.clone(), document, "people").await.unwrap();

        assert_eq!(store.count_documents("people").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bulk_upsert_counts_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store
            .insert_documents(vec![item(1, "Ada"), item(2, "Grace")], "people")
            .await
            .unwrap();

        let changed = store
            .upsert_documents(vec![item(1, "Ada"), item(2, "Hopper"), item(3, "Lin")], "people")
            .await
            .unwrap();

        assert_eq!(changed, 2);
        assert!(!store.upsert_document(item(3, "Lin").0, item(3, "Lin").1, "people").await.unwrap());
    }

    #[tokio::test]
    async fn bulk_insert_keeps_elements_before_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.insert_documents(vec![item(2, "Grace")], "people").await.unwrap();

        let err = store
            .insert_documents(vec![item(1, "Ada"), item(2, "Again"), item(3, "Lin")], "people")
            .await
            .unwrap_err();

        assert!(err.is_duplicate_key());
        assert_eq!(store.count_documents("people").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_order_by_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let query = [
            datalayer_core::sequence::QueryItem::OrderBy("name".into()),
            datalayer_core::sequence::QueryItem::OrderBy("id".into()),
        ]
        .into_iter()
        .collect::<QuerySequence>();

        let err = store.query_documents(&query, "people").await.err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedOperation { .. }));
        assert!(err.to_string().contains("then_by"));
    }
}

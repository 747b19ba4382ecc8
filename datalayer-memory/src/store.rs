//! In-memory storage implementation.
//!
//! Items are kept as BSON values in one `HashMap` per collection. Each collection sits behind
//! its own async mutex, so single CRUD calls are atomic and writers to different collections
//! never contend.

use async_trait::async_trait;
use bson::Bson;
use futures::{StreamExt, stream};
use mea::{mutex::Mutex, rwlock::RwLock};
use std::{collections::HashMap, sync::Arc};

use datalayer_core::{
    backend::{DocumentStream, StoreBackend, StoreBackendBuilder},
    capability::{BulkFailure, Capabilities, NegativePaging, UpdateMissing},
    document::StoreKey,
    error::{StoreError, StoreResult},
    pipeline::{self, InProcessPlan},
    sequence::QuerySequence,
};

const BACKEND: &str = "memory";

type CollectionMap = HashMap<StoreKey, Bson>;
type SharedCollection = Arc<Mutex<CollectionMap>>;
type StoreMap = HashMap<String, SharedCollection>;

/// Thread-safe in-memory storage backend.
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state, so clones share the
/// same data.
///
/// # Performance
///
/// Queries scan every item in a collection (no indexing). For small to medium datasets this
/// is typically acceptable; it is primarily meant for tests and development.
///
/// # Example
///
/// ```ignore
/// use datalayer_memory::InMemoryStore;
/// use datalayer::backend::StoreBackend;
/// use datalayer::document::StoreKey;
/// use bson::{Bson, doc};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     let doc = Bson::Document(doc! { "id": 1, "name": "Alice" });
///     store.insert_document(StoreKey::new("1"), doc, "users").await?;
///
///     assert!(store.get_document(&StoreKey::new("1"), "users").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> (item key -> stored item)
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    async fn collection(&self, name: &str) -> Option<SharedCollection> {
        self.store.read().await.get(name).cloned()
    }

    async fn collection_or_create(&self, name: &str) -> SharedCollection {
        if let Some(collection) = self.collection(name).await {
            return collection;
        }

        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CollectionMap::new())))
            .clone()
    }

    fn plan(&self, query: &QuerySequence) -> StoreResult<InProcessPlan> {
        pipeline::plan(BACKEND, self.capabilities(), query)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            multiple_order_by: true,
            negative_paging: NegativePaging::Clamp,
            update_missing: UpdateMissing::Fail,
            bulk_failure: BulkFailure::ContinueAndCount,
            upsert_counts_unchanged: true,
            atomic_upsert: true,
        }
    }

    async fn get_document(&self, key: &StoreKey, collection: &str) -> StoreResult<Option<Bson>> {
        match self.collection(collection).await {
            Some(items) => Ok(items.lock().await.get(key).cloned()),
            None => Ok(None),
        }
    }

    async fn insert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        let items = self.collection_or_create(collection).await;
        let mut items = items.lock().await;

        if items.contains_key(&key) {
            return Err(StoreError::duplicate_key(key, collection));
        }

        items.insert(key, document);
        Ok(())
    }

    async fn insert_documents(&self, documents: Vec<(StoreKey, Bson)>, collection: &str) -> StoreResult<u64> {
        let items = self.collection_or_create(collection).await;
        let mut items = items.lock().await;
        let mut inserted = 0;

        for (key, document) in documents {
            if items.contains_key(&key) {
                tracing::warn!(backend = BACKEND, collection, key = %key, "skipping duplicate key in bulk insert");
                continue;
            }

            items.insert(key, document);
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn update_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        let Some(items) = self.collection(collection).await else {
            return Err(StoreError::not_found(key, collection));
        };
        let mut items = items.lock().await;

        match items.get_mut(&key) {
            Some(stored) => {
                *stored = document;
                Ok(())
            }
            None => Err(StoreError::not_found(key, collection)),
        }
    }

    async fn upsert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<bool> {
        self.collection_or_create(collection)
            .await
            .lock()
            .await
            .insert(key, document);

        Ok(true)
    }

    async fn delete_document(&self, key: &StoreKey, collection: &str) -> StoreResult<bool> {
        match self.collection(collection).await {
            Some(items) => Ok(items.lock().await.remove(key).is_some()),
            None => Ok(false),
        }
    }

    async fn delete_documents(&self, keys: Vec<StoreKey>, collection: &str) -> StoreResult<u64> {
        let Some(items) = self.collection(collection).await else {
            return Ok(0);
        };
        let mut items = items.lock().await;

        Ok(keys
            .iter()
            .filter(|key| items.remove(*key).is_some())
            .count() as u64)
    }

    async fn count_documents(&self, collection: &str) -> StoreResult<u64> {
        match self.collection(collection).await {
            Some(items) => Ok(items.lock().await.len() as u64),
            None => Ok(0),
        }
    }

    async fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        Ok(self.store.write().await.remove(collection).is_some())
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        Ok(self.store.read().await.keys().cloned().collect())
    }

    async fn query_documents(&self, query: &QuerySequence, collection: &str) -> StoreResult<DocumentStream> {
        let plan = self.plan(query)?;

        let Some(items) = self.collection(collection).await else {
            return Ok(stream::empty().boxed());
        };
        let items = items.lock().await;

        let results = plan
            .execute(items.values().collect(), |document| *document)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        tracing::debug!(backend = BACKEND, collection, operations = %query, results = results.len(), "executed query");

        Ok(stream::iter(results.into_iter().map(Ok)).boxed())
    }

    async fn count_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let plan = self.plan(query)?;

        let Some(items) = self.collection(collection).await else {
            return Ok(0);
        };
        let items = items.lock().await;

        Ok(plan.execute(items.values().collect(), |document| *document).len() as u64)
    }

    async fn delete_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let plan = self.plan(query)?;

        let Some(items) = self.collection(collection).await else {
            return Ok(0);
        };
        let mut items = items.lock().await;

        let doomed = plan
            .execute(items.iter().collect(), |(_, document)| *document)
            .into_iter()
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        for key in &doomed {
            items.remove(key);
        }

        Ok(doomed.len() as u64)
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.store.write().await.clear();
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use datalayer_memory::InMemoryStore;
/// use datalayer::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds a new, empty [`InMemoryStore`]. This always succeeds.
    async fn build(self) -> StoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use datalayer_core::{
        cancel::CancelSignal,
        document::Document,
        query::Filter,
        store::Database,
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Task {
        id: i64,
        title: String,
        priority: i32,
    }

    impl Document for Task {
        type Key = i64;

        fn id(&self) -> &i64 {
            &self.id
        }

        fn collection_name() -> &'static str {
            "tasks"
        }
    }

    fn task(id: i64, priority: i32) -> Task {
        Task {
            id,
            title: format!("task {id}"),
            priority,
        }
    }

    #[tokio::test]
    async fn bulk_insert_skips_duplicates_and_counts() {
        let db = Database::new(InMemoryStore::new());
        let tasks = db.collection::<Task>();

        tasks.insert(task(1, 1)).await.unwrap();
        let inserted = tasks
            .insert_many(vec![task(1, 9), task(2, 2), task(3, 3)])
            .await
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(tasks.get(&1).await.unwrap(), Some(task(1, 1)));
        assert_eq!(tasks.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn closure_predicates_run_in_process() {
        let db = Database::new(InMemoryStore::new());
        let tasks = db.collection::<Task>();
        tasks.insert_many((1..=6).map(|id| task(id, 0)).collect()).await.unwrap();

        let even = tasks
            .query()
            .filter(Filter::predicate("even id", |doc| {
                doc.as_document()
                    .and_then(|doc| doc.get_i64("id").ok())
                    .is_some_and(|id| id % 2 == 0)
            }))
            .order_by("id")
            .to_vec(&CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(even.iter().map(|task| task.id).collect::<Vec<_>>(), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn delete_by_query_respects_pagination() {
        let db = Database::new(InMemoryStore::new());
        let tasks = db.collection::<Task>();
        tasks.insert_many((1..=10).map(|id| task(id, 0)).collect()).await.unwrap();

        let deleted = tasks
            .query()
            .order_by_descending("id")
            .take(3)
            .delete(&CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(tasks.count().await.unwrap(), 7);
        assert!(tasks.get(&10).await.unwrap().is_none());
        assert!(tasks.get(&7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancelled_scalar_operations_fail_and_streams_end() {
        let db = Database::new(InMemoryStore::new());
        let tasks = db.collection::<Task>();
        tasks.insert_many((1..=3).map(|id| task(id, 0)).collect()).await.unwrap();

        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = tasks.query().count(&cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));

        let stream = tasks.query().to_stream(&cancel).await.unwrap();
        assert_eq!(stream.count().await, 0);
    }

    #[tokio::test]
    async fn update_of_missing_item_fails() {
        let store = InMemoryStore::new();

        let err = store
            .update_document(StoreKey::new("9"), Bson::Document(doc! { "id": 9 }), "tasks")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn registry_hands_out_one_handle_per_type() {
        let db = Database::new(InMemoryStore::new());
        let first = db.collection::<Task>();
        first.insert(task(1, 1)).await.unwrap();

        let second = db.collection_named::<Task>("tasks");
        assert_eq!(second.count().await.unwrap(), 1);

        assert!(db.drop_collection("tasks").await.unwrap());
        assert!(!db.drop_collection("tasks").await.unwrap());
        assert!(db.list_collections().await.unwrap().is_empty());
    }
}

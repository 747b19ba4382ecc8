//! Typed collections over a storage backend.
//!
//! A [`Collection`] binds a collection name, a shared backend handle and an item type. It
//! converts items to their stored form and delegates to the backend; all semantic
//! differences between backends are described by the backend's
//! [`Capabilities`](crate::capability::Capabilities).
//!
//! # Example
//!
//! ```ignore
//! use datalayer::document::Document;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: i64,
//!     pub name: String,
//! }
//!
//! impl Document for User {
//!     type Key = i64;
//!     fn id(&self) -> &i64 { &self.id }
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! # async fn example(db: &datalayer::store::Database<impl datalayer::backend::StoreBackend + 'static>) -> datalayer::error::StoreResult<()> {
//! let users = db.collection::<User>();
//! users.insert(User { id: 1, name: "Alice".to_string() }).await?;
//! let alice = users.get(&1).await?;
//! # Ok(()) }
//! ```

use bson::Bson;
use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    backend::StoreBackend,
    document::{Document, DocumentExt, DocumentKey, StoreKey},
    error::StoreResult,
    queryable::Queryable,
};

/// A named collection of items of type `D` stored in backend `B`.
///
/// Collections are cheap handles: cloning one clones the backend `Arc` and the name.
pub struct Collection<B: StoreBackend + ?Sized, D: Document> {
    name: String,
    backend: Arc<B>,
    _marker: PhantomData<fn() -> D>,
}

impl<B: StoreBackend + ?Sized, D: Document> Clone for Collection<B, D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            backend: Arc::clone(&self.backend),
            _marker: PhantomData,
        }
    }
}

impl<B: StoreBackend + ?Sized, D: Document> fmt::Debug for Collection<B, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl<B: StoreBackend + ?Sized, D: Document> Collection<B, D> {
    pub(crate) fn new(name: String, backend: Arc<B>) -> Self {
        Self {
            name,
            backend,
            _marker: PhantomData,
        }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Views the same collection as a different item type.
    pub fn with_type<T: Document>(&self) -> Collection<B, T> {
        Collection::new(self.name.clone(), Arc::clone(&self.backend))
    }

    /// Retrieves an item by key. A missing item is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`](crate::error::StoreError) if retrieval or deserialization fails.
    pub async fn get(&self, key: &D::Key) -> StoreResult<Option<D>> {
        self.backend
            .get_document(&key.store_key(), &self.name)
            .await?
            .map(D::from_bson)
            .transpose()
    }

    /// Inserts a new item and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateKey`](crate::error::StoreError::DuplicateKey) if an item with the
    /// same key already exists; the stored item is left untouched.
    pub async fn insert(&self, item: D) -> StoreResult<D> {
        let (key, document) = item.to_entry()?;
        self.backend
            .insert_document(key, document, &self.name)
            .await?;

        Ok(item)
    }

    /// Inserts several items, returning how many were written.
    ///
    /// Whether a failing element aborts the batch depends on the backend's
    /// [`bulk_failure`](crate::capability::Capabilities::bulk_failure) policy.
    pub async fn insert_many(&self, items: Vec<D>) -> StoreResult<u64> {
        self.backend
            .insert_documents(entries(&items)?, &self.name)
            .await
    }

    /// Inserts the item, or replaces the stored item with the same key.
    pub async fn insert_or_update(&self, item: D) -> StoreResult<D> {
        let (key, document) = item.to_entry()?;
        self.backend
            .upsert_document(key, document, &self.name)
            .await?;

        Ok(item)
    }

    /// Inserts or replaces several items, returning how many counted.
    ///
    /// Backends without
    /// [`upsert_counts_unchanged`](crate::capability::Capabilities::upsert_counts_unchanged)
    /// only count items whose stored content changed.
    pub async fn insert_or_update_many(&self, items: Vec<D>) -> StoreResult<u64> {
        self.backend
            .upsert_documents(entries(&items)?, &self.name)
            .await
    }

    /// Replaces an existing item and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](crate::error::StoreError::NotFound) if no item shares the key,
    /// unless the backend upserts on update.
    pub async fn update(&self, item: D) -> StoreResult<D> {
        let (key, document) = item.to_entry()?;
        self.backend
            .update_document(key, document, &self.name)
            .await?;

        Ok(item)
    }

    /// Replaces several items, returning how many were written.
    pub async fn update_many(&self, items: Vec<D>) -> StoreResult<u64> {
        self.backend
            .update_documents(entries(&items)?, &self.name)
            .await
    }

    /// Deletes an item by key, returning whether it existed.
    pub async fn delete(&self, key: &D::Key) -> StoreResult<bool> {
        self.backend
            .delete_document(&key.store_key(), &self.name)
            .await
    }

    /// Deletes the stored item sharing this item's key.
    pub async fn delete_item(&self, item: &D) -> StoreResult<bool> {
        self.delete(item.id()).await
    }

    /// Deletes items by key, returning how many existed.
    pub async fn delete_many(&self, keys: Vec<D::Key>) -> StoreResult<u64> {
        self.backend
            .delete_documents(
                keys.iter()
                    .map(DocumentKey::store_key)
                    .collect(),
                &self.name,
            )
            .await
    }

    /// Drops the whole collection, returning whether it existed.
    pub async fn delete_collection(&self) -> StoreResult<bool> {
        self.backend.drop_collection(&self.name).await
    }

    /// Counts the items in the collection.
    pub async fn count(&self) -> StoreResult<u64> {
        self.backend.count_documents(&self.name).await
    }

    /// Starts a query over this collection.
    pub fn query(&self) -> Queryable<B, D> {
        Queryable::new(self.name.clone(), Arc::clone(&self.backend))
    }
}

fn entries<D: Document>(items: &[D]) -> StoreResult<Vec<(StoreKey, Bson)>> {
    items.iter().map(DocumentExt::to_entry).collect()
}

//! Storage backend abstraction.
//!
//! This module defines the traits that abstract over the concrete stores (in-memory, embedded
//! files, table services, MongoDB), letting [`Database`](crate::store::Database) and its
//! collections work with any of them.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait is a unified async interface for item CRUD, collection management
//! and query execution. Backends only ever see the stored form of items: a [`StoreKey`] and a
//! BSON document. Typed conversion happens in [`Collection`](crate::collection::Collection).
//!
//! The trait is object safe, so a backend chosen at runtime can be held as
//! `Arc<dyn StoreBackend>`.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use datalayer::backend::StoreBackend;
//! use datalayer::document::StoreKey;
//! use bson::{Bson, doc};
//!
//! let backend = InMemoryStore::builder().build().await?;
//!
//! let doc = Bson::Document(doc! { "id": 1, "name": "Alice" });
//! backend.insert_document(StoreKey::new("1"), doc, "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Bson;
use futures::{StreamExt, stream::BoxStream};
use std::fmt::Debug;

use crate::{
    capability::{BulkFailure, Capabilities},
    document::StoreKey,
    error::StoreResult,
    sequence::QuerySequence,
};

/// A lazy, finite stream of stored documents produced by a query.
pub type DocumentStream = BoxStream<'static, StoreResult<Bson>>;

/// Abstract interface for storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The concurrency model (per-collection mutexes, file locks, native driver
/// pooling) is implementation-specific and documented by each backend.
///
/// # Error Handling
///
/// Operations return [`StoreResult<T>`](crate::error::StoreResult). Query translation errors
/// ([`UnsupportedOperation`](crate::error::StoreError::UnsupportedOperation),
/// [`InvalidOperation`](crate::error::StoreError::InvalidOperation)) are raised before the
/// native store is contacted; native failures surface as
/// [`Backend`](crate::error::StoreError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Short name used in errors and logs.
    fn name(&self) -> &str;

    /// The backend's semantic profile.
    fn capabilities(&self) -> Capabilities;

    /// Prepares native resources (connections, directories, tables).
    ///
    /// Operations on a backend that requires initialization fail with
    /// [`NotInitialized`](crate::error::StoreError::NotInitialized) until this completes.
    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Fetches the stored form of one item. Absence is `Ok(None)`.
    async fn get_document(&self, key: &StoreKey, collection: &str) -> StoreResult<Option<Bson>>;

    /// Inserts one item, failing with
    /// [`DuplicateKey`](crate::error::StoreError::DuplicateKey) if the key is taken.
    async fn insert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()>;

    /// Inserts several items, returning how many were written.
    ///
    /// The default implementation inserts one at a time and reacts to failures according to
    /// [`Capabilities::bulk_failure`].
    async fn insert_documents(
        &self,
        documents: Vec<(StoreKey, Bson)>,
        collection: &str,
    ) -> StoreResult<u64> {
        let policy = self.capabilities().bulk_failure;
        let mut written = 0;

        for (key, document) in documents {
            let result = self
                .insert_document(key, document, collection)
                .await
                .map(|_| true);
            settle(self.name(), policy, collection, "insert", result, &mut written)?;
        }

        Ok(written)
    }

    /// Replaces an existing item.
    ///
    /// A missing key fails with [`NotFound`](crate::error::StoreError::NotFound) unless the
    /// backend declares [`UpdateMissing::Upsert`](crate::capability::UpdateMissing::Upsert).
    async fn update_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()>;

    /// Replaces several items, returning how many were written.
    async fn update_documents(
        &self,
        documents: Vec<(StoreKey, Bson)>,
        collection: &str,
    ) -> StoreResult<u64> {
        let policy = self.capabilities().bulk_failure;
        let mut written = 0;

        for (key, document) in documents {
            let result = self
                .update_document(key, document, collection)
                .await
                .map(|_| true);
            settle(self.name(), policy, collection, "update", result, &mut written)?;
        }

        Ok(written)
    }

    /// Inserts or replaces one item.
    ///
    /// Returns whether the write counts toward a bulk upsert total. Backends that set
    /// [`Capabilities::upsert_counts_unchanged`] always return `true`; the others return
    /// `false` when the stored content was already identical.
    async fn upsert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<bool>;

    /// Inserts or replaces several items, returning how many counted.
    async fn upsert_documents(
        &self,
        documents: Vec<(StoreKey, Bson)>,
        collection: &str,
    ) -> StoreResult<u64> {
        let policy = self.capabilities().bulk_failure;
        let mut written = 0;

        for (key, document) in documents {
            let result = self.upsert_document(key, document, collection).await;
            settle(self.name(), policy, collection, "upsert", result, &mut written)?;
        }

        Ok(written)
    }

    /// Deletes one item, returning whether it existed.
    async fn delete_document(&self, key: &StoreKey, collection: &str) -> StoreResult<bool>;

    /// Deletes several items, returning how many existed.
    async fn delete_documents(&self, keys: Vec<StoreKey>, collection: &str) -> StoreResult<u64> {
        let policy = self.capabilities().bulk_failure;
        let mut deleted = 0;

        for key in keys {
            let result = self.delete_document(&key, collection).await;
            settle(self.name(), policy, collection, "delete", result, &mut deleted)?;
        }

        Ok(deleted)
    }

    /// Counts every item in a collection.
    async fn count_documents(&self, collection: &str) -> StoreResult<u64>;

    /// Drops a collection and its items, returning whether it existed.
    async fn drop_collection(&self, collection: &str) -> StoreResult<bool>;

    /// Lists the names of all collections.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Translates and runs a query sequence, returning the stored form of the results.
    ///
    /// Translation happens before this returns; the stream only carries execution results.
    async fn query_documents(&self, query: &QuerySequence, collection: &str) -> StoreResult<DocumentStream>;

    /// Counts the items a query sequence yields.
    async fn count_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let mut stream = self.query_documents(query, collection).await?;
        let mut count = 0;

        while let Some(item) = stream.next().await {
            item?;
            count += 1;
        }

        Ok(count)
    }

    /// Deletes exactly the items a query sequence yields, returning how many were removed.
    async fn delete_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64>;

    /// Releases native resources. Further use of the backend is undefined.
    async fn shutdown(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Folds one element of a bulk write into its running total.
fn settle(
    backend: &str,
    policy: BulkFailure,
    collection: &str,
    operation: &str,
    result: StoreResult<bool>,
    total: &mut u64,
) -> StoreResult<()> {
    match result {
        Ok(counted) => {
            if counted {
                *total += 1;
            }
            Ok(())
        }
        Err(err) if policy == BulkFailure::ContinueAndCount => {
            tracing::warn!(backend, collection, operation, error = %err, "skipping failed element of bulk write");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> StoreResult<Self::Backend>;
}

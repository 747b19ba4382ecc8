//! The fluent query builder.
//!
//! A [`Queryable`] accumulates operations into a [`QuerySequence`] in call order. Nothing is
//! translated until a terminal operation runs; each terminal operation re-walks the whole
//! sequence, so a builder can be reused and yields the same results against unchanged data.
//!
//! ```ignore
//! let page = users
//!     .query()
//!     .filter(Filter::gt("age", 30))
//!     .order_by("name")
//!     .then_by_descending("age")
//!     .skip(20)
//!     .take(10)
//!     .to_vec(&CancelSignal::new())
//!     .await?;
//! ```

use futures::{
    StreamExt, TryStreamExt, future,
    stream::{self, BoxStream},
};
use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    backend::StoreBackend,
    cancel::CancelSignal,
    document::{Document, DocumentExt},
    error::{StoreError, StoreResult},
    query::Expr,
    sequence::{QueryItem, QuerySequence},
};

/// A lazy stream of query results.
pub type ItemStream<D> = BoxStream<'static, StoreResult<D>>;

/// Builder and executor for queries over one collection.
pub struct Queryable<B: StoreBackend + ?Sized, D: Document> {
    collection: String,
    backend: Arc<B>,
    sequence: QuerySequence,
    _marker: PhantomData<fn() -> D>,
}

impl<B: StoreBackend + ?Sized, D: Document> Clone for Queryable<B, D> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            backend: Arc::clone(&self.backend),
            sequence: self.sequence.clone(),
            _marker: PhantomData,
        }
    }
}

impl<B: StoreBackend + ?Sized, D: Document> fmt::Debug for Queryable<B, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queryable")
            .field("collection", &self.collection)
            .field("backend", &self.backend.name())
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<B: StoreBackend + ?Sized, D: Document> Queryable<B, D> {
    pub(crate) fn new(collection: String, backend: Arc<B>) -> Self {
        Self {
            collection,
            backend,
            sequence: QuerySequence::new(),
            _marker: PhantomData,
        }
    }

    fn push(mut self, item: QueryItem) -> Self {
        self.sequence.push(item);
        self
    }

    /// Keeps only items matching `expr`.
    pub fn filter(self, expr: Expr) -> Self {
        self.push(QueryItem::Where(expr))
    }

    /// Orders by `field`, ascending.
    pub fn order_by(self, field: impl Into<String>) -> Self {
        self.push(QueryItem::OrderBy(field.into()))
    }

    pub fn order_by_descending(self, field: impl Into<String>) -> Self {
        self.push(QueryItem::OrderByDescending(field.into()))
    }

    /// Adds a secondary ascending ordering. Requires a preceding `order_by`.
    pub fn then_by(self, field: impl Into<String>) -> Self {
        self.push(QueryItem::ThenBy(field.into()))
    }

    pub fn then_by_descending(self, field: impl Into<String>) -> Self {
        self.push(QueryItem::ThenByDescending(field.into()))
    }

    /// Keeps at most `count` items.
    pub fn take(self, count: i64) -> Self {
        self.push(QueryItem::Take(count))
    }

    /// Skips the first `count` items.
    pub fn skip(self, count: i64) -> Self {
        self.push(QueryItem::Skip(count))
    }

    /// The operations accumulated so far, in call order.
    pub fn sequence(&self) -> &QuerySequence {
        &self.sequence
    }

    /// Runs the query and returns a lazy stream of items.
    ///
    /// Translation errors are returned before any item is produced. Once `cancel` is set the
    /// stream ends at the next item boundary.
    pub async fn to_stream(&self, cancel: &CancelSignal) -> StoreResult<ItemStream<D>> {
        if cancel.is_cancelled() {
            return Ok(stream::empty().boxed());
        }

        tracing::debug!(
            backend = self.backend.name(),
            collection = %self.collection,
            operations = %self.sequence,
            "running query"
        );

        let documents = self
            .backend
            .query_documents(&self.sequence, &self.collection)
            .await?;
        let cancel = cancel.clone();

        Ok(documents
            .take_while(move |_| future::ready(!cancel.is_cancelled()))
            .map(|document| document.and_then(D::from_bson))
            .boxed())
    }

    /// Runs the query and collects every item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cancelled`] if `cancel` is set before or while collecting.
    pub async fn to_vec(&self, cancel: &CancelSignal) -> StoreResult<Vec<D>> {
        ensure_active(cancel)?;

        let items = self
            .to_stream(cancel)
            .await?
            .try_collect::<Vec<_>>()
            .await?;

        ensure_active(cancel)?;
        Ok(items)
    }

    /// Returns the first item the query yields, or `None` when it yields nothing.
    pub async fn first_or_default(&self, cancel: &CancelSignal) -> StoreResult<Option<D>> {
        ensure_active(cancel)?;

        let first = self.clone().take(1);
        let mut items = first.to_stream(cancel).await?;

        let item = items.next().await.transpose()?;
        ensure_active(cancel)?;
        Ok(item)
    }

    /// Counts the items the query yields.
    pub async fn count(&self, cancel: &CancelSignal) -> StoreResult<u64> {
        ensure_active(cancel)?;

        self.backend
            .count_query(&self.sequence, &self.collection)
            .await
    }

    /// Deletes exactly the items the query yields, returning how many were removed.
    pub async fn delete(&self, cancel: &CancelSignal) -> StoreResult<u64> {
        ensure_active(cancel)?;

        let deleted = self
            .backend
            .delete_query(&self.sequence, &self.collection)
            .await?;

        tracing::debug!(
            backend = self.backend.name(),
            collection = %self.collection,
            operations = %self.sequence,
            deleted,
            "deleted query results"
        );

        Ok(deleted)
    }
}

fn ensure_active(cancel: &CancelSignal) -> StoreResult<()> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

//! The database handle applications program against.
//!
//! A [`Database`] owns a shared backend handle and the registry of collections resolved from
//! it. The backend type is either concrete (`Database<InMemoryStore>`) or chosen at runtime
//! (`Database<dyn StoreBackend>`, see [`Database::into_dyn`]).
//!
//! # Example
//!
//! ```ignore
//! use datalayer::store::Database;
//!
//! let db = Database::open(InMemoryStore::builder()).await?;
//! let users = db.collection::<User>();
//! ```

use parking_lot::Mutex;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::Collection,
    document::Document,
    error::StoreResult,
};

type Registry = HashMap<(String, TypeId), Box<dyn Any + Send + Sync>>;

/// A connection to one backend plus its collection registry.
pub struct Database<B: StoreBackend + ?Sized> {
    backend: Arc<B>,
    collections: Mutex<Registry>,
}

impl<B: StoreBackend + ?Sized> fmt::Debug for Database<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend)
            .field("collections", &self.collections.lock().len())
            .finish()
    }
}

impl<B: StoreBackend + 'static> Database<B> {
    /// Wraps an already built backend.
    pub fn new(backend: B) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    /// Builds and initializes a backend from its builder.
    pub async fn open<T>(builder: T) -> StoreResult<Self>
    where
        T: StoreBackendBuilder<Backend = B>,
    {
        let database = Self::new(builder.build().await?);
        database.initialize().await?;

        Ok(database)
    }

    /// Erases the backend type so it can be selected at runtime.
    ///
    /// The collection registry is not carried over; collections are re-resolved on demand.
    pub fn into_dyn(self) -> Database<dyn StoreBackend> {
        let backend: Arc<dyn StoreBackend> = self.backend;
        Database::from_shared(backend)
    }
}

impl<B: StoreBackend + ?Sized + 'static> Database<B> {
    /// Wraps a backend handle that may be shared with other databases.
    pub fn from_shared(backend: Arc<B>) -> Self {
        Self {
            backend,
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Prepares the backend's native resources.
    pub async fn initialize(&self) -> StoreResult<()> {
        self.backend.initialize().await?;
        tracing::info!(backend = self.backend.name(), "initialized backend");

        Ok(())
    }

    /// Returns the collection for `D`, named by [`Document::collection_name`].
    pub fn collection<D: Document>(&self) -> Collection<B, D> {
        self.collection_named(D::collection_name())
    }

    /// Returns the collection called `name` holding items of type `D`.
    ///
    /// Handles are resolved once per (name, item type) pair and cached.
    pub fn collection_named<D: Document>(&self, name: &str) -> Collection<B, D> {
        let mut collections = self.collections.lock();
        let entry = collections
            .entry((name.to_string(), TypeId::of::<D>()))
            .or_insert_with(|| {
                tracing::debug!(backend = self.backend.name(), collection = name, "resolved collection");
                Box::new(Collection::<B, D>::new(name.to_string(), Arc::clone(&self.backend)))
            });

        match entry.downcast_ref::<Collection<B, D>>() {
            Some(collection) => collection.clone(),
            None => Collection::new(name.to_string(), Arc::clone(&self.backend)),
        }
    }

    /// Lists the names of all collections in the backend.
    pub async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    /// Drops a collection and evicts its cached handles, returning whether it existed.
    pub async fn drop_collection(&self, name: &str) -> StoreResult<bool> {
        self.collections
            .lock()
            .retain(|(collection, _), _| collection != name);

        let existed = self.backend.drop_collection(name).await?;
        tracing::info!(backend = self.backend.name(), collection = name, existed, "dropped collection");

        Ok(existed)
    }

    /// Releases the backend and clears the registry.
    pub async fn shutdown(&self) -> StoreResult<()> {
        self.collections.lock().clear();
        self.backend.shutdown().await?;
        tracing::info!(backend = self.backend.name(), "shut down backend");

        Ok(())
    }
}

//! Main datalayer crate providing a unified interface for typed collections.
//!
//! This crate is the primary entry point for users of the datalayer framework. It re-exports
//! the core types from the sub-crates and gives access to every storage backend.
//!
//! # Features
//!
//! - **Typed collections** - Define records with Serde and store them under a typed key
//! - **Portable queries** - Compose `filter`, `order_by`, `then_by`, `skip` and `take`; each
//!   backend translates the sequence into its native form or rejects it before any I/O
//! - **Multiple backends** - In-memory, embedded files, table services and MongoDB
//! - **Runtime selection** - Pick the backend from configuration with [`connect`]
//!
//! # Quick Start
//!
//! ```ignore
//! use datalayer::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: i64,
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! impl Document for User {
//!     type Key = i64;
//!
//!     fn id(&self) -> &i64 { &self.id }
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> StoreResult<()> {
//!     let db = Database::open(InMemoryStore::builder()).await?;
//!     let users = db.collection::<User>();
//!
//!     users.insert(User { id: 1, name: "Alice".into(), age: 31 }).await?;
//!
//!     let adults = users
//!         .query()
//!         .filter(Filter::gte("age", 18))
//!         .order_by("name")
//!         .take(10)
//!         .to_vec(&CancelSignal::new())
//!         .await?;
//!
//!     println!("adults: {adults:?}");
//!
//!     db.shutdown().await
//! }
//! ```
//!
//! # Runtime Backend Selection
//!
//! ```ignore
//! use datalayer::{BackendConfig, connect};
//!
//! let config = BackendConfig::from_json(r#"{ "backend": "embedded", "path": "./data" }"#)?;
//! let db = connect(&config).await?;
//! let users = db.collection::<User>();
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`embedded`] - File-backed storage in a local directory
//! - [`table`] - Wide-column table services
//! - `mongodb` - MongoDB backend (requires the `mongodb` feature)

pub mod config;
pub mod prelude;

pub use config::{BackendConfig, connect};
pub use datalayer_core::{
    backend, cancel, capability, collection, document, error, pipeline, query, queryable, sequence, store,
};
pub use datalayer_core::store::Database;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend.
pub mod memory {
    pub use datalayer_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// Embedded, file-backed storage backend.
pub mod embedded {
    pub use datalayer_embedded::{EmbeddedStore, EmbeddedStoreBuilder};
}

/// Table-store backend and its service interface.
pub mod table {
    pub use datalayer_table::{
        MemoryTableService, TableError, TableService, TableStore, TableStoreBuilder,
        service::{EntityPage, EntityQuery, TableEntity, TransactionAction},
    };
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use datalayer_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}

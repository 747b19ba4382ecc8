//! In-memory storage backend for datalayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It is the reference backend: every query operation is supported, evaluated in-process by
//! the shared pipeline in `datalayer_core::pipeline`.
//!
//! # Features
//!
//! - **Per-collection locking** - One async mutex per collection under a map-level RwLock
//! - **Full query support** - Filters (including closures), stacked orderings and pagination
//! - **Lenient bulk writes** - Failing elements are skipped and the written ones counted
//!
//! # Quick Start
//!
//! ```ignore
//! use datalayer::{Document, Database, memory::InMemoryStore};
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
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open(InMemoryStore::builder()).await?;
//!     let users = db.collection::<User>();
//!
//!     users.insert(User { id: 1, name: "Alice".to_string() }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as datalayer_memory;

pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};

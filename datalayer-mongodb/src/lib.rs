//! MongoDB backend implementation for datalayer.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Query
//! sequences are compiled into aggregation pipelines and executed by the server.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! datalayer = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use datalayer::{Database, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open(MongoDbStore::builder("mongodb://localhost:27017", "my_database")).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as datalayer_mongodb;

pub mod pipeline;
pub mod query;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};

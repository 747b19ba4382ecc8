//! Embedded, file-backed storage backend for datalayer.
//!
//! Each collection lives in one JSON-lines file inside a directory chosen by the caller, so a
//! database survives process restarts without any server. Queries are evaluated in-process.
//!
//! ```ignore
//! use datalayer::{Database, embedded::EmbeddedStore};
//!
//! let db = Database::open(EmbeddedStore::builder("./data")).await?;
//! let users = db.collection::<User>();
//! ```

#[allow(unused_extern_crates)]
extern crate self as datalayer_embedded;

mod file;
pub mod store;

pub use store::{EmbeddedStore, EmbeddedStoreBuilder};

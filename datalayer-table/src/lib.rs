//! Table-store backend for datalayer.
//!
//! Targets wide-column table services that address entities by partition key and row key and
//! accept OData-style filter strings. The service is reached through the [`TableService`]
//! trait; [`MemoryTableService`] implements it in-process for tests and local development.
//!
//! ```ignore
//! use datalayer::{Database, table::{MemoryTableService, TableStore}};
//!
//! let db = Database::open(TableStore::builder(MemoryTableService::new())).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as datalayer_table;

pub mod emulator;
pub mod filter;
mod odata;
pub mod service;
pub mod store;

pub use emulator::MemoryTableService;
pub use service::{TableError, TableService};
pub use store::{TableStore, TableStoreBuilder};

//! A provider-agnostic collection abstraction with a portable query pipeline.
//!
//! This crate is the core of the datalayer project and provides:
//!
//! - **Item traits** ([`document`]) - Traits for defining items and encoding their keys
//! - **Filter expressions** ([`query`]) - Backend-neutral predicate trees and their visitor
//! - **Query sequences** ([`sequence`]) - The ordered list of query operations and ordering rules
//! - **Query builder** ([`queryable`]) - Fluent construction and terminal operations
//! - **Capabilities** ([`capability`]) - Per-backend semantic switches
//! - **In-process execution** ([`pipeline`], [`evaluator`], [`value`]) - Shared planner for
//!   backends without a native query language
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Collections** ([`collection`]) and the **database** ([`store`]) - The typed API
//! - **Cancellation** ([`cancel`]) and **errors** ([`error`])
//!
//! # Example
//!
//! ```ignore
//! use datalayer::prelude::*;
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
//!     fn id(&self) -> &i64 {
//!         &self.id
//!     }
//!
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//! }
//!
//! let db = Database::open(InMemoryStore::builder()).await?;
//! let adults = db
//!     .collection::<User>()
//!     .query()
//!     .filter(Filter::gte("age", 18))
//!     .order_by("name")
//!     .to_vec(&CancelSignal::new())
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as datalayer_core;

pub mod backend;
pub mod cancel;
pub mod capability;
pub mod collection;
pub mod document;
pub mod error;
pub mod evaluator;
pub mod pipeline;
pub mod query;
pub mod queryable;
pub mod sequence;
pub mod store;
pub mod value;

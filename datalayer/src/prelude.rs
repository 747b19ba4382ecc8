//! Convenient re-exports of commonly used types from datalayer.
//!
//! ```ignore
//! use datalayer::prelude::*;
//! ```

pub use datalayer_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    cancel::CancelSignal,
    capability::Capabilities,
    collection::Collection,
    document::{CompositeKey, Document, DocumentExt, DocumentKey},
    error::{StoreError, StoreResult},
    query::{Expr, FieldOp, Filter, SortDirection},
    queryable::Queryable,
    store::Database,
};

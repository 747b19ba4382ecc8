//! The native table-service client interface.
//!
//! [`TableStore`](crate::store::TableStore) talks to a wide-column table service through
//! this trait. Entities are addressed by a partition key and a row key; queries take a
//! filter string (see [`crate::filter`]), an optional `$top` and a continuation token;
//! transactions apply up to [`MAX_TRANSACTION_ACTIONS`] actions within one partition
//! atomically.
//!
//! [`MemoryTableService`](crate::emulator::MemoryTableService) implements the trait
//! in-process; a client for a hosted service implements the same trait.

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use thiserror::Error;

/// Most actions a single transaction may carry.
pub const MAX_TRANSACTION_ACTIONS: usize = 100;

/// Most entities a single query response may carry.
pub const MAX_PAGE_SIZE: usize = 1000;

/// One stored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    /// Set by the service on every write.
    pub timestamp: Option<DateTime<Utc>>,
    pub properties: Document,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>, properties: Document) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: None,
            properties,
        }
    }
}

/// Parameters of one query request.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    pub filter: Option<String>,
    /// Maximum number of entities to return. Passed through unvalidated.
    pub top: Option<i64>,
    pub continuation: Option<String>,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct EntityPage {
    pub entities: Vec<TableEntity>,
    /// Present when more results follow.
    pub continuation: Option<String>,
}

/// One operation inside a transaction.
#[derive(Debug, Clone)]
pub enum TransactionAction {
    Insert(TableEntity),
    UpsertReplace(TableEntity),
    Delete { partition_key: String, row_key: String },
}

impl TransactionAction {
    pub fn partition_key(&self) -> &str {
        match self {
            TransactionAction::Insert(entity) | TransactionAction::UpsertReplace(entity) => &entity.partition_key,
            TransactionAction::Delete { partition_key, .. } => partition_key,
        }
    }
}

/// Failures reported by a table service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("entity {partition_key}/{row_key} not found")]
    EntityNotFound { partition_key: String, row_key: String },
    #[error("entity {partition_key}/{row_key} already exists")]
    EntityAlreadyExists { partition_key: String, row_key: String },
    /// The request was malformed (bad filter, negative `$top`, oversized transaction).
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type TableResult<T> = Result<T, TableError>;

/// A wide-column table service.
#[async_trait]
pub trait TableService: Send + Sync + Debug {
    /// Creates a table, returning `false` if it already existed.
    async fn create_table(&self, table: &str) -> TableResult<bool>;

    /// Deletes a table, returning `false` if it did not exist.
    async fn delete_table(&self, table: &str) -> TableResult<bool>;

    async fn list_tables(&self) -> TableResult<Vec<String>>;

    async fn get_entity(&self, table: &str, partition_key: &str, row_key: &str) -> TableResult<Option<TableEntity>>;

    /// Inserts an entity, failing with [`TableError::EntityAlreadyExists`] on a key conflict.
    async fn insert_entity(&self, table: &str, entity: TableEntity) -> TableResult<()>;

    /// Replaces an existing entity, failing with [`TableError::EntityNotFound`] if absent.
    async fn update_entity(&self, table: &str, entity: TableEntity) -> TableResult<()>;

    /// Inserts or replaces an entity.
    async fn upsert_entity(&self, table: &str, entity: TableEntity) -> TableResult<()>;

    /// Deletes an entity, returning `false` if it did not exist.
    async fn delete_entity(&self, table: &str, partition_key: &str, row_key: &str) -> TableResult<bool>;

    /// Returns one page of entities matching the query, ordered by partition key then row key.
    async fn query_entities(&self, table: &str, query: &EntityQuery) -> TableResult<EntityPage>;

    /// Applies every action or none. All actions must target the same partition.
    async fn submit_transaction(&self, table: &str, actions: Vec<TransactionAction>) -> TableResult<()>;
}

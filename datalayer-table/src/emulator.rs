//! An in-process table service.
//!
//! Behaves like a hosted table service for the operations [`TableService`] exposes: entities
//! are kept in partition-key/row-key order, queries are paged at [`MAX_PAGE_SIZE`], `$top`
//! and key characters are validated, and transactions are atomic, single-partition and
//! capped at [`MAX_TRANSACTION_ACTIONS`].

use async_trait::async_trait;
use chrono::Utc;
use mea::rwlock::RwLock;
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    odata,
    service::{
        EntityPage, EntityQuery, MAX_PAGE_SIZE, MAX_TRANSACTION_ACTIONS, TableEntity, TableError,
        TableResult, TableService, TransactionAction,
    },
};

type EntityKey = (String, String);
type Table = BTreeMap<EntityKey, TableEntity>;

const FORBIDDEN_KEY_CHARS: [char; 4] = ['/', '\\', '#', '?'];

/// Thread-safe in-process [`TableService`]. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableService {
    tables: Arc<RwLock<BTreeMap<String, Table>>>,
}

impl MemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }
}

fn table_not_found(table: &str) -> TableError {
    TableError::TableNotFound(table.to_string())
}

fn validate_key(key: &str) -> TableResult<()> {
    if key.chars().any(|c| FORBIDDEN_KEY_CHARS.contains(&c) || c.is_control()) {
        return Err(TableError::InvalidInput(format!(
            "key {key:?} contains a character not allowed in keys"
        )));
    }

    Ok(())
}

fn stamped(mut entity: TableEntity) -> TableResult<(EntityKey, TableEntity)> {
    validate_key(&entity.partition_key)?;
    validate_key(&entity.row_key)?;

    entity.timestamp = Some(Utc::now());
    Ok(((entity.partition_key.clone(), entity.row_key.clone()), entity))
}

fn apply(table: &mut Table, action: TransactionAction) -> TableResult<()> {
    match action {
        TransactionAction::Insert(entity) => {
            let (key, entity) = stamped(entity)?;
            if table.contains_key(&key) {
                return Err(TableError::EntityAlreadyExists {
                    partition_key: key.0,
                    row_key: key.1,
                });
            }
            table.insert(key, entity);
        }
        TransactionAction::UpsertReplace(entity) => {
            let (key, entity) = stamped(entity)?;
            table.insert(key, entity);
        }
        TransactionAction::Delete { partition_key, row_key } => {
            if table.remove(&(partition_key.clone(), row_key.clone())).is_none() {
                return Err(TableError::EntityNotFound { partition_key, row_key });
            }
        }
    }

    Ok(())
}

#[async_trait]
impl TableService for MemoryTableService {
    async fn create_table(&self, table: &str) -> TableResult<bool> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TableError::InvalidInput(format!(
                "table name {table:?} must be non-empty and alphanumeric"
            )));
        }

        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            return Ok(false);
        }

        tables.insert(table.to_string(), Table::new());
        Ok(true)
    }

    async fn delete_table(&self, table: &str) -> TableResult<bool> {
        Ok(self.tables.write().await.remove(table).is_some())
    }

    async fn list_tables(&self) -> TableResult<Vec<String>> {
        Ok(self.tables.read().await.keys().cloned().collect())
    }

    async fn get_entity(&self, table: &str, partition_key: &str, row_key: &str) -> TableResult<Option<TableEntity>> {
        let tables = self.tables.read().await;
        let entities = tables.get(table).ok_or_else(|| table_not_found(table))?;

        Ok(entities
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    async fn insert_entity(&self, table: &str, entity: TableEntity) -> TableResult<()> {
        let mut tables = self.tables.write().await;
        let entities = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;

        apply(entities, TransactionAction::Insert(entity))
    }

    async fn update_entity(&self, table: &str, entity: TableEntity) -> TableResult<()> {
        let mut tables = self.tables.write().await;
        let entities = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        let (key, entity) = stamped(entity)?;

        match entities.get_mut(&key) {
            Some(stored) => {
                *stored = entity;
                Ok(())
            }
            None => Err(TableError::EntityNotFound {
                partition_key: key.0,
                row_key: key.1,
            }),
        }
    }

    async fn upsert_entity(&self, table: &str, entity: TableEntity) -> TableResult<()> {
        let mut tables = self.tables.write().await;
        let entities = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;

        apply(entities, TransactionAction::UpsertReplace(entity))
    }

    async fn delete_entity(&self, table: &str, partition_key: &str, row_key: &str) -> TableResult<bool> {
        let mut tables = self.tables.write().await;
        let entities = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;

        Ok(entities
            .remove(&(partition_key.to_string(), row_key.to_string()))
            .is_some())
    }

    async fn query_entities(&self, table: &str, query: &EntityQuery) -> TableResult<EntityPage> {
        let filter = query.filter.as_deref().map(odata::parse).transpose()?;
        let page_size = match query.top {
            Some(top) if top < 0 => {
                return Err(TableError::InvalidInput(format!("$top must be non-negative, got {top}")));
            }
            Some(top) => usize::try_from(top).unwrap_or(usize::MAX).min(MAX_PAGE_SIZE),
            None => MAX_PAGE_SIZE,
        };
        let resume_after = match &query.continuation {
            Some(token) => Some(
                token
                    .split_once('\n')
                    .map(|(partition, row)| (partition.to_string(), row.to_string()))
                    .ok_or_else(|| TableError::InvalidInput(format!("malformed continuation token {token:?}")))?,
            ),
            None => None,
        };

        let tables = self.tables.read().await;
        let entities = tables.get(table).ok_or_else(|| table_not_found(table))?;

        let mut matching = entities
            .iter()
            .filter(|(key, _)| resume_after.as_ref().is_none_or(|after| *key > after))
            .filter(|(_, entity)| filter.as_ref().is_none_or(|filter| filter.matches(entity)))
            .map(|(_, entity)| entity);

        let page = matching
            .by_ref()
            .take(page_size)
            .cloned()
            .collect::<Vec<_>>();
        let continuation = match (page.last(), matching.next()) {
            (Some(last), Some(_)) => Some(format!("{}\n{}", last.partition_key, last.row_key)),
            _ => None,
        };

        Ok(EntityPage {
            entities: page,
            continuation,
        })
    }

    async fn submit_transaction(&self, table: &str, actions: Vec<TransactionAction>) -> TableResult<()> {
        if actions.len() > MAX_TRANSACTION_ACTIONS {
            return Err(TableError::InvalidInput(format!(
                "transaction carries {} actions; at most {MAX_TRANSACTION_ACTIONS} are allowed",
                actions.len()
            )));
        }
        if let Some(first) = actions.first() {
            let partition = first.partition_key();
            if actions.iter().any(|action| action.partition_key() != partition) {
                return Err(TableError::InvalidInput(
                    "transaction actions must share one partition key".to_string(),
                ));
            }
        }

        let mut tables = self.tables.write().await;
        let entities = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;

        let mut staged = entities.clone();
        for action in actions {
            apply(&mut staged, action)?;
        }
        *entities = staged;

        Ok(())
    }
}

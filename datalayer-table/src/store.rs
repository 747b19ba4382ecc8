//! Table-store backend.
//!
//! Every collection maps to one table named `{table_prefix}{collection}`. An item's partition
//! key is the partition of its [`StoreKey`] when it has one, otherwise the collection name;
//! its row key is the key's id. Item documents are stored as the entity's properties.
//!
//! Filters are compiled to service filter strings and run by the service. A `take` that
//! directly follows the filters is sent as `$top`; every other ordering and paging operation
//! runs in-process over the fetched entities.

use async_trait::async_trait;
use bson::Bson;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use datalayer_core::{
    backend::{DocumentStream, StoreBackend, StoreBackendBuilder},
    capability::{BulkFailure, Capabilities, NegativePaging, UpdateMissing},
    document::StoreKey,
    error::{StoreError, StoreResult},
    pipeline::{InProcessPlan, PlanBuilder},
    sequence::{QueryItem, QuerySequence},
};

use crate::{
    filter,
    service::{
        EntityQuery, MAX_TRANSACTION_ACTIONS, TableEntity, TableError, TableService, TransactionAction,
    },
};

pub(crate) const BACKEND: &str = "table";

/// A fetched entity: partition key, row key and stored document.
type Row = (String, String, Bson);

/// Storage backend over a [`TableService`].
///
/// `TableStore` is cloneable; clones share the service client and the table cache.
///
/// # Example
///
/// ```ignore
/// use datalayer_table::{TableStore, emulator::MemoryTableService};
/// use datalayer::store::Database;
///
/// let db = Database::open(TableStore::builder(MemoryTableService::new()).table_prefix("app")).await?;
/// ```
#[derive(Clone, Debug)]
pub struct TableStore {
    service: Arc<dyn TableService>,
    table_prefix: String,
    /// Tables known to exist, so writes skip the create call.
    tables: Arc<Mutex<HashSet<String>>>,
}

/// A sequence translated for the table service.
#[derive(Debug)]
struct TablePlan {
    filter: Option<String>,
    top: Option<i64>,
    post: InProcessPlan,
}

impl TableStore {
    pub fn builder(service: impl TableService + 'static) -> TableStoreBuilder {
        TableStoreBuilder {
            service: Arc::new(service),
            table_prefix: String::new(),
        }
    }

    fn table(&self, collection: &str) -> String {
        format!("{}{}", self.table_prefix, collection)
    }

    fn entity_keys(key: &StoreKey, collection: &str) -> (String, String) {
        let partition = key.partition.clone().unwrap_or_else(|| collection.to_string());
        (partition, key.id.clone())
    }

    fn entity(key: StoreKey, document: Bson, collection: &str) -> StoreResult<TableEntity> {
        let (partition, row) = Self::entity_keys(&key, collection);

        match document {
            Bson::Document(properties) => Ok(TableEntity::new(partition, row, properties)),
            other => Err(StoreError::Serialization(format!(
                "table entities must be documents, got {:?}",
                other.element_type()
            ))),
        }
    }

    async fn ensure_table(&self, collection: &str) -> StoreResult<String> {
        let table = self.table(collection);
        if self.tables.lock().contains(&table) {
            return Ok(table);
        }

        if self
            .service
            .create_table(&table)
            .await
            .map_err(|err| map_error(err, collection))?
        {
            tracing::info!(backend = BACKEND, table, "created table");
        }

        self.tables.lock().insert(table.clone());
        Ok(table)
    }

    fn plan(&self, query: &QuerySequence) -> StoreResult<TablePlan> {
        let mut filters = Vec::new();
        let mut top = None;
        let mut paged = false;
        let mut post = PlanBuilder::new(BACKEND, self.capabilities());

        for item in query.items() {
            match item {
                QueryItem::Where(expr) if paged => {
                    return Err(StoreError::unsupported(
                        BACKEND,
                        format!(
                            "where after skip or take cannot be sent to the table service ({expr:?}); filter before paging"
                        ),
                    ));
                }
                QueryItem::Where(expr) => filters.push(filter::compile(expr)?),
                QueryItem::Take(count) if !paged && post.is_empty() => {
                    top = Some(*count);
                    paged = true;
                }
                QueryItem::Take(_) | QueryItem::Skip(_) => {
                    post.push(item)?;
                    paged = true;
                }
                _ => post.push(item)?,
            }
        }

        let filter = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(
                filters
                    .iter()
                    .map(|part| format!("({part})"))
                    .collect::<Vec<_>>()
                    .join(" and "),
            ),
        };

        let plan = TablePlan {
            filter,
            top,
            post: post.build(),
        };
        tracing::debug!(backend = BACKEND, operations = %query, filter = ?plan.filter, top = ?plan.top, "planned table query");

        Ok(plan)
    }

    /// Fetches every entity the service returns for the plan's filter and `$top`, following
    /// continuation tokens.
    async fn fetch(&self, plan: &TablePlan, collection: &str) -> StoreResult<Vec<Row>> {
        if plan.top == Some(0) {
            return Ok(Vec::new());
        }

        let table = self.table(collection);
        let mut request = EntityQuery {
            filter: plan.filter.clone(),
            top: plan.top,
            continuation: None,
        };
        let mut rows = Vec::new();

        loop {
            let page = match self.service.query_entities(&table, &request).await {
                Ok(page) => page,
                Err(TableError::TableNotFound(_)) => return Ok(Vec::new()),
                Err(err) => return Err(map_error(err, collection)),
            };

            rows.extend(
                page.entities
                    .into_iter()
                    .map(|entity| (entity.partition_key, entity.row_key, Bson::Document(entity.properties))),
            );

            if let Some(top) = plan.top {
                let remaining = top - rows.len() as i64;
                if remaining <= 0 {
                    break;
                }
                request.top = Some(remaining);
            }

            match page.continuation {
                Some(token) => request.continuation = Some(token),
                None => break,
            }
        }

        Ok(plan.post.execute(rows, |(_, _, document)| document))
    }

    /// Submits actions as transactions of at most [`MAX_TRANSACTION_ACTIONS`], grouped by
    /// partition. Returns how many actions were committed; a failing chunk stops the batch
    /// but earlier chunks stay committed.
    async fn submit_chunked(
        &self,
        table: &str,
        actions: Vec<TransactionAction>,
        collection: &str,
        operation: &str,
    ) -> StoreResult<u64> {
        let mut partitions = BTreeMap::<String, Vec<TransactionAction>>::new();
        for action in actions {
            partitions
                .entry(action.partition_key().to_string())
                .or_default()
                .push(action);
        }

        let mut committed = 0;
        for (partition, actions) in partitions {
            let mut actions = actions.into_iter().peekable();

            while actions.peek().is_some() {
                let chunk = actions.by_ref().take(MAX_TRANSACTION_ACTIONS).collect::<Vec<_>>();
                let size = chunk.len() as u64;

                if let Err(err) = self.service.submit_transaction(table, chunk).await {
                    tracing::warn!(
                        backend = BACKEND,
                        collection,
                        operation,
                        partition,
                        committed,
                        error = %err,
                        "transaction chunk failed; aborting batch"
                    );
                    return Err(map_error(err, collection));
                }
                committed += size;
            }
        }

        Ok(committed)
    }
}

/// Maps a service failure onto the store error taxonomy.
fn map_error(err: TableError, collection: &str) -> StoreError {
    match err {
        TableError::EntityAlreadyExists { partition_key, row_key } => {
            StoreError::duplicate_key(format!("{partition_key}/{row_key}"), collection)
        }
        TableError::EntityNotFound { partition_key, row_key } => {
            StoreError::not_found(format!("{partition_key}/{row_key}"), collection)
        }
        other => StoreError::backend(BACKEND, other),
    }
}

#[async_trait]
impl StoreBackend for TableStore {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            multiple_order_by: true,
            negative_paging: NegativePaging::PassThrough,
            update_missing: UpdateMissing::Fail,
            bulk_failure: BulkFailure::AbortBatch,
            upsert_counts_unchanged: true,
            atomic_upsert: false,
        }
    }

    async fn initialize(&self) -> StoreResult<()> {
        let tables = self
            .service
            .list_tables()
            .await
            .map_err(|err| StoreError::Initialization(err.to_string()))?;

        let mut known = self.tables.lock();
        known.extend(tables);
        tracing::info!(backend = BACKEND, prefix = %self.table_prefix, tables = known.len(), "table store initialized");

        Ok(())
    }

    async fn get_document(&self, key: &StoreKey, collection: &str) -> StoreResult<Option<Bson>> {
        let (partition, row) = Self::entity_keys(key, collection);

        match self.service.get_entity(&self.table(collection), &partition, &row).await {
            Ok(entity) => Ok(entity.map(|entity| Bson::Document(entity.properties))),
            Err(TableError::TableNotFound(_)) => Ok(None),
            Err(err) => Err(map_error(err, collection)),
        }
    }

    async fn insert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        let table = self.ensure_table(collection).await?;
        let entity = Self::entity(key.clone(), document, collection)?;

        match self.service.insert_entity(&table, entity).await {
            Ok(()) => Ok(()),
            Err(TableError::EntityAlreadyExists { .. }) => Err(StoreError::duplicate_key(key, collection)),
            Err(err) => Err(map_error(err, collection)),
        }
    }

    async fn insert_documents(&self, documents: Vec<(StoreKey, Bson)>, collection: &str) -> StoreResult<u64> {
        let table = self.ensure_table(collection).await?;
        let actions = documents
            .into_iter()
            .map(|(key, document)| Self::entity(key, document, collection).map(TransactionAction::Insert))
            .collect::<StoreResult<Vec<_>>>()?;

        self.submit_chunked(&table, actions, collection, "insert").await
    }

    async fn update_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        let entity = Self::entity(key.clone(), document, collection)?;

        match self.service.update_entity(&self.table(collection), entity).await {
            Ok(()) => Ok(()),
            Err(TableError::EntityNotFound { .. } | TableError::TableNotFound(_)) => {
                Err(StoreError::not_found(key, collection))
            }
            Err(err) => Err(map_error(err, collection)),
        }
    }

    async fn upsert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<bool> {
        let table = self.ensure_table(collection).await?;
        let entity = Self::entity(key, document, collection)?;

        self.service
            .upsert_entity(&table, entity)
            .await
            .map_err(|err| map_error(err, collection))?;

        Ok(true)
    }

    async fn upsert_documents(&self, documents: Vec<(StoreKey, Bson)>, collection: &str) -> StoreResult<u64> {
        let table = self.ensure_table(collection).await?;
        let actions = documents
            .into_iter()
            .map(|(key, document)| Self::entity(key, document, collection).map(TransactionAction::UpsertReplace))
            .collect::<StoreResult<Vec<_>>>()?;

        self.submit_chunked(&table, actions, collection, "upsert").await
    }

    async fn delete_document(&self, key: &StoreKey, collection: &str) -> StoreResult<bool> {
        let (partition, row) = Self::entity_keys(key, collection);

        match self.service.delete_entity(&self.table(collection), &partition, &row).await {
            Ok(existed) => Ok(existed),
            Err(TableError::TableNotFound(_)) => Ok(false),
            Err(err) => Err(map_error(err, collection)),
        }
    }

    async fn count_documents(&self, collection: &str) -> StoreResult<u64> {
        let plan = TablePlan {
            filter: None,
            top: None,
            post: InProcessPlan::default(),
        };

        Ok(self.fetch(&plan, collection).await?.len() as u64)
    }

    async fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        let table = self.table(collection);
        let existed = self
            .service
            .delete_table(&table)
            .await
            .map_err(|err| map_error(err, collection))?;

        self.tables.lock().remove(&table);
        Ok(existed)
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let tables = self
            .service
            .list_tables()
            .await
            .map_err(|err| StoreError::backend(BACKEND, err))?;

        Ok(tables
            .into_iter()
            .filter_map(|table| table.strip_prefix(self.table_prefix.as_str()).map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect())
    }

    async fn query_documents(&self, query: &QuerySequence, collection: &str) -> StoreResult<DocumentStream> {
        let plan = self.plan(query)?;
        let rows = self.fetch(&plan, collection).await?;

        tracing::debug!(backend = BACKEND, collection, operations = %query, results = rows.len(), "executed query");

        Ok(stream::iter(rows.into_iter().map(|(_, _, document)| Ok(document))).boxed())
    }

    async fn count_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let plan = self.plan(query)?;
        Ok(self.fetch(&plan, collection).await?.len() as u64)
    }

    async fn delete_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let plan = self.plan(query)?;
        let rows = self.fetch(&plan, collection).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let actions = rows
            .into_iter()
            .map(|(partition_key, row_key, _)| TransactionAction::Delete { partition_key, row_key })
            .collect();

        self.submit_chunked(&self.table(collection), actions, collection, "delete")
            .await
    }
}

/// Builder for [`TableStore`].
pub struct TableStoreBuilder {
    service: Arc<dyn TableService>,
    table_prefix: String,
}

impl TableStoreBuilder {
    /// Prepends `prefix` to every table name, so several databases can share one account.
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for TableStoreBuilder {
    type Backend = TableStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        if !self.table_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::Initialization(format!(
                "table prefix {:?} must be alphanumeric",
                self.table_prefix
            )));
        }

        Ok(TableStore {
            service: self.service,
            table_prefix: self.table_prefix,
            tables: Arc::new(Mutex::new(HashSet::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::MemoryTableService;
    use bson::doc;
    use datalayer_core::{
        cancel::CancelSignal,
        document::{CompositeKey, Document},
        query::Filter,
        store::Database,
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        id: CompositeKey,
        sensor: String,
        value: i64,
    }

    impl Document for Reading {
        type Key = CompositeKey;

        fn id(&self) -> &CompositeKey {
            &self.id
        }

        fn collection_name() -> &'static str {
            "readings"
        }
    }

    fn reading(sensor: &str, sequence: i64) -> Reading {
        Reading {
            id: CompositeKey::new(sensor, format!("{sequence:04}")),
            sensor: sensor.to_string(),
            value: sequence,
        }
    }

    async fn store() -> TableStore {
        TableStore::builder(MemoryTableService::new())
            .table_prefix("test")
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn composite_keys_map_to_partition_and_row() {
        let service = MemoryTableService::new();
        let db = Database::open(TableStore::builder(service.clone())).await.unwrap();
        let readings = db.collection::<Reading>();

        readings.insert(reading("north", 1)).await.unwrap();

        let entity = service.get_entity("readings", "north", "0001").await.unwrap().unwrap();
        assert_eq!(entity.properties.get_i64("value").unwrap(), 1);
        assert!(entity.timestamp.is_some());
    }

    #[tokio::test]
    async fn bulk_writes_span_transaction_chunks() {
        let db = Database::open(TableStore::builder(MemoryTableService::new())).await.unwrap();
        let readings = db.collection::<Reading>();

        let batch = (0..250)
            .map(|n| reading(if n % 2 == 0 { "even" } else { "odd" }, n))
            .collect::<Vec<_>>();
        assert_eq!(readings.insert_many(batch).await.unwrap(), 250);
        assert_eq!(readings.count().await.unwrap(), 250);

        let removed = readings
            .query()
            .filter(Filter::eq("sensor", "even"))
            .delete(&CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(removed, 125);
        assert_eq!(readings.count().await.unwrap(), 125);
    }

    #[tokio::test]
    async fn failing_chunk_keeps_earlier_chunks() {
        let db = Database::open(TableStore::builder(MemoryTableService::new())).await.unwrap();
        let readings = db.collection::<Reading>();
        readings.insert(reading("b", 1)).await.unwrap();

        let batch = vec![reading("a", 1), reading("a", 2), reading("b", 1), reading("b", 2)];
        let err = readings.insert_many(batch).await.unwrap_err();

        assert!(err.is_duplicate_key());
        assert_eq!(readings.count().await.unwrap(), 3);
        assert!(readings.get(&CompositeKey::new("b", "0002")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_is_sent_as_top() {
        let store = store().await;
        for id in 0..20 {
            store
                .insert_document(StoreKey::new(format!("{id:02}")), Bson::Document(doc! { "n": id }), "numbers")
                .await
                .unwrap();
        }

        let query: QuerySequence = [QueryItem::Where(Filter::gte("n", 5)), QueryItem::Take(3)]
            .into_iter()
            .collect();
        let plan = store.plan(&query).unwrap();
        assert_eq!(plan.filter.as_deref(), Some("n ge 5"));
        assert_eq!(plan.top, Some(3));
        assert_eq!(store.count_query(&query, "numbers").await.unwrap(), 3);

        let ordered: QuerySequence = [QueryItem::OrderByDescending("n".into()), QueryItem::Take(3)]
            .into_iter()
            .collect();
        let plan = store.plan(&ordered).unwrap();
        assert_eq!(plan.top, None);

        let mut results = store.query_documents(&ordered, "numbers").await.unwrap();
        let first = results.next().await.unwrap().unwrap();
        assert_eq!(first.as_document().unwrap().get_i32("n").unwrap(), 19);
    }

    #[tokio::test]
    async fn negative_take_is_rejected_by_the_service() {
        let store = store().await;
        store
            .insert_document(StoreKey::new("1"), Bson::Document(doc! { "n": 1 }), "numbers")
            .await
            .unwrap();

        let query: QuerySequence = [QueryItem::Take(-1)].into_iter().collect();
        let err = store.count_query(&query, "numbers").await.unwrap_err();

        assert!(matches!(err, StoreError::Backend { .. }));
    }

    #[tokio::test]
    async fn untranslatable_queries_fail_before_io() {
        let store = store().await;

        let after_paging: QuerySequence = [QueryItem::Skip(1), QueryItem::Where(Filter::eq("n", 1))]
            .into_iter()
            .collect();
        assert!(matches!(
            store.plan(&after_paging),
            Err(StoreError::UnsupportedOperation { .. })
        ));

        let closure: QuerySequence = [QueryItem::Where(Filter::predicate("odd", |_| true))]
            .into_iter()
            .collect();
        assert!(matches!(
            store.query_documents(&closure, "numbers").await,
            Err(StoreError::UnsupportedOperation { .. })
        ));
    }

    #[tokio::test]
    async fn missing_tables_read_as_empty() {
        let store = store().await;

        assert_eq!(store.count_documents("ghosts").await.unwrap(), 0);
        assert!(store.get_document(&StoreKey::new("1"), "ghosts").await.unwrap().is_none());
        assert!(!store.delete_document(&StoreKey::new("1"), "ghosts").await.unwrap());
        assert!(
            store
                .update_document(StoreKey::new("1"), Bson::Document(doc! {}), "ghosts")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(!store.drop_collection("ghosts").await.unwrap());
    }

    #[tokio::test]
    async fn collections_are_listed_without_prefix() {
        let store = store().await;
        store
            .insert_document(StoreKey::new("1"), Bson::Document(doc! { "n": 1 }), "numbers")
            .await
            .unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["numbers".to_string()]);
    }
}

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::ClientOptions,
};

use datalayer_core::{
    backend::{DocumentStream, StoreBackend, StoreBackendBuilder},
    capability::{BulkFailure, Capabilities, NegativePaging, UpdateMissing},
    document::StoreKey,
    error::{StoreError, StoreResult},
    sequence::QuerySequence,
};

use crate::{pipeline, query};

pub(crate) const BACKEND: &str = "mongodb";

/// Server error code for a unique index violation.
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(collection_name)
    }

    async fn aggregate(&self, stages: Vec<Document>, collection: &str) -> StoreResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(stages)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }
}

/// The `_id` an item is stored under.
fn document_id(key: &StoreKey) -> Bson {
    match &key.partition {
        Some(partition) => Bson::Document(doc! { "partition": partition.as_str(), "id": key.id.as_str() }),
        None => Bson::String(key.id.clone()),
    }
}

fn prepare_document(key: &StoreKey, document: Bson) -> StoreResult<Document> {
    match document {
        Bson::Document(mut document) => {
            document.insert("_id", document_id(key));
            Ok(document)
        }
        other => Err(StoreError::Serialization(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
    }
}

fn restore_document(mut document: Document) -> Bson {
    document.remove("_id");
    Bson::Document(document)
}

fn backend_error(err: MongoError) -> StoreError {
    StoreError::backend(BACKEND, err)
}

/// Maps a failed write, turning unique index violations into [`StoreError::DuplicateKey`].
/// `keys` are the keys of the written items, in submission order.
fn write_error(err: MongoError, keys: &[StoreKey], collection: &str) -> StoreError {
    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY => {
            Some(keys.first().map(ToString::to_string))
        }
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .iter()
            .flatten()
            .find(|failure| failure.code == DUPLICATE_KEY)
            .map(|failure| keys.get(failure.index).map(ToString::to_string)),
        _ => None,
    };

    match duplicate {
        Some(key) => StoreError::duplicate_key(key.unwrap_or_else(|| "<unknown>".to_string()), collection),
        None => backend_error(err),
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
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
            atomic_upsert: true,
        }
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Initialization(e.to_string()))?;

        tracing::info!(backend = BACKEND, database = %self.database, "connected to mongodb");
        Ok(())
    }

    async fn get_document(&self, key: &StoreKey, collection: &str) -> StoreResult<Option<Bson>> {
        Ok(self
            .get_collection(collection)
            .find_one(doc! { "_id": document_id(key) })
            .await
            .map_err(backend_error)?
            .map(restore_document))
    }

    async fn insert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        self.get_collection(collection)
            .insert_one(prepare_document(&key, document)?)
            .await
            .map_err(|e| write_error(e, std::slice::from_ref(&key), collection))?;

        Ok(())
    }

    async fn insert_documents(&self, documents: Vec<(StoreKey, Bson)>, collection: &str) -> StoreResult<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        let keys = documents.iter().map(|(key, _)| key.clone()).collect::<Vec<_>>();
        let documents = documents
            .into_iter()
            .map(|(key, document)| prepare_document(&key, document))
            .collect::<StoreResult<Vec<Document>>>()?;

        let result = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| write_error(e, &keys, collection))?;

        Ok(result.inserted_ids.len() as u64)
    }

    async fn update_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<()> {
        let result = self
            .get_collection(collection)
            .replace_one(doc! { "_id": document_id(&key) }, prepare_document(&key, document)?)
            .await
            .map_err(backend_error)?;

        if result.matched_count == 0 {
            return Err(StoreError::not_found(key, collection));
        }

        Ok(())
    }

    async fn upsert_document(&self, key: StoreKey, document: Bson, collection: &str) -> StoreResult<bool> {
        self.get_collection(collection)
            .replace_one(doc! { "_id": document_id(&key) }, prepare_document(&key, document)?)
            .upsert(true)
            .await
            .map_err(backend_error)?;

        Ok(true)
    }

    async fn delete_document(&self, key: &StoreKey, collection: &str) -> StoreResult<bool> {
        let result = self
            .get_collection(collection)
            .delete_one(doc! { "_id": document_id(key) })
            .await
            .map_err(backend_error)?;

        Ok(result.deleted_count > 0)
    }

    async fn delete_documents(&self, keys: Vec<StoreKey>, collection: &str) -> StoreResult<u64> {
        let ids = keys.iter().map(document_id).collect::<Vec<_>>();

        Ok(self
            .get_collection(collection)
            .delete_many(doc! { "_id": { "$in": ids } })
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn count_documents(&self, collection: &str) -> StoreResult<u64> {
        self.get_collection(collection)
            .count_documents(doc! {})
            .await
            .map_err(backend_error)
    }

    async fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        if !self.list_collections().await?.iter().any(|name| name == collection) {
            return Ok(false);
        }

        self.get_collection(collection)
            .drop()
            .await
            .map_err(backend_error)?;

        Ok(true)
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)
    }

    async fn query_documents(&self, query: &QuerySequence, collection: &str) -> StoreResult<DocumentStream> {
        let stages = pipeline::compile(self.capabilities(), query)?;

        let cursor = self
            .get_collection(collection)
            .aggregate(stages)
            .await
            .map_err(backend_error)?;

        Ok(cursor
            .map(|result| result.map(restore_document).map_err(backend_error))
            .boxed())
    }

    async fn count_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let mut stages = pipeline::compile(self.capabilities(), query)?;
        stages.push(doc! { "$count": "count" });

        let count = match self.aggregate(stages, collection).await?.first().and_then(|doc| doc.get("count")) {
            Some(Bson::Int32(n)) => *n as u64,
            Some(Bson::Int64(n)) => *n as u64,
            _ => 0,
        };

        Ok(count)
    }

    async fn delete_query(&self, query: &QuerySequence, collection: &str) -> StoreResult<u64> {
        let filter = if query.is_filter_only() {
            match query.combined_filter() {
                Some(expr) => query::compile(&expr)?,
                None => doc! {},
            }
        } else {
            let mut stages = pipeline::compile(self.capabilities(), query)?;
            stages.push(doc! { "$project": { "_id": 1 } });

            let ids = self
                .aggregate(stages, collection)
                .await?
                .into_iter()
                .filter_map(|mut doc| doc.remove("_id"))
                .collect::<Vec<_>>();
            if ids.is_empty() {
                return Ok(0);
            }

            doc! { "_id": { "$in": ids } }
        };

        let result = self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(backend_error)?;

        tracing::debug!(backend = BACKEND, collection, operations = %query, deleted = result.deleted_count, "deleted by query");

        Ok(result.deleted_count)
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.client.clone().shutdown().await;
        tracing::info!(backend = BACKEND, database = %self.database, "mongodb client shut down");

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        if self.database.is_empty() {
            return Err(StoreError::Initialization("database name must not be empty".to_string()));
        }

        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| StoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| StoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_encode_partitions() {
        assert_eq!(document_id(&StoreKey::new("7")), Bson::String("7".into()));
        assert_eq!(
            document_id(&StoreKey::partitioned("eu", "7")),
            Bson::Document(doc! { "partition": "eu", "id": "7" })
        );
    }

    #[test]
    fn stored_documents_round_trip_without_id() {
        let stored = prepare_document(&StoreKey::new("7"), Bson::Document(doc! { "name": "Ada" })).unwrap();
        assert_eq!(stored.get_str("_id").unwrap(), "7");

        assert_eq!(restore_document(stored), Bson::Document(doc! { "name": "Ada" }));
        assert!(matches!(
            prepare_document(&StoreKey::new("7"), Bson::Int32(1)),
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn builder_rejects_malformed_connection_strings() {
        let err = MongoDbStore::builder("not-a-uri", "app").build().await.unwrap_err();
        assert!(matches!(err, StoreError::Initialization(_)));

        let err = MongoDbStore::builder("mongodb://localhost:27017", "").build().await.unwrap_err();
        assert!(matches!(err, StoreError::Initialization(_)));
    }
}

//! Backend selection from configuration.
//!
//! A [`BackendConfig`] names a backend and its settings. It deserializes from any serde
//! format; the `backend` field picks the variant:
//!
//! ```json
//! { "backend": "memory" }
//! { "backend": "embedded", "path": "./data" }
//! { "backend": "table", "table_prefix": "app" }
//! { "backend": "mongodb", "dsn": "mongodb://localhost:27017", "database": "app" }
//! ```
//!
//! [`connect`] builds and initializes the selected backend and returns a database whose
//! backend type is erased, so the rest of the application is written once for all of them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use datalayer_core::{
    backend::StoreBackend,
    error::StoreResult,
    store::Database,
};
use datalayer_embedded::EmbeddedStore;
use datalayer_memory::InMemoryStore;
use datalayer_table::{MemoryTableService, TableStore};

/// Which backend to open, with its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    Memory,
    Embedded {
        /// Directory holding one file per collection. Created on connect.
        path: PathBuf,
    },
    /// A table store over the in-process table service.
    Table {
        #[serde(default)]
        table_prefix: String,
    },
    Mongodb {
        dsn: String,
        database: String,
    },
}

impl BackendConfig {
    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The name the selected backend reports.
    pub fn backend_name(&self) -> &'static str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::Embedded { .. } => "embedded",
            BackendConfig::Table { .. } => "table",
            BackendConfig::Mongodb { .. } => "mongodb",
        }
    }
}

/// Builds and initializes the configured backend.
pub async fn connect(config: &BackendConfig) -> StoreResult<Database<dyn StoreBackend>> {
    tracing::info!(backend = config.backend_name(), "connecting");

    let database = match config {
        BackendConfig::Memory => Database::open(InMemoryStore::builder()).await?.into_dyn(),
        BackendConfig::Embedded { path } => Database::open(EmbeddedStore::builder(path.clone()))
            .await?
            .into_dyn(),
        BackendConfig::Table { table_prefix } => {
            Database::open(TableStore::builder(MemoryTableService::new()).table_prefix(table_prefix.clone()))
                .await?
                .into_dyn()
        }
        BackendConfig::Mongodb { dsn, database } => connect_mongodb(dsn, database).await?,
    };

    Ok(database)
}

#[cfg(feature = "mongodb")]
async fn connect_mongodb(dsn: &str, database: &str) -> StoreResult<Database<dyn StoreBackend>> {
    use datalayer_mongodb::MongoDbStore;

    Ok(Database::open(MongoDbStore::builder(dsn, database)).await?.into_dyn())
}

#[cfg(not(feature = "mongodb"))]
async fn connect_mongodb(_dsn: &str, _database: &str) -> StoreResult<Database<dyn StoreBackend>> {
    Err(datalayer_core::error::StoreError::Initialization(
        "the mongodb backend requires the `mongodb` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalayer_core::error::StoreError;

    #[test]
    fn configs_deserialize_by_tag() {
        assert_eq!(BackendConfig::from_json(r#"{ "backend": "memory" }"#).unwrap(), BackendConfig::Memory);
        assert_eq!(
            BackendConfig::from_json(r#"{ "backend": "embedded", "path": "/tmp/data" }"#).unwrap(),
            BackendConfig::Embedded { path: "/tmp/data".into() }
        );
        assert_eq!(
            BackendConfig::from_json(r#"{ "backend": "table" }"#).unwrap(),
            BackendConfig::Table { table_prefix: String::new() }
        );
        assert!(matches!(
            BackendConfig::from_json(r#"{ "backend": "sqlite" }"#),
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn connect_initializes_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::Embedded { path: dir.path().join("db") };

        let db = connect(&config).await.unwrap();

        assert_eq!(db.backend().name(), "embedded");
        assert!(dir.path().join("db").is_dir());
    }
}

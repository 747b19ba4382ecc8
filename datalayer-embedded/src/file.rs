//! On-disk format of one collection.
//!
//! A collection is a JSON-lines file: one [`Record`] per line, in insertion order. Documents
//! are written as canonical extended JSON so every BSON type (Int64, NaN, dates) reloads
//! unchanged. Writes replace the whole file by writing a temporary sibling and renaming it
//! over the original.

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};

use datalayer_core::{
    document::StoreKey,
    error::{StoreError, StoreResult},
};

use crate::store::BACKEND;

pub(crate) const EXTENSION: &str = "jsonl";

/// One stored item.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub key: StoreKey,
    pub document: Bson,
}

impl Record {
    pub fn new(key: StoreKey, document: Bson) -> Self {
        Self { key, document }
    }

    fn to_line(&self) -> StoreResult<String> {
        let line = Line {
            key: self.key.clone(),
            document: self.document.clone().into_canonical_extjson(),
        };
        Ok(serde_json::to_string(&line)?)
    }

    fn from_line(line: &str) -> StoreResult<Self> {
        let line = serde_json::from_str::<Line>(line)?;
        Ok(Self::new(line.key, Bson::try_from(line.document)?))
    }
}

/// A record as it appears in the file.
#[derive(Serialize, Deserialize)]
struct Line {
    key: StoreKey,
    document: serde_json::Value,
}

/// Handle to the file backing one collection.
#[derive(Debug)]
pub(crate) struct CollectionFile {
    path: PathBuf,
}

impl CollectionFile {
    pub fn new(root: &Path, collection: &str) -> StoreResult<Self> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !collection.starts_with('.');

        if !valid {
            return Err(StoreError::invalid(
                BACKEND,
                format!("collection name {collection:?} must be ASCII alphanumerics, '_', '-' or '.'"),
            ));
        }

        Ok(Self {
            path: root.join(format!("{collection}.{EXTENSION}")),
        })
    }

    /// Reads every record. A missing file is an empty collection.
    pub async fn load(&self) -> StoreResult<Vec<Record>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.path, err)),
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                Record::from_line(line).map_err(|err| {
                    StoreError::Serialization(format!("{}:{}: {err}", self.path.display(), index + 1))
                })
            })
            .collect()
    }

    /// Replaces the file's contents with `records`.
    pub async fn persist(&self, records: &[Record]) -> StoreResult<()> {
        let mut contents = String::new();
        for record in records {
            contents.push_str(&record.to_line()?);
            contents.push('\n');
        }

        let temp_path = self.path.with_extension(format!("{EXTENSION}.tmp"));
        {
            let mut file = fs::File::create(&temp_path)
                .await
                .map_err(|err| io_error(&temp_path, err))?;
            file.write_all(contents.as_bytes())
                .await
                .map_err(|err| io_error(&temp_path, err))?;
            file.sync_all()
                .await
                .map_err(|err| io_error(&temp_path, err))?;
        }

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|err| io_error(&self.path, err))
    }

    /// Deletes the file, returning whether it existed.
    pub async fn remove(&self) -> StoreResult<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&self.path, err)),
        }
    }
}

/// Serialized form used to decide whether an upsert changes anything.
pub(crate) fn fingerprint(document: &Bson) -> StoreResult<String> {
    Ok(document.clone().into_canonical_extjson().to_string())
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::backend(BACKEND, format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn records_survive_a_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = CollectionFile::new(dir.path(), "people").unwrap();

        assert!(file.load().await.unwrap().is_empty());

        let records = vec![
            Record::new(StoreKey::new("1"), Bson::Document(doc! { "id": 1, "name": "Ada" })),
            Record::new(StoreKey::partitioned("eu", "2"), Bson::Document(doc! { "id": 2, "tags": ["x"] })),
        ];
        file.persist(&records).await.unwrap();

        let loaded = file.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].key, StoreKey::partitioned("eu", "2"));
        assert_eq!(
            fingerprint(&loaded[0].document).unwrap(),
            fingerprint(&records[0].document).unwrap()
        );

        assert!(file.remove().await.unwrap());
        assert!(!file.remove().await.unwrap());
    }

    #[tokio::test]
    async fn bson_types_reload_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = CollectionFile::new(dir.path(), "metrics").unwrap();
        let created = bson::DateTime::from_millis(1_700_000_000_123);
        let document = Bson::Document(doc! {
            "id": 1,
            "big": 5_i64,
            "wide": 9_007_199_254_740_993_i64,
            "ratio": f64::NAN,
            "ceiling": f64::INFINITY,
            "created": created,
        });

        file.persist(&[Record::new(StoreKey::new("1"), document.clone())]).await.unwrap();
        let loaded = file.load().await.unwrap();
        let reloaded = loaded[0].document.as_document().unwrap();

        assert_eq!(reloaded.get("id"), Some(&Bson::Int32(1)));
        assert_eq!(reloaded.get("big"), Some(&Bson::Int64(5)));
        assert_eq!(reloaded.get("wide"), Some(&Bson::Int64(9_007_199_254_740_993)));
        assert!(reloaded.get_f64("ratio").unwrap().is_nan());
        assert_eq!(reloaded.get_f64("ceiling").unwrap(), f64::INFINITY);
        assert_eq!(reloaded.get_datetime("created").unwrap(), &created);
        assert_eq!(fingerprint(&loaded[0].document).unwrap(), fingerprint(&document).unwrap());
    }

    #[test]
    fn nan_and_null_fingerprint_differently() {
        let nan = Bson::Document(doc! { "ratio": f64::NAN });
        let null = Bson::Document(doc! { "ratio": Bson::Null });

        assert_ne!(fingerprint(&nan).unwrap(), fingerprint(&null).unwrap());
    }

    #[test]
    fn path_like_collection_names_are_rejected() {
        let root = Path::new("/tmp");

        assert!(CollectionFile::new(root, "../escape").is_err());
        assert!(CollectionFile::new(root, "").is_err());
        assert!(CollectionFile::new(root, "orders_2024").is_ok());
    }
}

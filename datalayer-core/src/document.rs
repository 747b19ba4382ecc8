//! Core traits and types for item representation and key encoding.
//!
//! Items are user record types that serialize to a BSON document. Every item exposes a typed
//! key ([`Document::Key`]); backends never see the typed key directly, only its storage
//! encoding, the [`StoreKey`].

use bson::{Bson, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize};
use std::{fmt, hash::Hash};

use crate::error::{StoreError, StoreResult};

/// Core trait that all items stored in a collection must implement.
///
/// # Example
///
/// ```ignore
/// use datalayer::document::Document;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     pub id: i64,
///     pub name: String,
/// }
///
/// impl Document for User {
///     type Key = i64;
///
///     fn id(&self) -> &i64 {
///         &self.id
///     }
///
///     fn collection_name() -> &'static str {
///         "users"
///     }
/// }
/// ```
pub trait Document: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// The identity type of this item. Its storage encoding is backend-independent.
    type Key: DocumentKey;

    /// Returns a reference to this item's identity.
    fn id(&self) -> &Self::Key;

    /// Returns the default name of the collection this item belongs to.
    fn collection_name() -> &'static str;
}

/// A value usable as an item identity.
///
/// Implementations must encode equal keys to equal [`StoreKey`]s.
pub trait DocumentKey: Clone + Send + Sync + fmt::Debug + 'static {
    /// Encodes this key for storage.
    fn store_key(&self) -> StoreKey;
}

/// Storage encoding of an item key.
///
/// `partition` is only populated by keys that carry one ([`CompositeKey`]); backends with a
/// native partition concept use it, everyone else folds it into the key's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    pub partition: Option<String>,
    pub id: String,
}

impl StoreKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self { partition: None, id: id.into() }
    }

    pub fn partitioned(partition: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            partition: Some(partition.into()),
            id: id.into(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(partition) => write!(f, "{}/{}", partition, self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// A two-part key for stores that partition their data, such as table stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey {
    pub partition: String,
    pub row: String,
}

impl CompositeKey {
    pub fn new(partition: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            row: row.into(),
        }
    }
}

impl DocumentKey for CompositeKey {
    fn store_key(&self) -> StoreKey {
        StoreKey::partitioned(self.partition.clone(), self.row.clone())
    }
}

macro_rules! display_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DocumentKey for $ty {
                fn store_key(&self) -> StoreKey {
                    StoreKey::new(self.to_string())
                }
            }
        )*
    };
}

display_key!(i32, i64, u32, String, uuid::Uuid, bson::Uuid);

/// Extension trait converting items to and from their stored BSON form.
///
/// Automatically implemented for every [`Document`].
pub trait DocumentExt: Document {
    /// Converts this item to a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the item does not serialize to a document.
    fn to_bson(&self) -> StoreResult<Bson>;

    /// Creates an item from a stored BSON value.
    fn from_bson(bson: Bson) -> StoreResult<Self>;

    /// Pairs the item's storage key with its BSON form.
    fn to_entry(&self) -> StoreResult<(StoreKey, Bson)>;
}

impl<D: Document> DocumentExt for D {
    fn to_bson(&self) -> StoreResult<Bson> {
        match serialize_to_bson(self)? {
            document @ Bson::Document(_) => Ok(document),
            other => Err(StoreError::Serialization(format!(
                "item must serialize to a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    fn from_bson(bson: Bson) -> StoreResult<Self> {
        Ok(deserialize_from_bson(bson)?)
    }

    fn to_entry(&self) -> StoreResult<(StoreKey, Bson)> {
        Ok((self.id().store_key(), self.to_bson()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        id: CompositeKey,
        value: f64,
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

    #[test]
    fn composite_keys_carry_their_partition() {
        let key = CompositeKey::new("sensor-1", "0001").store_key();

        assert_eq!(key.partition.as_deref(), Some("sensor-1"));
        assert_eq!(key.id, "0001");
        assert_eq!(key.to_string(), "sensor-1/0001");
    }

    #[test]
    fn scalar_keys_have_no_partition() {
        assert_eq!(42i64.store_key(), StoreKey::new("42"));
        assert_eq!("abc".to_string().store_key().to_string(), "abc");
    }

    #[test]
    fn entries_round_trip_through_bson() {
        let reading = Reading {
            id: CompositeKey::new("sensor-1", "0001"),
            value: 21.5,
        };

        let (key, bson) = reading.to_entry().unwrap();
        assert_eq!(key, StoreKey::partitioned("sensor-1", "0001"));
        assert_eq!(Reading::from_bson(bson).unwrap(), reading);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{
    de::{DeserializeOwned, Error as DeError},
    Deserialize, Serialize,
};
use serde_json::{Map, Value};
use thiserror::Error;

mod memory;
mod subscription;

pub use memory::*;
pub use subscription::*;

pub type Result<T> = std::result::Result<T, StoreError>;

/// The opaque id of a record, generated by the store
pub type RecordId = String;

/// The untyped contents of a record
pub type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A record doesn't exist. Callers branch on this, so it is never folded into [StoreError::Unavailable]
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// The store could not be reached or failed to process the request
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
    /// A record's fields could not be converted to or from the requested type
    #[error("Malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Helper trait to branch on missing records without matching on the error
pub trait StoreResultExt<T> {
    /// Turns a [StoreError::NotFound] into `Ok(None)`
    fn found(self) -> Result<Option<T>>;
}

impl<T> StoreResultExt<T> for Result<T> {
    fn found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A single record in a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub fields: Fields,
}

impl Record {
    /// Decodes the fields of this record into a typed value
    pub fn decode<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// Merges the given fields into this record, overwriting fields that exist
    pub fn merge(&mut self, fields: Fields) {
        for (key, value) in fields {
            self.fields.insert(key, value);
        }
    }
}

/// Encodes a typed value as record fields.
/// The value must serialize to an object.
pub fn encode_fields<T>(value: &T) -> Result<Fields>
where
    T: Serialize,
{
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Malformed(DeError::custom(format!(
            "expected an object of fields, got {}",
            other
        )))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Updated,
    Deleted,
}

/// A change pushed to subscribers of a record
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub action: RecordAction,
    /// The record after the change, or its last state if it was deleted
    pub record: Record,
}

/// Represents a remote collection of records with live subscriptions.
///
/// Updates are partial: only the given fields are replaced, last write wins per field.
/// Subscribers of a record observe its events in commit order.
#[async_trait]
pub trait RecordStore
where
    Self: Send + Sync + 'static,
{
    async fn create(&self, fields: Fields) -> Result<Record>;
    async fn get(&self, id: &str) -> Result<Record>;
    async fn update(&self, id: &str, fields: Fields) -> Result<Record>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn find_by_field(&self, field: &str, value: &Value) -> Result<Record>;

    /// Subscribes to changes of a single record.
    /// The returned [Subscription] stays live until it is unsubscribed, dropped, or the record is deleted.
    async fn subscribe(&self, id: &str) -> Result<Subscription>;
}

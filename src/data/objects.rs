//! Federated object store
//!
//! Caches the raw JSON of every object the inbox accepts, keyed by its id.
//! The index (`objects/objects.db`) maps `id type cachepath`; the payload
//! sits in a sibling blob named by the URL-safe base64 of the id.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use serde::Deserialize;
use thiserror::Error;

use super::record::{KeyedRecordStore, Record, StoreError, Table};

/// Object store errors
#[derive(Debug, Error)]
pub enum ObjectError {
    /// Id is not an `https://` URI
    #[error("Object id must be an https URI: {0}")]
    BadId(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Malformed object: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Raw federated object as received over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedObject {
    pub id: String,
    pub kind: String,
    pub raw: Vec<u8>,
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

impl FederatedObject {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            raw,
        }
    }

    /// Read the `id`/`type` envelope from raw JSON, keeping the bytes intact.
    pub fn parse(raw: Vec<u8>) -> Result<Self, ObjectError> {
        let envelope: Envelope = serde_json::from_slice(&raw)?;
        Ok(Self {
            id: envelope.id,
            kind: envelope.kind,
            raw,
        })
    }
}

/// Reject ids that are not fully qualified `https://` URIs.
pub fn ensure_https_id(id: &str) -> Result<(), ObjectError> {
    if id.starts_with("https://") && id.len() > "https://".len() {
        Ok(())
    } else {
        Err(ObjectError::BadId(id.to_string()))
    }
}

/// Deterministic, exact-match storage key for an id.
pub fn storage_key(id: &str) -> String {
    URL_SAFE.encode(id.as_bytes())
}

fn cache_path(id: &str) -> String {
    format!("objects/{}", storage_key(id))
}

/// Object store over a [`KeyedRecordStore`]
pub struct ObjectStore {
    store: Arc<dyn KeyedRecordStore>,
}

impl ObjectStore {
    pub fn new(store: Arc<dyn KeyedRecordStore>) -> Self {
        Self { store }
    }

    /// Persist an object: write the payload, then append its index record.
    pub async fn save(&self, object: &FederatedObject) -> Result<(), ObjectError> {
        ensure_https_id(&object.id)?;

        let path = cache_path(&object.id);
        self.store.put_blob(&path, &object.raw).await?;
        self.store
            .append(
                &Table::Objects,
                Record::new()
                    .with("id", object.id.as_str())
                    .with("type", object.kind.as_str())
                    .with("cachepath", path),
            )
            .await?;

        tracing::debug!(id = %object.id, kind = %object.kind, "Saved federated object");
        Ok(())
    }

    /// Save if unknown, otherwise overwrite the payload in place.
    ///
    /// The index record is left untouched on overwrite so references held by
    /// other ledgers stay valid.
    pub async fn upsert(&self, object: &FederatedObject) -> Result<(), ObjectError> {
        ensure_https_id(&object.id)?;

        match self.index_record(&object.id).await? {
            None => self.save(object).await,
            Some(record) => {
                let path = record
                    .get("cachepath")
                    .map(str::to_string)
                    .unwrap_or_else(|| cache_path(&object.id));
                self.store.put_blob(&path, &object.raw).await?;
                tracing::debug!(id = %object.id, "Updated federated object payload");
                Ok(())
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<FederatedObject, ObjectError> {
        let record = self
            .index_record(id)
            .await?
            .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;
        self.load(&record)
            .await?
            .ok_or_else(|| ObjectError::NotFound(id.to_string()))
    }

    pub async fn has_object(&self, id: &str) -> Result<bool, ObjectError> {
        Ok(self.index_record(id).await?.is_some())
    }

    /// Index ids of every stored object of `kind`, first-seen order, deduplicated.
    pub async fn ids_of_type(&self, kind: &str) -> Result<Vec<String>, ObjectError> {
        let mut seen = std::collections::HashSet::new();
        Ok(self
            .store
            .search(&Table::Objects, "type", kind)
            .await?
            .into_iter()
            .filter_map(|record| record.get("id").map(str::to_string))
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    async fn index_record(&self, id: &str) -> Result<Option<Record>, ObjectError> {
        Ok(self
            .store
            .search(&Table::Objects, "id", id)
            .await?
            .pop())
    }

    async fn load(&self, record: &Record) -> Result<Option<FederatedObject>, ObjectError> {
        let (Some(id), Some(kind), Some(path)) =
            (record.get("id"), record.get("type"), record.get("cachepath"))
        else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_blob(path)
            .await?
            .map(|raw| FederatedObject::new(id, kind, raw)))
    }
}

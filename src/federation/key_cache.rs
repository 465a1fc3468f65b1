//! Public Key Caching
//!
//! Verified remote keys are kept in memory and persisted to the `keys`
//! table so restarts do not refetch every sender's actor document.
//! Entries never expire.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::signature::{KeyProvider, StoredKey};
use crate::data::{KeyedRecordStore, Record, StoreError, Table, storage_key};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SIZE};

/// Public key cache
///
/// Read-through cache over the `keys` table. The record holds
/// `keyid owner cachepath`; the PEM lives in the blob at `cachepath`.
pub struct PublicKeyCache {
    /// key_id -> key
    cache: RwLock<HashMap<String, StoredKey>>,
    store: Arc<dyn KeyedRecordStore>,
}

impl PublicKeyCache {
    pub fn new(store: Arc<dyn KeyedRecordStore>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Number of keys held in memory
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Drop a key from memory. The persisted record stays.
    pub async fn invalidate(&self, key_id: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key_id);
        CACHE_SIZE
            .with_label_values(&["public_key"])
            .set(cache.len() as i64);
        tracing::debug!("Invalidated public key cache for {}", key_id);
    }

    async fn load(&self, key_id: &str) -> Result<Option<StoredKey>, StoreError> {
        let Some(record) = self
            .store
            .search(&Table::Keys, "keyid", key_id)
            .await?
            .pop()
        else {
            return Ok(None);
        };

        let (Some(owner), Some(path)) = (record.get("owner"), record.get("cachepath")) else {
            return Ok(None);
        };
        let Some(pem) = self.store.get_blob(path).await? else {
            tracing::warn!(key_id = %key_id, path = %path, "Key record without blob");
            return Ok(None);
        };

        Ok(Some(StoredKey {
            key_id: key_id.to_string(),
            owner: owner.to_string(),
            pem: String::from_utf8_lossy(&pem).into_owned(),
        }))
    }

    async fn remember(&self, key: StoredKey) {
        let mut cache = self.cache.write().await;
        cache.insert(key.key_id.clone(), key);
        CACHE_SIZE
            .with_label_values(&["public_key"])
            .set(cache.len() as i64);
    }
}

#[async_trait]
impl KeyProvider for PublicKeyCache {
    async fn get_key(&self, key_id: &str) -> Result<Option<StoredKey>, StoreError> {
        if let Some(key) = self.cache.read().await.get(key_id) {
            CACHE_HITS_TOTAL.with_label_values(&["public_key"]).inc();
            tracing::debug!("Public key cache hit for {}", key_id);
            return Ok(Some(key.clone()));
        }

        let loaded = self.load(key_id).await?;
        match &loaded {
            Some(key) => {
                CACHE_HITS_TOTAL.with_label_values(&["public_key"]).inc();
                self.remember(key.clone()).await;
            }
            None => {
                CACHE_MISSES_TOTAL.with_label_values(&["public_key"]).inc();
                tracing::debug!("Public key cache miss for {}", key_id);
            }
        }
        Ok(loaded)
    }

    async fn save_key(&self, key_id: &str, owner: &str, pem: &str) -> Result<(), StoreError> {
        let path = format!("keys/{}", storage_key(key_id));
        self.store.put_blob(&path, pem.as_bytes()).await?;
        self.store
            .append(
                &Table::Keys,
                Record::new()
                    .with("keyid", key_id)
                    .with("owner", owner)
                    .with("cachepath", path),
            )
            .await?;

        self.remember(StoredKey {
            key_id: key_id.to_string(),
            owner: owner.to_string(),
            pem: pem.to_string(),
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStore;

    const KEY_ID: &str = "https://remote.example/users/alice#main-key";
    const OWNER: &str = "https://remote.example/users/alice";

    #[tokio::test]
    async fn saved_keys_are_served_from_memory() {
        let cache = PublicKeyCache::new(Arc::new(MemoryStore::new()));
        assert!(cache.get_key(KEY_ID).await.unwrap().is_none());

        cache.save_key(KEY_ID, OWNER, "PEM").await.unwrap();

        let key = cache.get_key(KEY_ID).await.unwrap().unwrap();
        assert_eq!(key.owner, OWNER);
        assert_eq!(key.pem, "PEM");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn keys_survive_a_fresh_cache_over_the_same_store() {
        let store: Arc<dyn KeyedRecordStore> = Arc::new(MemoryStore::new());
        PublicKeyCache::new(store.clone())
            .save_key(KEY_ID, OWNER, "PEM")
            .await
            .unwrap();

        let restarted = PublicKeyCache::new(store);
        assert!(restarted.is_empty().await);
        let key = restarted.get_key(KEY_ID).await.unwrap().unwrap();
        assert_eq!(key.pem, "PEM");
        assert!(!restarted.is_empty().await);
    }

    #[tokio::test]
    async fn latest_saved_key_wins() {
        let store: Arc<dyn KeyedRecordStore> = Arc::new(MemoryStore::new());
        let cache = PublicKeyCache::new(store.clone());
        cache.save_key(KEY_ID, OWNER, "OLD").await.unwrap();
        cache.save_key(KEY_ID, OWNER, "NEW").await.unwrap();

        cache.invalidate(KEY_ID).await;
        assert_eq!(cache.get_key(KEY_ID).await.unwrap().unwrap().pem, "NEW");
        assert_eq!(store.scan(&Table::Keys).await.unwrap().len(), 2);
    }
}

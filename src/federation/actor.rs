//! Remote actor resolution
//!
//! Cache-first: the `actors` table holds one record per fetch (last write
//! wins) with the raw document in a blob. Cached actors never expire;
//! [`ActorResolver::refresh`] is the only way to pick up rotated keys.

use std::sync::Arc;

use thiserror::Error;

use super::activity::Actor;
use super::fetch::{ACTOR_ACCEPT, ActivityFetcher, FetchError};
use crate::data::{KeyedRecordStore, Record, StoreError, Table, storage_key};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Failed to fetch actor: {0}")]
    Network(#[from] FetchError),

    #[error("Failed to parse actor {id}: {source}")]
    Parse {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Document does not satisfy `publicKey.owner == id`
    #[error("Invalid actor document {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ActorResolver {
    store: Arc<dyn KeyedRecordStore>,
    fetcher: Arc<dyn ActivityFetcher>,
}

impl ActorResolver {
    pub fn new(store: Arc<dyn KeyedRecordStore>, fetcher: Arc<dyn ActivityFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Resolve an actor, fetching it on a cache miss.
    pub async fn resolve(&self, actor_id: &str) -> Result<Actor, ResolveError> {
        if let Some(actor) = self.cached(actor_id).await? {
            CACHE_HITS_TOTAL.with_label_values(&["actor"]).inc();
            tracing::debug!(actor = %actor_id, "Actor cache hit");
            return Ok(actor);
        }

        CACHE_MISSES_TOTAL.with_label_values(&["actor"]).inc();
        tracing::debug!(actor = %actor_id, "Actor cache miss, fetching");
        self.refresh(actor_id).await
    }

    /// Fetch the actor document again and append it to the cache.
    pub async fn refresh(&self, actor_id: &str) -> Result<Actor, ResolveError> {
        let raw = self.fetcher.fetch(actor_id, ACTOR_ACCEPT).await?;
        let actor = parse_actor(actor_id, &raw)?;

        if let Err(error) = self.store_actor(&actor, &raw).await {
            tracing::warn!(actor = %actor_id, %error, "Failed to cache actor");
        }
        Ok(actor)
    }

    /// Cached actor, if any.
    pub async fn cached(&self, actor_id: &str) -> Result<Option<Actor>, ResolveError> {
        let Some(record) = self
            .store
            .search(&Table::Actors, "id", actor_id)
            .await?
            .pop()
        else {
            return Ok(None);
        };
        let Some(path) = record.get("cachepath") else {
            return Ok(None);
        };
        match self.store.get_blob(path).await? {
            Some(raw) => parse_actor(actor_id, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Record a parsed actor together with the bytes it came from.
    pub async fn store_actor(&self, actor: &Actor, raw: &[u8]) -> Result<(), StoreError> {
        let path = format!("actors/{}", storage_key(&actor.id));
        self.store.put_blob(&path, raw).await?;
        self.store
            .append(
                &Table::Actors,
                Record::new()
                    .with("id", actor.id.as_str())
                    .with("type", actor.kind.as_str())
                    .with("inbox", actor.inbox.as_str())
                    .with("outbox", actor.outbox.as_str())
                    .with("following", actor.following.as_str())
                    .with("followers", actor.followers.as_str())
                    .with("preferredUsername", actor.preferred_username.as_str())
                    .with("name", actor.name.as_str())
                    .with("cachepath", path),
            )
            .await
    }
}

fn parse_actor(actor_id: &str, raw: &[u8]) -> Result<Actor, ResolveError> {
    let actor: Actor = serde_json::from_slice(raw).map_err(|source| ResolveError::Parse {
        id: actor_id.to_string(),
        source,
    })?;

    if actor.public_key.owner != actor.id {
        return Err(ResolveError::Invalid {
            id: actor_id.to_string(),
            reason: format!(
                "publicKey.owner {:?} does not match id {:?}",
                actor.public_key.owner, actor.id
            ),
        });
    }
    Ok(actor)
}

//! Follower ledger
//!
//! Two append-only ledgers: accepted follows per page and global undo
//! tombstones. A follower is active while no undo references the Follow
//! request it was accepted from; the join happens at read time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use super::record::{KeyedRecordStore, Record, StoreError, Table};
use crate::federation::{Actor, ActorResolver, Follow, ResolveError};

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record accepted from this Follow id already exists
    #[error("Follow request already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Failed to resolve follower: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An accepted follow relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowerRecord {
    pub follower_actor_id: String,
    pub accepted_from_request_id: String,
    pub accepted: bool,
}

impl FollowerRecord {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            follower_actor_id: record.get("id")?.to_string(),
            accepted_from_request_id: record.get("acceptedFrom")?.to_string(),
            accepted: record.get("accepted") == Some("true"),
        })
    }
}

pub struct FollowerLedger {
    store: Arc<dyn KeyedRecordStore>,
}

impl FollowerLedger {
    pub fn new(store: Arc<dyn KeyedRecordStore>) -> Self {
        Self { store }
    }

    /// Record an accepted follow of `page`.
    ///
    /// # Errors
    /// `AlreadyProcessed` when this Follow id was accepted before; senders
    /// redeliver and the second delivery must not produce a second record.
    pub async fn add_follower(&self, page: &str, follow: &Follow) -> Result<(), LedgerError> {
        let table = Table::Followers(page.to_string());
        let existing = self.store.search(&table, "acceptedFrom", &follow.id).await?;
        if !existing.is_empty() {
            return Err(LedgerError::AlreadyProcessed(follow.id.clone()));
        }

        self.store
            .append(
                &table,
                Record::new()
                    .with("id", follow.actor.as_str())
                    .with("accepted", "true")
                    .with("PageName", page)
                    .with("acceptedFrom", follow.id.as_str()),
            )
            .await?;

        tracing::info!(page = %page, follower = %follow.actor, "Follower added");
        Ok(())
    }

    /// Append an undo tombstone for the Follow request `follow_id`.
    ///
    /// Dangling undos are legal and have no effect on the join.
    pub async fn undo_follow(&self, page: &str, follow_id: &str) -> Result<(), LedgerError> {
        self.store
            .append(
                &Table::Undo,
                Record::new()
                    .with("id", follow_id)
                    .with("type", "Undo")
                    .with("PageName", page),
            )
            .await?;

        tracing::info!(page = %page, follow_id = %follow_id, "Follow undone");
        Ok(())
    }

    /// Active follower records of `page`, one per follower actor.
    ///
    /// The latest Follow accepted from an actor supersedes earlier ones; the
    /// actor is active while that Follow has not been undone.
    pub async fn active_followers(&self, page: &str) -> Result<Vec<FollowerRecord>, LedgerError> {
        let accepted = self
            .store
            .search(&Table::Followers(page.to_string()), "accepted", "true")
            .await?;
        let undone: HashSet<String> = self
            .store
            .scan(&Table::Undo)
            .await?
            .iter()
            .filter_map(|record| record.get("id").map(str::to_string))
            .collect();

        let mut latest: Vec<FollowerRecord> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();
        for record in accepted.iter().filter_map(FollowerRecord::from_record) {
            match position.get(&record.follower_actor_id) {
                Some(&index) => latest[index] = record,
                None => {
                    position.insert(record.follower_actor_id.clone(), latest.len());
                    latest.push(record);
                }
            }
        }

        Ok(latest
            .into_iter()
            .filter(|record| !undone.contains(&record.accepted_from_request_id))
            .collect())
    }

    /// Actor ids of the active followers of `page`, without resolving them.
    pub async fn active_follower_ids(&self, page: &str) -> Result<Vec<String>, LedgerError> {
        Ok(self
            .active_followers(page)
            .await?
            .into_iter()
            .map(|record| record.follower_actor_id)
            .collect())
    }

    /// Active followers of `page`, resolved to actors.
    pub async fn list_active_followers(
        &self,
        page: &str,
        resolver: &ActorResolver,
    ) -> Result<Vec<Actor>, LedgerError> {
        let mut actors = Vec::new();
        for record in self.active_followers(page).await? {
            actors.push(resolver.resolve(&record.follower_actor_id).await?);
        }
        Ok(actors)
    }
}

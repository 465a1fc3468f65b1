//! Inbox processing
//!
//! Handles incoming activities addressed to page actors. Every object is
//! persisted before it is dispatched and is marked processed only after
//! its handler succeeds, so a crash in between leaves it for replay.

use std::sync::Arc;

use thiserror::Error;

use super::activity::{Activity, CreateNote, Follow, Undo};
use super::actor::{ActorResolver, ResolveError};
use super::delivery::{Delivery, DeliveryError, builder};
use super::page_urls::PageUrls;
use crate::data::{
    FederatedObject, FollowerLedger, LedgerError, ObjectError, ObjectStore, ProcessedLedger,
    StoreError, ensure_https_id,
};
use crate::error::ErrorCategory;
use crate::metrics::ACTIVITYPUB_ACTIVITIES_RECEIVED;
use crate::pages::{PageDirectory, PageError};

#[derive(Debug, Error)]
pub enum InboxError {
    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error("Malformed activity: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Target is not an existing local page actor
    #[error("Unknown page: {0}")]
    UnknownPage(String),

    #[error("Unhandled object type {0}")]
    UnhandledType(String),

    /// Undo sent by someone other than the follower
    #[error("{undo_actor} cannot undo a follow by {follow_actor}")]
    ForeignUndo {
        undo_actor: String,
        follow_actor: String,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Page(#[from] PageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InboxError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            InboxError::Object(ObjectError::BadId(_) | ObjectError::Malformed(_))
            | InboxError::Page(PageError::Object(ObjectError::BadId(_)))
            | InboxError::Malformed(_) => ErrorCategory::MalformedInput,
            InboxError::ForeignUndo { .. } => ErrorCategory::AuthFailure,
            InboxError::Object(ObjectError::NotFound(_)) | InboxError::UnknownPage(_) => {
                ErrorCategory::NotFound
            }
            InboxError::Ledger(LedgerError::Resolve(err)) | InboxError::Resolve(err) => {
                resolve_category(err)
            }
            InboxError::Delivery(DeliveryError::Network { .. }) => ErrorCategory::TransientNetwork,
            InboxError::Page(PageError::NotFound(_)) => ErrorCategory::NotFound,
            InboxError::Page(PageError::InvalidName(_)) => ErrorCategory::MalformedInput,
            InboxError::Object(ObjectError::Store(_))
            | InboxError::UnhandledType(_)
            | InboxError::Ledger(_)
            | InboxError::Delivery(_)
            | InboxError::Page(_)
            | InboxError::Store(_) => ErrorCategory::Internal,
        }
    }
}

fn resolve_category(err: &ResolveError) -> ErrorCategory {
    match err {
        ResolveError::Network(_) => ErrorCategory::TransientNetwork,
        ResolveError::Parse { .. } | ResolveError::Invalid { .. } => ErrorCategory::MalformedInput,
        ResolveError::Store(_) => ErrorCategory::Internal,
    }
}

/// Terminal state of a successfully handled object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Follower recorded and Accept sent
    FollowAccepted { page: String, follower: String },
    /// Follow seen before; nothing written, nothing sent
    FollowAlreadyProcessed { page: String },
    FollowUndone { page: String },
    /// Note attached to these pages (possibly none)
    NoteAttached { pages: Vec<String> },
}

/// Activity processor
///
/// Processes incoming ActivityPub activities from page inboxes.
pub struct InboxProcessor {
    urls: PageUrls,
    objects: Arc<ObjectStore>,
    followers: Arc<FollowerLedger>,
    processed: Arc<ProcessedLedger>,
    resolver: Arc<ActorResolver>,
    pages: Arc<dyn PageDirectory>,
    /// Sends Accepts back to followers
    delivery: Arc<dyn Delivery>,
}

impl InboxProcessor {
    pub fn new(
        urls: PageUrls,
        objects: Arc<ObjectStore>,
        followers: Arc<FollowerLedger>,
        processed: Arc<ProcessedLedger>,
        resolver: Arc<ActorResolver>,
        pages: Arc<dyn PageDirectory>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        Self {
            urls,
            objects,
            followers,
            processed,
            resolver,
            pages,
            delivery,
        }
    }

    /// Process an incoming object
    ///
    /// The signature has already been verified by the caller.
    ///
    /// # Side Effects
    /// - Persists the object
    /// - May record or undo a follower, send an Accept or attach a note
    /// - Marks the object processed on success
    pub async fn process(&self, object: FederatedObject) -> Result<DispatchOutcome, InboxError> {
        ACTIVITYPUB_ACTIVITIES_RECEIVED
            .with_label_values(&[object.kind.as_str()])
            .inc();

        self.objects.save(&object).await?;
        let outcome = self.dispatch(&object).await?;
        self.processed.mark(&object.id).await?;

        tracing::debug!(id = %object.id, kind = %object.kind, ?outcome, "Processed object");
        Ok(outcome)
    }

    /// Run the handler for an already persisted object.
    pub async fn dispatch(&self, object: &FederatedObject) -> Result<DispatchOutcome, InboxError> {
        match Activity::parse(&object.kind, &object.raw)? {
            Some(Activity::Follow(follow)) => self.handle_follow(follow).await,
            Some(Activity::Undo(undo)) => self.handle_undo(undo).await,
            Some(Activity::Create(create)) => self.handle_create(create).await,
            Some(Activity::Accept(_)) | None => Err(InboxError::UnhandledType(object.kind.clone())),
        }
    }

    /// Local page addressed by `actor_id`, which must exist.
    async fn local_page(&self, actor_id: &str) -> Result<String, InboxError> {
        let page = self
            .urls
            .page_from_actor(actor_id)
            .ok_or_else(|| InboxError::UnknownPage(actor_id.to_string()))?;
        match self.pages.page_actor(&page).await {
            Ok(_) => Ok(page),
            Err(PageError::NotFound(_) | PageError::InvalidName(_)) => {
                Err(InboxError::UnknownPage(actor_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_follow(&self, follow: Follow) -> Result<DispatchOutcome, InboxError> {
        ensure_https_id(&follow.id)?;
        ensure_https_id(&follow.actor)?;
        let page = self.local_page(&follow.object).await?;

        match self.followers.add_follower(&page, &follow).await {
            Ok(()) => {}
            Err(LedgerError::AlreadyProcessed(id)) => {
                tracing::info!(page = %page, follow_id = %id, "Follow already processed");
                return Ok(DispatchOutcome::FollowAlreadyProcessed { page });
            }
            Err(e) => return Err(e.into()),
        }

        let accept = builder::accept(&self.urls, &page, &follow);
        let raw = serde_json::to_vec(&accept)?;
        let follower = self.resolver.resolve(&follow.actor).await?;

        self.delivery
            .send(
                &page,
                &follower,
                &FederatedObject::new(accept.id.as_str(), "Accept", raw),
            )
            .await?;

        tracing::info!(
            page = %page,
            follower = %follower.mention_name(),
            accept = %accept.id,
            "Accepted follow"
        );
        Ok(DispatchOutcome::FollowAccepted {
            page,
            follower: follow.actor,
        })
    }

    async fn handle_undo(&self, undo: Undo) -> Result<DispatchOutcome, InboxError> {
        let follow: Follow = if undo.is_reference() {
            let id = undo
                .object_id()
                .ok_or_else(|| InboxError::UnhandledType("Undo".to_string()))?;
            ensure_https_id(id)?;
            let stored = self.objects.get(id).await?;
            if stored.kind != "Follow" {
                return Err(InboxError::UnhandledType(format!("Undo {}", stored.kind)));
            }
            serde_json::from_slice(&stored.raw)?
        } else {
            match undo.object_type() {
                Some("Follow") => serde_json::from_value(undo.object.clone())?,
                other => {
                    return Err(InboxError::UnhandledType(format!(
                        "Undo {}",
                        other.unwrap_or("without type")
                    )));
                }
            }
        };

        ensure_https_id(&follow.id)?;
        if undo.actor != follow.actor {
            return Err(InboxError::ForeignUndo {
                undo_actor: undo.actor,
                follow_actor: follow.actor,
            });
        }

        let page = self.local_page(&follow.object).await?;
        self.followers.undo_follow(&page, &follow.id).await?;
        Ok(DispatchOutcome::FollowUndone { page })
    }

    async fn handle_create(&self, create: CreateNote) -> Result<DispatchOutcome, InboxError> {
        if create.object.kind != "Note" {
            return Err(InboxError::UnhandledType(format!(
                "Create {}",
                create.object.kind
            )));
        }
        ensure_https_id(&create.object.id)?;

        let mut attached = Vec::new();
        for recipient in create.recipients() {
            let Some(page) = self.urls.page_from_actor(recipient) else {
                continue;
            };
            match self.pages.page_actor(&page).await {
                Ok(_) => {}
                Err(PageError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }

            match self.pages.attach_note(&page, &create.object).await {
                Ok(()) => attached.push(page),
                Err(PageError::AlreadyAttached { page, note }) => {
                    tracing::info!(page = %page, note = %note, "Note already attached");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(DispatchOutcome::NoteAttached { pages: attached })
    }
}

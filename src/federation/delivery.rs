//! Activity delivery
//!
//! Signs and POSTs activities to remote inboxes on behalf of a page actor.
//! Delivery is fire-and-forget: one attempt, non-2xx answers are logged
//! and not reported as failures. Callers depend on [`Delivery`] so a
//! retrying sender can be swapped in.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use http::HeaderValue;
use http::header::{CONTENT_TYPE, DATE, HOST};
use thiserror::Error;
use tokio::sync::Semaphore;

use super::activity::{Actor, Note};
use super::actor::ActorResolver;
use super::fetch::LD_JSON_PROFILE;
use super::signature::{SignError, sign_request};
use crate::data::{FederatedObject, FollowerLedger, LedgerError};
use crate::metrics::{
    ACTIVITYPUB_ACTIVITIES_SENT, DELIVERIES_TOTAL, FEDERATION_REQUEST_DURATION_SECONDS,
    FEDERATION_REQUESTS_TOTAL,
};
use crate::pages::{PageDirectory, PageError};

/// Concurrent deliveries per fan-out
const MAX_CONCURRENT: usize = 10;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Signing failed: {0}")]
    Sign(#[from] SignError),

    #[error("Actor {0} has no inbox")]
    MissingInbox(String),

    #[error("Invalid header value: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),

    #[error("Failed to deliver to {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to serialize activity: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver `object` to `target`'s inbox, signed as `origin_page`.
    async fn send(
        &self,
        origin_page: &str,
        target: &Actor,
        object: &FederatedObject,
    ) -> Result<(), DeliveryError>;
}

/// A signed request ready to be sent
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: http::HeaderMap,
    pub body: Vec<u8>,
}

/// Activity delivery service
pub struct OutboxSender {
    http_client: reqwest::Client,
    pages: Arc<dyn PageDirectory>,
}

impl OutboxSender {
    /// The client should carry the configured timeouts.
    pub fn new(http_client: reqwest::Client, pages: Arc<dyn PageDirectory>) -> Self {
        Self { http_client, pages }
    }

    /// Build the signed POST for `object` without sending it.
    pub async fn prepare(
        &self,
        origin_page: &str,
        target: &Actor,
        object: &FederatedObject,
    ) -> Result<PreparedRequest, DeliveryError> {
        if target.inbox.is_empty() {
            return Err(DeliveryError::MissingInbox(target.id.clone()));
        }

        let key = self.pages.signing_key(origin_page).await?;
        let signed = sign_request(
            "POST",
            &target.inbox,
            &object.raw,
            LD_JSON_PROFILE,
            &key.private_key_pem,
            &key.key_id,
        )?;

        let mut headers = http::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(LD_JSON_PROFILE));
        headers.insert(DATE, HeaderValue::from_str(&signed.date)?);
        headers.insert("digest", HeaderValue::from_str(&signed.digest)?);
        headers.insert(HOST, HeaderValue::from_str(&signed.host)?);
        headers.insert("signature", HeaderValue::from_str(&signed.signature)?);

        Ok(PreparedRequest {
            url: target.inbox.clone(),
            headers,
            body: object.raw.clone(),
        })
    }
}

#[async_trait]
impl Delivery for OutboxSender {
    async fn send(
        &self,
        origin_page: &str,
        target: &Actor,
        object: &FederatedObject,
    ) -> Result<(), DeliveryError> {
        let request = self.prepare(origin_page, target, object).await?;

        let _timer = FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .start_timer();

        let response = self
            .http_client
            .post(&request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|source| {
                FEDERATION_REQUESTS_TOTAL
                    .with_label_values(&["outbound", "error"])
                    .inc();
                DeliveryError::Network {
                    url: request.url.clone(),
                    source,
                }
            })?;

        let status = response.status();
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", status.as_str()])
            .inc();
        ACTIVITYPUB_ACTIVITIES_SENT
            .with_label_values(&[object.kind.as_str()])
            .inc();

        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            tracing::info!(
                inbox = %request.url,
                activity = %object.id,
                status = %status,
                response = %body,
                "Delivered activity"
            );
        } else {
            tracing::warn!(
                inbox = %request.url,
                activity = %object.id,
                status = %status,
                response = %body,
                "Inbox rejected activity"
            );
        }
        Ok(())
    }
}

/// Outcome of a fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Send a page-change note to every active follower of `page`.
///
/// Followers are deduplicated by inbox. Failures are logged per follower
/// and counted in the report; a follower that cannot be resolved is
/// skipped as a failure.
pub async fn distribute_note(
    delivery: Arc<dyn Delivery>,
    followers: &FollowerLedger,
    resolver: &ActorResolver,
    page: &str,
    note: &Note,
) -> Result<DeliveryReport, DeliveryError> {
    let create = builder::create_note(note);
    let raw = serde_json::to_vec(&create)?;
    let object = Arc::new(FederatedObject::new(create.id.as_str(), "Create", raw));

    let mut report = DeliveryReport::default();
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for record in followers.active_followers(page).await? {
        match resolver.resolve(&record.follower_actor_id).await {
            Ok(actor) => {
                if seen.insert(actor.inbox.clone()) {
                    targets.push(actor);
                }
            }
            Err(error) => {
                tracing::warn!(follower = %record.follower_actor_id, %error, "Cannot resolve follower");
                report.failed += 1;
            }
        }
    }

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
    let mut tasks = Vec::with_capacity(targets.len());
    for target in targets {
        let semaphore = semaphore.clone();
        let delivery = delivery.clone();
        let object = object.clone();
        let page = page.to_string();

        tasks.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return false;
            };
            match delivery.send(&page, &target, &object).await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(inbox = %target.inbox, %error, "Delivery failed");
                    false
                }
            }
        }));
    }

    for outcome in join_all(tasks).await {
        match outcome {
            Ok(true) => report.delivered += 1,
            _ => report.failed += 1,
        }
    }

    DELIVERIES_TOTAL
        .with_label_values(&["success"])
        .inc_by(report.delivered as u64);
    DELIVERIES_TOTAL
        .with_label_values(&["failure"])
        .inc_by(report.failed as u64);
    tracing::info!(
        page = %page,
        note = %note.id,
        delivered = report.delivered,
        failed = report.failed,
        "Note distribution complete"
    );
    Ok(report)
}

/// Activity builders
pub mod builder {
    use chrono::{DateTime, Utc};

    use crate::federation::activity::{
        ACTIVITYSTREAMS, Accept, CreateNote, Follow, Note, PUBLIC_AUDIENCE,
    };
    use crate::federation::context::JsonLdContext;
    use crate::federation::page_urls::PageUrls;

    /// Accept of `follow` on behalf of the followed page, with a fresh id.
    pub fn accept(urls: &PageUrls, page: &str, follow: &Follow) -> Accept {
        let mut object = follow.clone();
        object.context = JsonLdContext::default();
        Accept {
            context: JsonLdContext::activitystreams(),
            id: urls.accept_id(page),
            kind: "Accept".to_string(),
            actor: follow.object.clone(),
            object,
        }
    }

    /// "Page Changes for <page>" note for one revision.
    pub fn page_change_note(
        urls: &PageUrls,
        page: &str,
        revision: &str,
        diff: &str,
        edited_at: Option<DateTime<Utc>>,
    ) -> Note {
        let id = urls.diff_note(page, revision);
        Note {
            context: JsonLdContext::activitystreams(),
            id: id.clone(),
            kind: "Note".to_string(),
            summary: Some(format!("Page Changes for {page}")),
            published: edited_at,
            url: id,
            media_type: "text/plain".to_string(),
            content: diff.to_string(),
            attributed_to: urls.actor(page),
            to: vec![PUBLIC_AUDIENCE.to_string()],
            cc: vec![urls.followers(page)],
            ..Default::default()
        }
    }

    /// Wrap a note in a `Create` from its author.
    pub fn create_note(note: &Note) -> CreateNote {
        let context = if note.context.is_empty() {
            JsonLdContext::from_strings([ACTIVITYSTREAMS])
        } else {
            note.context.clone()
        };
        let mut object = note.clone();
        object.context = JsonLdContext::default();

        CreateNote {
            context,
            id: format!("{}.activity", note.id),
            kind: "Create".to_string(),
            actor: note.attributed_to.clone(),
            to: note.to.clone(),
            cc: note.cc.clone(),
            published: note.published,
            object,
        }
    }
}

//! fediwiki - ActivityPub federation for wiki pages
//!
//! Every wiki page is a followable `Service` actor. Remote servers follow
//! pages, and page changes go out to followers as signed `Create{Note}`
//! activities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Page actor, inbox and outbox endpoints                   │
//! │  - WebFinger, health, metrics                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - HTTP signatures, actor and key caches                    │
//! │  - Inbox state machine, outbox sender, replay               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Append-only record files                                 │
//! │  - Object store, follower/undo and processed ledgers        │
//! │  - Page directory                                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for ActivityPub and WebFinger
//! - `federation`: ActivityPub federation handling
//! - `data`: Record store and ledgers
//! - `pages`: Page actors and their notes
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod pages;

use std::sync::Arc;

use data::{FlatFileStore, FollowerLedger, KeyedRecordStore, ObjectStore, ProcessedLedger};
use federation::{
    ActivityFetcher, ActorResolver, Delivery, HttpFetcher, InboxProcessor, OutboxSender, PageUrls,
    PublicKeyCache, SignatureVerifier,
};
use pages::{FlatFilePages, PageDirectory};

/// Largest inbox body accepted
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
///
/// This struct is cloned for each request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// URL scheme for local pages
    pub urls: PageUrls,

    pub store: Arc<dyn KeyedRecordStore>,
    pub objects: Arc<ObjectStore>,
    pub followers: Arc<FollowerLedger>,
    pub processed: Arc<ProcessedLedger>,
    pub pages: Arc<dyn PageDirectory>,
    pub resolver: Arc<ActorResolver>,

    /// Inbound HTTP signature verification
    pub verifier: Arc<SignatureVerifier>,

    pub inbox: Arc<InboxProcessor>,

    /// Signed outbound delivery
    pub delivery: Arc<dyn Delivery>,
}

impl AppState {
    /// Initialize application state with the network transport
    ///
    /// # Steps
    /// 1. Build the HTTP client for federation
    /// 2. Open the flat-file store
    /// 3. Bootstrap configured page actors
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.federation.user_agent.clone())
            .timeout(config.federation.http_timeout())
            .connect_timeout(config.federation.connect_timeout())
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let fetcher = Arc::new(HttpFetcher::new(http_client.clone()));
        Self::with_transport(config, fetcher, move |pages| {
            Arc::new(OutboxSender::new(http_client, pages)) as Arc<dyn Delivery>
        })
        .await
    }

    /// Initialize application state with a caller-supplied transport.
    ///
    /// `delivery` receives the page directory so it can look up signing keys.
    pub async fn with_transport<F>(
        config: config::AppConfig,
        fetcher: Arc<dyn ActivityFetcher>,
        delivery: F,
    ) -> Result<Self, error::AppError>
    where
        F: FnOnce(Arc<dyn PageDirectory>) -> Arc<dyn Delivery>,
    {
        tracing::info!("Initializing application state...");

        let urls = PageUrls::new(config.server.domain.clone());

        let store: Arc<dyn KeyedRecordStore> =
            Arc::new(FlatFileStore::new(config.storage.root.clone()));
        let objects = Arc::new(ObjectStore::new(store.clone()));
        let followers = Arc::new(FollowerLedger::new(store.clone()));
        let processed = Arc::new(ProcessedLedger::new(store.clone()));
        let resolver = Arc::new(ActorResolver::new(store.clone(), fetcher.clone()));
        tracing::info!(root = %config.storage.root.display(), "Record store opened");

        let flat_pages = FlatFilePages::new(
            config.storage.root.clone(),
            urls.clone(),
            store.clone(),
            objects.clone(),
            config.federation.key_bits,
        );
        for page in &config.pages.bootstrap {
            let actor = flat_pages
                .ensure_page_actor(page)
                .await
                .map_err(|e| error::AppError::Internal(e.into()))?;
            tracing::info!(page = %page, actor = %actor.id, "Page actor ready");
        }
        let pages: Arc<dyn PageDirectory> = Arc::new(flat_pages);

        let keys = Arc::new(PublicKeyCache::new(store.clone()));
        let verifier = Arc::new(SignatureVerifier::new(
            keys,
            fetcher,
            config.federation.max_clock_skew(),
        ));

        let delivery = delivery(pages.clone());
        let inbox = Arc::new(InboxProcessor::new(
            urls.clone(),
            objects.clone(),
            followers.clone(),
            processed.clone(),
            resolver.clone(),
            pages.clone(),
            delivery.clone(),
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            urls,
            store,
            objects,
            followers,
            processed,
            pages,
            resolver,
            verifier,
            inbox,
            delivery,
        })
    }

    /// Announce a page revision to every active follower of `page`.
    pub async fn publish_page_change(
        &self,
        page: &str,
        revision: &str,
        diff: &str,
        edited_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<federation::DeliveryReport, error::AppError> {
        self.pages.page_actor(page).await?;

        let note = federation::builder::page_change_note(&self.urls, page, revision, diff, edited_at);
        federation::distribute_note(
            self.delivery.clone(),
            &self.followers,
            &self.resolver,
            page,
            &note,
        )
        .await
        .map_err(|e| error::AppError::Federation(e.to_string()))
    }

    /// Replay stored Follow and Undo objects that never finished processing.
    pub async fn replay_unprocessed(&self) -> federation::ReplaySummary {
        federation::replay_unprocessed(&self.inbox, self.objects.clone(), self.processed.clone())
            .await
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}

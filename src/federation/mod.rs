//! ActivityPub federation module
//!
//! Handles:
//! - Activity processing (inbox)
//! - Activity delivery (outbox)
//! - HTTP Signatures
//! - WebFinger
//! - Actor fetching and caching
//! - Public key caching
//! - Replay of interrupted inbox work

mod activity;
mod actor;
mod context;
mod delivery;
mod fetch;
mod inbox;
mod key_cache;
mod page_urls;
mod replay;
mod signature;
mod webfinger;

pub use activity::{
    ACTIVITYSTREAMS, Accept, Activity, ActivityType, Actor, CreateNote, Follow, Note,
    PUBLIC_AUDIENCE, PublicKey, SECURITY_V1, Undo,
};
pub use actor::{ActorResolver, ResolveError};
pub use context::{ContextError, JsonLdContext};
pub use delivery::{
    Delivery, DeliveryError, DeliveryReport, OutboxSender, PreparedRequest, builder,
    distribute_note,
};
pub use fetch::{ACTOR_ACCEPT, ActivityFetcher, FetchError, HttpFetcher, LD_JSON_PROFILE};
pub use inbox::{DispatchOutcome, InboxError, InboxProcessor};
pub use key_cache::PublicKeyCache;
pub use page_urls::PageUrls;
pub use replay::{Marker, ReplaySummary, Scan, WaitGroup, replay_unprocessed, scan_unprocessed};
pub use signature::{
    AuthError, KeyProvider, ParsedSignature, SIGNED_HEADERS, SignError, SignatureHeaders,
    SignatureVerifier, StoredKey, VerifiedKey, generate_digest, parse_private_key,
    parse_public_key, parse_signature_header, sign_request, verify_with_key,
};
pub use webfinger::{
    JRD_CONTENT_TYPE, WebFingerError, WebFingerLink, WebFingerResponse, page_webfinger,
    parse_acct,
};

//! Outbound document fetching
//!
//! Every remote GET (actor documents, key documents) goes through
//! [`ActivityFetcher`] so the transport can be swapped in tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::metrics::{FEDERATION_REQUEST_DURATION_SECONDS, FEDERATION_REQUESTS_TOTAL};

/// `Accept` header for actor document fetches
pub const ACTOR_ACCEPT: &str = "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\", application/ld+json, application/activity+json";

/// `Accept` header for key document fetches
pub const LD_JSON_PROFILE: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("No document at {0}")]
    NotFound(String),
}

#[async_trait]
pub trait ActivityFetcher: Send + Sync {
    /// GET `url` and return the body of a successful response.
    async fn fetch(&self, url: &str, accept: &str) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher. Timeouts are configured on the client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActivityFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, accept: &str) -> Result<Vec<u8>, FetchError> {
        let _timer = FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .start_timer();

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|source| {
                FEDERATION_REQUESTS_TOTAL
                    .with_label_values(&["outbound", "error"])
                    .inc();
                FetchError::Request {
                    url: url.to_string(),
                    source,
                }
            })?;

        let status = response.status();
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", status.as_str()])
            .inc();

        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        tracing::debug!(url = %url, bytes = body.len(), "Fetched remote document");
        Ok(body.to_vec())
    }
}

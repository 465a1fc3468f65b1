//! ActivityPub endpoints
//!
//! - Page actor
//! - Page inbox (activity receiving)
//! - Page outbox

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use http::HeaderMap;

use crate::AppState;
use crate::data::{FederatedObject, ensure_https_id};
use crate::error::AppError;
use crate::federation::LD_JSON_PROFILE;
use crate::metrics::{
    FEDERATION_REQUEST_DURATION_SECONDS, FEDERATION_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS,
    HTTP_REQUESTS_TOTAL,
};

const ACTIVITY_JSON: &str = "application/activity+json";
const LD_JSON: &str = "application/ld+json";

/// Create ActivityPub router
///
/// Routes:
/// - GET /pages/:page/actor - Page actor document
/// - POST /pages/:page/inbox - Page inbox
/// - GET /pages/:page/outbox - Outbox (not implemented)
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/pages/:page/actor", get(actor))
        .route("/pages/:page/inbox", post(inbox))
        .route("/pages/:page/outbox", get(outbox))
}

/// Response content type for an `Accept` header.
///
/// The first listed media type we serve wins; `*/*`, no match or no
/// header at all get the JSON-LD ActivityStreams profile.
fn negotiate_content_type(headers: &HeaderMap) -> &'static str {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    for range in accept.split(',') {
        match range.trim() {
            ACTIVITY_JSON => return ACTIVITY_JSON,
            LD_JSON_PROFILE | "*/*" => return LD_JSON_PROFILE,
            LD_JSON => return LD_JSON,
            _ => {}
        }
    }
    LD_JSON_PROFILE
}

/// GET /pages/:page/actor
///
/// Returns the page's `Service` actor document.
async fn actor(
    State(state): State<AppState>,
    Path(page): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/pages/:page/actor"])
        .start_timer();

    let actor = state.pages.page_actor(&page).await?;
    let body = serde_json::to_vec(&actor).map_err(|e| AppError::Internal(e.into()))?;
    let content_type = negotiate_content_type(&headers);

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/pages/:page/actor", "200"])
        .inc();

    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

/// POST /pages/:page/inbox
///
/// Receives incoming ActivityPub activities.
///
/// # Steps
/// 1. Verify HTTP Signature
/// 2. Parse the object and check its id
/// 3. Persist and dispatch
async fn inbox(
    State(state): State<AppState>,
    Path(page): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/pages/:page/inbox"])
        .start_timer();
    let _fed_timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    // Verify the page exists before any outbound key fetch
    state.pages.page_actor(&page).await?;

    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let signer = match state.verifier.verify("POST", target, &headers, &body).await {
        Ok(signer) => signer,
        Err(error) => {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["inbound", "unauthorized"])
                .inc();
            return Err(error.into());
        }
    };

    let object = FederatedObject::parse(body.to_vec())
        .map_err(|e| AppError::Validation(format!("Invalid activity: {e}")))?;
    ensure_https_id(&object.id).map_err(|e| AppError::Validation(e.to_string()))?;

    tracing::info!(
        page = %page,
        id = %object.id,
        kind = %object.kind,
        key_id = %signer.key_id,
        "Inbox received object"
    );

    if let Err(error) = state.inbox.process(object).await {
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["inbound", "failure"])
            .inc();
        return Err(error.into());
    }

    FEDERATION_REQUESTS_TOTAL
        .with_label_values(&["inbound", "success"])
        .inc();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/pages/:page/inbox", "201"])
        .inc();

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "okay": "accepted" })),
    ))
}

/// GET /pages/:page/outbox
async fn outbox(Path(page): Path<String>) -> Result<(), AppError> {
    Err(AppError::NotImplemented(format!("outbox for page {page}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn negotiates_first_supported_type() {
        assert_eq!(
            negotiate_content_type(&accept("text/html, application/activity+json")),
            ACTIVITY_JSON
        );
        assert_eq!(
            negotiate_content_type(&accept("application/ld+json, application/activity+json")),
            LD_JSON
        );
        assert_eq!(
            negotiate_content_type(&accept(LD_JSON_PROFILE)),
            LD_JSON_PROFILE
        );
    }

    #[test]
    fn wildcard_and_missing_accept_get_profile() {
        assert_eq!(negotiate_content_type(&accept("*/*")), LD_JSON_PROFILE);
        assert_eq!(negotiate_content_type(&accept("text/html")), LD_JSON_PROFILE);
        assert_eq!(negotiate_content_type(&HeaderMap::new()), LD_JSON_PROFILE);
    }
}

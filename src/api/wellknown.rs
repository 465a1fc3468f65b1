//! Well-known endpoints
//!
//! - /.well-known/webfinger

use axum::{
    Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{JRD_CONTENT_TYPE, WebFingerError, page_webfinger, parse_acct};
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
pub fn wellknown_router() -> Router<AppState> {
    Router::new().route("/.well-known/webfinger", get(webfinger))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: Option<String>,
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for page actors.
///
/// Query: ?resource=acct:page@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Response, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/.well-known/webfinger"])
        .start_timer();

    let resource = query.resource.ok_or(WebFingerError::MissingResource)?;
    let page = parse_acct(&resource, state.urls.domain())?;

    // Only pages with an actor are discoverable
    let actor = state.pages.page_actor(&page).await?;
    let jrd = page_webfinger(&resource, &actor.id);

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/.well-known/webfinger", "200"])
        .inc();

    Ok(([(header::CONTENT_TYPE, JRD_CONTENT_TYPE)], Json(jrd)).into_response())
}

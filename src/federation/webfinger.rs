//! WebFinger protocol implementation
//!
//! Maps `acct:<page>@<domain>` to the page's actor id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JRD content type
pub const JRD_CONTENT_TYPE: &str = "application/jrd+json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebFingerError {
    #[error("Missing resource")]
    MissingResource,

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Well-formed account on a domain this server does not serve
    #[error("Unknown domain in resource: {0}")]
    ForeignDomain(String),
}

/// WebFinger JRD response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    pub link_type: String,
    pub href: String,
}

/// Page name addressed by an `acct:` resource on `domain`.
///
/// # Example
/// ```ignore
/// let page = parse_acct("acct:FrontPage@wiki.example", "wiki.example")?;
/// assert_eq!(page, "FrontPage");
/// ```
pub fn parse_acct(resource: &str, domain: &str) -> Result<String, WebFingerError> {
    if resource.is_empty() {
        return Err(WebFingerError::MissingResource);
    }
    let acct = resource
        .strip_prefix("acct:")
        .ok_or_else(|| WebFingerError::InvalidResource(resource.to_string()))?;
    let (name, host) = acct
        .rsplit_once('@')
        .ok_or_else(|| WebFingerError::InvalidResource(resource.to_string()))?;

    if name.is_empty() {
        return Err(WebFingerError::InvalidResource(resource.to_string()));
    }
    if !host.eq_ignore_ascii_case(domain) {
        return Err(WebFingerError::ForeignDomain(host.to_string()));
    }
    Ok(name.to_string())
}

/// JRD for a page actor.
pub fn page_webfinger(resource: &str, actor_id: &str) -> WebFingerResponse {
    WebFingerResponse {
        subject: resource.to_string(),
        aliases: vec![actor_id.to_string()],
        links: vec![WebFingerLink {
            rel: "self".to_string(),
            link_type: "application/activity+json".to_string(),
            href: actor_id.to_string(),
        }],
    }
}

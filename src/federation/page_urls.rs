//! Local URL scheme for page actors
//!
//! Every page is its own actor under `https://{domain}/pages/{page}/`.

use base64::{Engine, engine::general_purpose::URL_SAFE};
use rand::RngCore;

const PAGES_ROOT: &str = "/pages/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrls {
    domain: String,
}

impl PageUrls {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `https://{domain}/pages/{page}`
    pub fn base(&self, page: &str) -> String {
        format!("https://{}{}{}", self.domain, PAGES_ROOT, page)
    }

    pub fn actor(&self, page: &str) -> String {
        format!("{}/actor", self.base(page))
    }

    pub fn inbox(&self, page: &str) -> String {
        format!("{}/inbox", self.base(page))
    }

    pub fn outbox(&self, page: &str) -> String {
        format!("{}/outbox", self.base(page))
    }

    pub fn followers(&self, page: &str) -> String {
        format!("{}/followers", self.base(page))
    }

    pub fn key_id(&self, page: &str) -> String {
        format!("{}#main-key", self.actor(page))
    }

    /// Id of the change note for one revision.
    pub fn diff_note(&self, page: &str, revision: &str) -> String {
        format!("{}/history/{}/diff", self.base(page), revision)
    }

    /// Page name for a local page actor id.
    ///
    /// Only exact `https://{domain}/pages/{page}/actor` ids match; the page
    /// name must be non-empty and contain no `/`.
    pub fn page_from_actor(&self, actor_id: &str) -> Option<String> {
        let prefix = format!("https://{}{}", self.domain, PAGES_ROOT);
        let page = actor_id.strip_prefix(&prefix)?.strip_suffix("/actor")?;
        if page.is_empty() || page.contains('/') {
            return None;
        }
        Some(page.to_string())
    }

    /// Fresh id for an Accept sent on behalf of `page`.
    pub fn accept_id(&self, page: &str) -> String {
        let mut nonce = [0u8; 36];
        rand::thread_rng().fill_bytes(&mut nonce);
        format!("{}/#accept-{}", self.base(page), URL_SAFE.encode(nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_urls_follow_the_actor_layout() {
        let urls = PageUrls::new("wiki.example");
        assert_eq!(urls.actor("FrontPage"), "https://wiki.example/pages/FrontPage/actor");
        assert_eq!(urls.inbox("FrontPage"), "https://wiki.example/pages/FrontPage/inbox");
        assert_eq!(
            urls.key_id("FrontPage"),
            "https://wiki.example/pages/FrontPage/actor#main-key"
        );
        assert_eq!(
            urls.diff_note("FrontPage", "abc"),
            "https://wiki.example/pages/FrontPage/history/abc/diff"
        );
    }

    #[test]
    fn page_from_actor_requires_exact_local_actor_ids() {
        let urls = PageUrls::new("wiki.example");
        assert_eq!(
            urls.page_from_actor("https://wiki.example/pages/FrontPage/actor"),
            Some("FrontPage".to_string())
        );

        for foreign in [
            "https://other.example/pages/FrontPage/actor",
            "http://wiki.example/pages/FrontPage/actor",
            "https://wiki.example/pages//actor",
            "https://wiki.example/pages/A/B/actor",
            "https://wiki.example/pages/FrontPage/actor/extra",
            "https://wiki.example/pages/FrontPage",
        ] {
            assert_eq!(urls.page_from_actor(foreign), None, "{foreign}");
        }
    }

    #[test]
    fn accept_ids_are_unique_and_url_safe() {
        let urls = PageUrls::new("wiki.example");
        let first = urls.accept_id("FrontPage");
        let second = urls.accept_id("FrontPage");

        assert_ne!(first, second);
        let suffix = first
            .strip_prefix("https://wiki.example/pages/FrontPage/#accept-")
            .unwrap();
        assert_eq!(suffix.len(), 48);
        assert!(!suffix.contains('+') && !suffix.contains('/'));
    }
}

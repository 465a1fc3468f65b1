//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fediwiki::data::FederatedObject;
use fediwiki::federation::{
    ActivityFetcher, Actor, Delivery, DeliveryError, FetchError, LD_JSON_PROFILE, sign_request,
};
use fediwiki::{AppState, config};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Domain every test server serves
pub const DOMAIN: &str = "wiki.example";

/// Remote documents served to the application instead of the network
#[derive(Default)]
pub struct FakeFetcher {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeFetcher {
    pub fn insert(&self, url: &str, document: &Value) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), serde_json::to_vec(document).unwrap());
    }
}

#[async_trait]
impl ActivityFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _accept: &str) -> Result<Vec<u8>, FetchError> {
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

/// One outbound delivery
#[derive(Debug, Clone)]
pub struct Sent {
    pub origin_page: String,
    pub inbox: String,
    pub body: Value,
}

/// Records deliveries instead of sending them
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingDelivery {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send(
        &self,
        origin_page: &str,
        target: &Actor,
        object: &FederatedObject,
    ) -> Result<(), DeliveryError> {
        let body = serde_json::from_slice(&object.raw)?;
        self.sent.lock().unwrap().push(Sent {
            origin_page: origin_page.to_string(),
            inbox: target.inbox.clone(),
            body,
        });
        Ok(())
    }
}

/// A remote actor with its own signing key
pub struct RemoteActor {
    pub id: String,
    pub inbox: String,
    pub key_id: String,
    private_key_pem: String,
    public_key_pem: String,
}

impl RemoteActor {
    pub fn new(id: &str) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
        let public_key_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        Self {
            id: id.to_string(),
            inbox: format!("{id}/inbox"),
            key_id: format!("{id}#main-key"),
            private_key_pem,
            public_key_pem,
        }
    }

    pub fn document(&self) -> Value {
        json!({
            "@context": [
                "https://www.w3.org/ns/activitystreams",
                "https://w3id.org/security/v1"
            ],
            "id": self.id,
            "type": "Person",
            "preferredUsername": "alice",
            "inbox": self.inbox,
            "publicKey": {
                "id": self.key_id,
                "owner": self.id,
                "publicKeyPem": self.public_key_pem
            }
        })
    }

    pub fn follow(&self, follow_id: &str, page: &str) -> Value {
        json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "id": follow_id,
            "type": "Follow",
            "actor": self.id,
            "object": format!("https://{DOMAIN}/pages/{page}/actor")
        })
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub fetcher: Arc<FakeFetcher>,
    pub delivery: Arc<RecordingDelivery>,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        fediwiki::metrics::init_metrics();

        let temp_dir = TempDir::new().unwrap();

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: DOMAIN.to_string(),
            },
            storage: config::StorageConfig {
                root: temp_dir.path().to_path_buf(),
            },
            federation: config::FederationConfig {
                http_timeout_secs: 5,
                connect_timeout_secs: 5,
                user_agent: "fediwiki-test".to_string(),
                max_clock_skew_secs: 43_200,
                key_bits: 1024,
            },
            pages: config::PagesConfig {
                bootstrap: vec!["FrontPage".to_string()],
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let fetcher = Arc::new(FakeFetcher::default());
        let delivery = Arc::new(RecordingDelivery::default());
        let recorder: Arc<dyn Delivery> = delivery.clone();
        let state = AppState::with_transport(config, fetcher.clone(), move |_pages| recorder)
            .await
            .unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = fediwiki::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            fetcher,
            delivery,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Make `actor` resolvable through the fake fetcher.
    pub fn register(&self, actor: &RemoteActor) {
        self.fetcher.insert(&actor.id, &actor.document());
    }

    /// POST `activity` to `path`, signed by `actor` for the public URL.
    pub async fn signed_post(
        &self,
        actor: &RemoteActor,
        path: &str,
        activity: &Value,
    ) -> reqwest::Response {
        let body = serde_json::to_vec(activity).unwrap();
        self.signed_post_bytes(actor, path, &body, &body).await
    }

    /// Sign `signed_body` but send `sent_body`.
    pub async fn signed_post_bytes(
        &self,
        actor: &RemoteActor,
        path: &str,
        signed_body: &[u8],
        sent_body: &[u8],
    ) -> reqwest::Response {
        let public_url = format!("https://{DOMAIN}{path}");
        let signed = sign_request(
            "POST",
            &public_url,
            signed_body,
            LD_JSON_PROFILE,
            &actor.private_key_pem,
            &actor.key_id,
        )
        .unwrap();

        self.client
            .post(self.url(path))
            .header("Host", signed.host)
            .header("Date", signed.date)
            .header("Digest", signed.digest)
            .header("Signature", signed.signature)
            .header("Content-Type", LD_JSON_PROFILE)
            .body(sent_body.to_vec())
            .send()
            .await
            .unwrap()
    }
}

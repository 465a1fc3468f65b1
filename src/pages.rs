//! Page directory
//!
//! Each wiki page federates as its own `Service` actor. The actor document
//! and its private key live under `pages/<page>/`; notes attached to a
//! page's thread go to the global `notes` table with their payload in the
//! object store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

use crate::data::{
    FederatedObject, KeyedRecordStore, ObjectError, ObjectStore, Record, StoreError, Table,
};
use crate::federation::{ACTIVITYSTREAMS, Actor, JsonLdContext, Note, PageUrls, PublicKey, SECURITY_V1};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Page not found: {0}")]
    NotFound(String),

    #[error("Invalid page name: {0:?}")]
    InvalidName(String),

    #[error("Note {note} already attached to page {page}")]
    AlreadyAttached { page: String, note: String },

    #[error("Page key error: {0}")]
    Key(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Signing material for a page actor
#[derive(Debug, Clone)]
pub struct PageKey {
    pub actor_id: String,
    pub key_id: String,
    pub private_key_pem: String,
}

/// Local pages as seen by the federation layer.
#[async_trait]
pub trait PageDirectory: Send + Sync {
    /// Actor document of an existing page.
    async fn page_actor(&self, page: &str) -> Result<Actor, PageError>;

    async fn signing_key(&self, page: &str) -> Result<PageKey, PageError>;

    /// Add a note to the page's thread.
    ///
    /// # Errors
    /// `AlreadyAttached` when the note is already on this page.
    async fn attach_note(&self, page: &str, note: &Note) -> Result<(), PageError>;

    async fn page_notes(&self, page: &str) -> Result<Vec<Note>, PageError>;
}

/// Reject names that could leave `pages/`.
pub fn validate_page_name(page: &str) -> Result<(), PageError> {
    if page.is_empty()
        || page == "."
        || page == ".."
        || page.contains('/')
        || page.contains('\\')
        || page.contains('\0')
    {
        return Err(PageError::InvalidName(page.to_string()));
    }
    Ok(())
}

/// Page directory on the local filesystem plus the shared record store.
pub struct FlatFilePages {
    root: PathBuf,
    urls: PageUrls,
    store: Arc<dyn KeyedRecordStore>,
    objects: Arc<ObjectStore>,
    key_bits: usize,
}

impl FlatFilePages {
    pub fn new(
        root: impl Into<PathBuf>,
        urls: PageUrls,
        store: Arc<dyn KeyedRecordStore>,
        objects: Arc<ObjectStore>,
        key_bits: usize,
    ) -> Self {
        Self {
            root: root.into(),
            urls,
            store,
            objects,
            key_bits,
        }
    }

    fn page_dir(&self, page: &str) -> Result<PathBuf, PageError> {
        validate_page_name(page)?;
        Ok(self.root.join("pages").join(page))
    }

    /// Generate a key pair and write a new actor for `page`.
    ///
    /// Overwrites any existing actor; see [`Self::ensure_page_actor`].
    pub async fn create_page_actor(
        &self,
        page: &str,
        title: &str,
        summary: &str,
    ) -> Result<Actor, PageError> {
        let dir = self.page_dir(page)?;

        let bits = self.key_bits;
        let private_key = tokio::task::spawn_blocking(move || {
            RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        })
        .await
        .map_err(|e| PageError::Key(e.to_string()))?
        .map_err(|e| PageError::Key(e.to_string()))?;

        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| PageError::Key(e.to_string()))?;
        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| PageError::Key(e.to_string()))?;

        let id = self.urls.actor(page);
        let actor = Actor {
            context: JsonLdContext::from_strings([ACTIVITYSTREAMS, SECURITY_V1]),
            id: id.clone(),
            kind: "Service".to_string(),
            preferred_username: page.to_string(),
            name: title.to_string(),
            summary: summary.to_string(),
            inbox: self.urls.inbox(page),
            outbox: self.urls.outbox(page),
            following: String::new(),
            followers: self.urls.followers(page),
            public_key: PublicKey {
                id: self.urls.key_id(page),
                owner: id,
                public_key_pem,
            },
        };

        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("private.pem"), private_key_pem.as_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                dir.join("private.pem"),
                std::fs::Permissions::from_mode(0o600),
            )
            .await?;
        }
        tokio::fs::write(dir.join("actor.json"), serde_json::to_vec(&actor)?).await?;

        tracing::info!(page = %page, actor = %actor.id, "Created page actor");
        Ok(actor)
    }

    /// Existing actor for `page`, creating one titled after the page if absent.
    pub async fn ensure_page_actor(&self, page: &str) -> Result<Actor, PageError> {
        match self.page_actor(page).await {
            Err(PageError::NotFound(_)) => self.create_page_actor(page, page, "").await,
            other => other,
        }
    }
}

async fn read_optional(path: PathBuf) -> Result<Option<Vec<u8>>, std::io::Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl PageDirectory for FlatFilePages {
    async fn page_actor(&self, page: &str) -> Result<Actor, PageError> {
        let dir = self.page_dir(page)?;
        let bytes = read_optional(dir.join("actor.json"))
            .await?
            .ok_or_else(|| PageError::NotFound(page.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn signing_key(&self, page: &str) -> Result<PageKey, PageError> {
        let actor = self.page_actor(page).await?;
        let pem = read_optional(self.page_dir(page)?.join("private.pem"))
            .await?
            .ok_or_else(|| PageError::Key(format!("no private key for page {page}")))?;
        let private_key_pem =
            String::from_utf8(pem).map_err(|e| PageError::Key(e.to_string()))?;

        Ok(PageKey {
            actor_id: actor.id,
            key_id: actor.public_key.id,
            private_key_pem,
        })
    }

    async fn attach_note(&self, page: &str, note: &Note) -> Result<(), PageError> {
        validate_page_name(page)?;

        let existing = self.store.search(&Table::Notes, "id", &note.id).await?;
        if existing.iter().any(|record| record.matches("pagename", page)) {
            return Err(PageError::AlreadyAttached {
                page: page.to_string(),
                note: note.id.clone(),
            });
        }

        // Payload first, so an index record never points at a missing object
        self.objects
            .upsert(&FederatedObject::new(
                note.id.as_str(),
                "Note",
                serde_json::to_vec(note)?,
            ))
            .await?;
        self.store
            .append(
                &Table::Notes,
                Record::new()
                    .with("id", note.id.as_str())
                    .with("type", "Note")
                    .with("pagename", page),
            )
            .await?;

        tracing::info!(page = %page, note = %note.id, "Attached note to page");
        Ok(())
    }

    async fn page_notes(&self, page: &str) -> Result<Vec<Note>, PageError> {
        validate_page_name(page)?;

        let mut notes = Vec::new();
        for record in self.store.search(&Table::Notes, "pagename", page).await? {
            let Some(id) = record.get("id") else {
                continue;
            };
            let object = self.objects.get(id).await?;
            notes.push(serde_json::from_slice(&object.raw)?);
        }
        Ok(notes)
    }
}

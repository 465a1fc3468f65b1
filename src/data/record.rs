//! Append-only attribute records
//!
//! Every ledger in this crate is a sequence of flat `attr=value` records.
//! Records are only ever appended; readers reconcile at read time.
//! Raw payloads (objects, actor documents, keys) live in blobs that
//! records point at through a `cachepath` attribute.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Record store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record in {table} line {line}: {reason}")]
    Corrupt {
        table: String,
        line: usize,
        reason: String,
    },

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
}

// =============================================================================
// Record
// =============================================================================

/// One ledger entry: an ordered list of attribute/value tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    tuples: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tuple, builder style.
    pub fn with(mut self, attr: impl Into<String>, value: impl Into<String>) -> Self {
        self.tuples.push((attr.into(), value.into()));
        self
    }

    /// First value stored under `attr`.
    pub fn get(&self, attr: &str) -> Option<&str> {
        self.tuples
            .iter()
            .find(|(a, _)| a == attr)
            .map(|(_, v)| v.as_str())
    }

    pub fn matches(&self, attr: &str, value: &str) -> bool {
        self.tuples.iter().any(|(a, v)| a == attr && v == value)
    }

    pub fn tuples(&self) -> &[(String, String)] {
        &self.tuples
    }

    /// Serialize to a single line.
    ///
    /// Values containing whitespace, quotes, `=` or backslashes are quoted.
    pub fn to_line(&self) -> String {
        self.tuples
            .iter()
            .map(|(attr, value)| format!("{}={}", attr, quote_value(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse a line produced by [`Record::to_line`].
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let mut tuples = Vec::new();
        let mut chars = line.chars().peekable();

        loop {
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut attr = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' || c.is_whitespace() {
                    break;
                }
                attr.push(c);
                chars.next();
            }
            if chars.next() != Some('=') {
                return Err(format!("attribute {attr:?} has no value"));
            }
            if attr.is_empty() {
                return Err("empty attribute name".to_string());
            }

            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some(other) => value.push(other),
                            None => return Err("dangling escape".to_string()),
                        },
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(format!("unterminated value for {attr:?}"));
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }

            tuples.push((attr, value));
        }

        Ok(Self { tuples })
    }
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c == '=');
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

// =============================================================================
// Tables
// =============================================================================

/// Logical tables of the federation state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Table {
    /// Index of stored federated objects
    Objects,
    /// Ids of objects the inbox has finished handling
    Processed,
    /// Cached remote actors
    Actors,
    /// Cached remote public keys
    Keys,
    /// Undo tombstones (global across pages)
    Undo,
    /// Notes attached to page threads
    Notes,
    /// Accepted followers of one page
    Followers(String),
}

impl Table {
    /// Location of the table relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Table::Objects => PathBuf::from("objects/objects.db"),
            Table::Processed => PathBuf::from("objects/processed.db"),
            Table::Actors => PathBuf::from("actors.db"),
            Table::Keys => PathBuf::from("keys/knownkeys.db"),
            Table::Undo => PathBuf::from("undo.db"),
            Table::Notes => PathBuf::from("notes.db"),
            Table::Followers(page) => Path::new("pages").join(page).join("followers.db"),
        }
    }

    fn name(&self) -> String {
        self.relative_path().to_string_lossy().into_owned()
    }
}

// =============================================================================
// Store contract
// =============================================================================

/// Append-only keyed record store with attribute search and raw blobs.
///
/// Implementations must keep appends in order per table; searches return
/// matches in append order so "last record wins" is well defined.
#[async_trait]
pub trait KeyedRecordStore: Send + Sync {
    /// Append one record to the end of `table`.
    async fn append(&self, table: &Table, record: Record) -> Result<(), StoreError>;

    /// All records of `table` in append order. Missing tables are empty.
    async fn scan(&self, table: &Table) -> Result<Vec<Record>, StoreError>;

    /// Records of `table` holding `attr=value`, in append order.
    async fn search(
        &self,
        table: &Table,
        attr: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .scan(table)
            .await?
            .into_iter()
            .filter(|record| record.matches(attr, value))
            .collect())
    }

    /// Write (or overwrite) a blob at a relative path.
    async fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Read a blob; `None` when it does not exist.
    async fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

// =============================================================================
// Flat-file store
// =============================================================================

/// Record store backed by one line-oriented file per table.
pub struct FlatFileStore {
    root: PathBuf,
    /// Serializes appends so lines never interleave
    append_lock: Mutex<()>,
}

impl FlatFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, relative: &str) -> Result<PathBuf, StoreError> {
        let path = Path::new(relative);
        let safe = !relative.is_empty()
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl KeyedRecordStore for FlatFileStore {
    async fn append(&self, table: &Table, record: Record) -> Result<(), StoreError> {
        let path = self.root.join(table.relative_path());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = record.to_line();
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::trace!(table = %table.name(), "Appended record");
        Ok(())
    }

    async fn scan(&self, table: &Table) -> Result<Vec<Record>, StoreError> {
        let path = self.root.join(table.relative_path());
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let record = Record::parse_line(trimmed).map_err(|reason| StoreError::Corrupt {
                table: table.name(),
                line: index + 1,
                reason,
            })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let full = self.blob_path(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(())
    }

    async fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.blob_path(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Volatile record store, used by tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, Vec<Record>>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyedRecordStore for MemoryStore {
    async fn append(&self, table: &Table, record: Record) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .entry(table.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn scan(&self, table: &Table) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.blobs
            .write()
            .await
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().await.get(path).cloned())
    }
}

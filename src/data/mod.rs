//! Data layer module
//!
//! Append-only federation state:
//! - Keyed record store (flat files or memory)
//! - Object store (raw federated JSON)
//! - Follower and undo ledgers
//! - Processed-ids ledger

mod followers;
mod objects;
mod processed;
mod record;

pub use followers::{FollowerLedger, FollowerRecord, LedgerError};
pub use objects::{FederatedObject, ObjectError, ObjectStore, ensure_https_id, storage_key};
pub use processed::ProcessedLedger;
pub use record::{FlatFileStore, KeyedRecordStore, MemoryStore, Record, StoreError, Table};

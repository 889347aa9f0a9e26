//! Yap Storage Backends
//!
//! The document store the board runs against, plus local persistence:
//! - `DocumentStore`: hierarchical JSON documents with ordered queries,
//!   atomic write batches guarded by preconditions, and change events
//! - Memory (default): fast, volatile storage with index enforcement and
//!   fault injection for tests
//! - SQLite: embedded persistence
//! - `KeyValueStore`: device-local state that survives restarts

pub mod local;
pub mod memory;
pub mod path;
pub mod query;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod txn;
pub mod write;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

pub use local::{FileKv, KeyValueExt, KeyValueStore, MemoryKv};
pub use memory::MemoryStore;
pub use path::{CollectionPath, DocPath};
pub use query::{Direction, OrderBy, Query};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteKv, SqliteStore};
pub use txn::{run_transaction, RetryPolicy, Transaction};
pub use write::{Expect, Precondition, Write, WriteBatch};

/// Capacity of the change-event broadcast channel
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A document as read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocPath,
    /// Monotonic per-store version; changes on every write to the document
    pub version: u64,
    pub data: Value,
}

impl Snapshot {
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

/// Kind of change applied to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Change notification sent to watchers after a commit
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub path: DocPath,
    pub kind: ChangeKind,
}

/// Document store trait
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a single document
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError>;

    /// Read every document of a collection in the requested order.
    ///
    /// Documents that compare equal on every key are ordered by id ascending.
    /// Backends may refuse compound orderings with `StoreError::IndexRequired`.
    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError>;

    /// Apply a batch atomically: every precondition holds and every write
    /// applies, or nothing changes
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Subscribe to change events for every committed write
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Create a document under an auto-generated id
    async fn add(&self, collection: &CollectionPath, data: Value) -> Result<DocPath, StoreError> {
        let path = collection.auto_doc();
        let batch = WriteBatch::new()
            .precondition(Precondition::missing(path.clone()))
            .write(Write::Set {
                path: path.clone(),
                data,
            });
        self.commit(batch).await?;
        Ok(path)
    }
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Write conflict on {0}")]
    Conflict(String),

    #[error("Transaction aborted after {attempts} attempts")]
    TransactionAborted { attempts: u32 },

    #[error("Query requires an index: {0}")]
    IndexRequired(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Failures worth retrying or routing around
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_)
                | StoreError::TransactionAborted { .. }
                | StoreError::Unavailable(_)
                | StoreError::Database(_)
        )
    }
}

impl From<StoreError> for yap_core::Error {
    fn from(e: StoreError) -> Self {
        use yap_core::Error;

        match e {
            StoreError::NotFound(path) => Error::NotFound(path),
            StoreError::Unavailable(msg) => Error::Offline(msg),
            StoreError::TransactionAborted { attempts } => Error::TransactionConflict { attempts },
            StoreError::Conflict(_) => Error::TransactionConflict { attempts: 1 },
            StoreError::InvalidPath(msg) => Error::Validation(msg),
            other => Error::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let e: yap_core::Error = StoreError::NotFound("topics/x".into()).into();
        assert!(matches!(e, yap_core::Error::NotFound(_)));

        let e: yap_core::Error = StoreError::Unavailable("offline".into()).into();
        assert!(e.is_offline());

        let e: yap_core::Error = StoreError::TransactionAborted { attempts: 5 }.into();
        assert!(matches!(e, yap_core::Error::TransactionConflict { attempts: 5 }));

        let e: yap_core::Error = StoreError::IndexRequired("topics".into()).into();
        assert!(matches!(e, yap_core::Error::Store(_)));
    }

    #[test]
    fn test_transient_errors() {
        assert!(StoreError::Conflict("x".into()).is_transient());
        assert!(StoreError::Unavailable("x".into()).is_transient());
        assert!(!StoreError::NotFound("x".into()).is_transient());
        assert!(!StoreError::InvalidDocument("x".into()).is_transient());
    }
}

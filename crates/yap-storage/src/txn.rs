//! Optimistic read-modify-write transactions
//!
//! A transaction remembers the version of every document it reads and
//! commits its buffered writes guarded by those versions. If any of them
//! moved in the meantime the store rejects the commit with
//! `StoreError::Conflict` and `run_transaction` starts the attempt over.

use crate::{DocPath, DocumentStore, Precondition, Snapshot, StoreError, Write, WriteBatch};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behaviour for conflicting transactions
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first conflict; doubles on each further conflict
    #[serde(with = "millis")]
    pub base_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Buffered transaction over a document store
pub struct Transaction<'a> {
    store: &'a dyn DocumentStore,
    reads: Vec<Precondition>,
    writes: Vec<Write>,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Read a document and pin its version for the commit
    pub async fn get(&mut self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let snapshot = self.store.get(path).await?;
        if !self.reads.iter().any(|p| &p.path == path) {
            self.reads.push(Precondition::version(
                path.clone(),
                snapshot.as_ref().map(|s| s.version),
            ));
        }
        Ok(snapshot)
    }

    pub fn write(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn set(&mut self, path: DocPath, data: serde_json::Value) {
        self.write(Write::Set { path, data });
    }

    pub fn delete(&mut self, path: DocPath) {
        self.write(Write::Delete { path });
    }

    /// Commit the buffered writes; read-only transactions commit nothing
    pub async fn commit(self) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let batch = WriteBatch {
            preconditions: self.reads,
            writes: self.writes,
        };
        self.store.commit(batch).await
    }
}

/// Run `attempt` until it succeeds, fails with a non-conflict error, or
/// the policy's attempts are used up.
///
/// Each call of `attempt` must start a fresh `Transaction`.
pub async fn run_transaction<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for n in 1..=max_attempts {
        match attempt().await {
            Err(StoreError::Conflict(path)) => {
                if n == max_attempts {
                    warn!(attempts = n, path = %path, "Transaction retries exhausted");
                    break;
                }
                let delay = policy.backoff(n);
                debug!(attempt = n, path = %path, delay_ms = delay.as_millis() as u64, "Transaction conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }

    Err(StoreError::TransactionAborted { attempts: max_attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollectionPath, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(40), Duration::from_millis(50));
    }

    #[test]
    fn test_policy_from_toml_like_json() {
        let policy: RetryPolicy = serde_json::from_value(json!({"max_attempts": 3, "base_backoff": 5})).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_backoff, Duration::from_millis(5));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stale_read_conflicts() {
        let store = MemoryStore::new();
        let path = CollectionPath::new("counters").unwrap().doc("c").unwrap();
        store
            .commit(WriteBatch::new().write(Write::Set { path: path.clone(), data: json!({"n": 0}) }))
            .await
            .unwrap();

        let mut txn = Transaction::new(&store);
        txn.get(&path).await.unwrap();
        txn.set(path.clone(), json!({"n": 1}));

        // Someone else writes between our read and our commit
        store
            .commit(WriteBatch::new().write(Write::Set { path: path.clone(), data: json!({"n": 5}) }))
            .await
            .unwrap();

        assert!(matches!(txn.commit().await, Err(StoreError::Conflict(_))));
        assert_eq!(store.get(&path).await.unwrap().unwrap().data["n"], 5);
    }

    #[tokio::test]
    async fn test_run_transaction_gives_up() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = run_transaction(&policy, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict("x".into()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::TransactionAborted { attempts: 3 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_transaction_passes_other_errors_through() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = run_transaction(&policy, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound("topics/x".into()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Per-device action ledger
//!
//! Every topic keeps one marker document per device and action kind. A
//! counter on the topic moves only together with its marker, inside one
//! optimistic transaction, so a device is counted at most once per kind:
//!
//! - views use [`ActionLedger::ensure_counted`], which only ever adds;
//! - favorites use [`ActionLedger::toggle`], which adds or removes.

use crate::paths;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use yap_core::{ActionKind, ActionMarker, DeviceId, Error, Result, TopicId};
use yap_storage::{
    run_transaction, DocPath, DocumentStore, RetryPolicy, Snapshot, StoreError, Transaction, Write,
    WriteBatch,
};

/// Result of [`ActionLedger::ensure_counted`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOutcome {
    /// The device had already been counted; nothing changed
    AlreadyCounted,
    /// Marker and counter were written in one transaction
    Counted,
    /// The transaction kept failing and the counter was bumped without
    /// guarding against a concurrent count by the same device
    CountedBestEffort,
}

pub struct ActionLedger {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
}

impl ActionLedger {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Whether a marker exists for this device
    pub async fn is_counted(&self, topic: &TopicId, device: &DeviceId, kind: ActionKind) -> Result<bool> {
        let marker = paths::marker(topic, device, kind)?;
        Ok(self.store.get(&marker).await?.is_some())
    }

    /// Count the device once for `kind`. Calling it again is a no-op.
    ///
    /// Only monotonic kinds are accepted; favorites go through [`Self::toggle`].
    pub async fn ensure_counted(
        &self,
        topic: &TopicId,
        device: &DeviceId,
        kind: ActionKind,
    ) -> Result<CountOutcome> {
        if kind == ActionKind::Favorite {
            return Err(Error::Validation(
                "favorites are toggled, not counted".to_string(),
            ));
        }

        let topic_path = paths::topic(topic)?;
        let marker_path = paths::marker(topic, device, kind)?;

        if self.store.get(&marker_path).await?.is_some() {
            debug!(topic = %topic, device = %device, kind = %kind, "Already counted");
            return Ok(CountOutcome::AlreadyCounted);
        }

        let marker = marker_document(device)?;
        let field = kind.counter_field();
        let store = self.store.as_ref();

        let result = run_transaction(&self.policy, || {
            let topic_path = topic_path.clone();
            let marker_path = marker_path.clone();
            let marker = marker.clone();
            async move {
                let mut txn = Transaction::new(store);
                if txn.get(&marker_path).await?.is_some() {
                    return Ok(CountOutcome::AlreadyCounted);
                }
                let current = read_counter(txn.get(&topic_path).await?, &topic_path, field)?;

                txn.set(marker_path, marker);
                txn.write(counter_write(topic_path, field, current + 1));
                txn.commit().await?;
                Ok::<_, StoreError>(CountOutcome::Counted)
            }
        })
        .await;

        match result {
            Ok(outcome) => {
                if outcome == CountOutcome::Counted {
                    debug!(topic = %topic, device = %device, kind = %kind, "Counted");
                }
                Ok(outcome)
            }
            Err(e) if e.is_transient() => {
                warn!(topic = %topic, device = %device, kind = %kind, error = %e, "Transaction failed, counting without guard");
                self.count_best_effort(&topic_path, marker_path, marker, field).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Plain increment followed by a separate marker write.
    ///
    /// A concurrent count by the same device between the two writes is
    /// counted twice. A failed marker write leaves the device uncounted
    /// for the next call.
    async fn count_best_effort(
        &self,
        topic_path: &DocPath,
        marker_path: DocPath,
        marker: Value,
        field: &str,
    ) -> Result<CountOutcome> {
        let increment = WriteBatch::new().write(Write::Increment {
            path: topic_path.clone(),
            field: field.to_string(),
            by: 1,
        });
        self.store.commit(increment).await?;

        let record = WriteBatch::new().write(Write::Set {
            path: marker_path.clone(),
            data: marker,
        });
        if let Err(e) = self.store.commit(record).await {
            warn!(marker = %marker_path, error = %e, "Counter bumped but marker not recorded");
        }

        Ok(CountOutcome::CountedBestEffort)
    }

    /// Flip the favorite state of `device` on the topic.
    ///
    /// Returns `true` when the topic is now a favorite. Exhausted retries
    /// surface as `TransactionConflict` and change nothing.
    pub async fn toggle(&self, topic: &TopicId, device: &DeviceId) -> Result<bool> {
        let kind = ActionKind::Favorite;
        let topic_path = paths::topic(topic)?;
        let marker_path = paths::marker(topic, device, kind)?;
        let marker = marker_document(device)?;
        let field = kind.counter_field();
        let store = self.store.as_ref();

        let result = run_transaction(&self.policy, || {
            let topic_path = topic_path.clone();
            let marker_path = marker_path.clone();
            let marker = marker.clone();
            async move {
                let mut txn = Transaction::new(store);
                let existing = txn.get(&marker_path).await?;
                let current = read_counter(txn.get(&topic_path).await?, &topic_path, field)?;

                let (next, favorited) = match existing {
                    Some(_) => {
                        txn.delete(marker_path);
                        (current.saturating_sub(1), false)
                    }
                    None => {
                        txn.set(marker_path, marker);
                        (current + 1, true)
                    }
                };
                txn.write(counter_write(topic_path, field, next));
                txn.commit().await?;
                Ok::<_, StoreError>(favorited)
            }
        })
        .await;

        match result {
            Ok(favorited) => {
                info!(topic = %topic, device = %device, favorited, "Favorite toggled");
                Ok(favorited)
            }
            Err(e) => {
                warn!(topic = %topic, device = %device, error = %e, "Favorite toggle failed");
                Err(e.into())
            }
        }
    }
}

fn marker_document(device: &DeviceId) -> Result<Value> {
    serde_json::to_value(ActionMarker::new(device.clone()))
        .map_err(|e| Error::Store(format!("serialization: {}", e)))
}

/// Counter value of a topic snapshot; absent counters read as zero
fn read_counter(snapshot: Option<Snapshot>, path: &DocPath, field: &str) -> std::result::Result<u64, StoreError> {
    let snapshot = snapshot.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
    match snapshot.data.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value.as_u64().ok_or_else(|| {
            StoreError::InvalidDocument(format!("{}: {} is not a counter", path, field))
        }),
    }
}

fn counter_write(path: DocPath, field: &str, value: u64) -> Write {
    let mut fields = Map::new();
    fields.insert(field.to_string(), Value::from(value));
    Write::Merge { path, fields }
}

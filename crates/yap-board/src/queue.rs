//! Offline comment queue
//!
//! Comments submitted while the store is unreachable are appended to a
//! durable FIFO in device-local storage and delivered, in submission
//! order, by [`OfflineQueue::flush`]. An item leaves the queue only after
//! the store accepted it. Failed items stay queued for the next flush.

use crate::adapter::TopicStore;
use crate::connectivity::Connectivity;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use yap_core::{Comment, NewComment, Result, Timestamp, TopicId};
use yap_storage::{KeyValueExt, KeyValueStore};

/// Device-local key of the queue
pub const QUEUE_KEY: &str = "queuedComments";

/// A comment waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedComment {
    /// Position in submission order, unique per device
    #[serde(default)]
    pub seq: u64,
    pub topic_id: TopicId,
    pub user_name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Submission time, strictly increasing along the queue
    pub created_at: Timestamp,
}

impl QueuedComment {
    fn to_new_comment(&self) -> NewComment {
        NewComment {
            user_name: self.user_name.clone(),
            text: self.text.clone(),
            created_at: self.created_at,
            reference: self.reference.clone(),
        }
    }
}

/// Outcome of one flush
#[derive(Debug, Default)]
pub struct FlushReport {
    pub delivered: Vec<Comment>,
    pub failed: usize,
    pub remaining: usize,
    /// Delivered items whose removal could not be saved locally; a restart
    /// sends them again
    pub unsaved: usize,
}

struct Pending {
    items: Vec<QueuedComment>,
    next_seq: u64,
}

pub struct OfflineQueue {
    kv: Arc<dyn KeyValueStore>,
    pending: Mutex<Pending>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    /// Load whatever a previous session left queued
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let items: Vec<QueuedComment> = kv.get_json(QUEUE_KEY)?.unwrap_or_default();
        let next_seq = items.iter().map(|i| i.seq + 1).max().unwrap_or(1);

        if !items.is_empty() {
            info!(pending = items.len(), "Restored queued comments");
        }

        Ok(Self {
            kv,
            pending: Mutex::new(Pending { items, next_seq }),
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Validate and durably append a comment
    pub fn enqueue(
        &self,
        topic_id: &TopicId,
        user_name: &str,
        text: &str,
        reference: Option<&str>,
    ) -> Result<QueuedComment> {
        let new = NewComment::new(user_name, text, reference)?;

        let mut pending = self.pending.lock();
        let created_at = match pending.items.last() {
            Some(last) if last.created_at >= new.created_at => Timestamp(last.created_at.0 + 1),
            _ => new.created_at,
        };
        let item = QueuedComment {
            seq: pending.next_seq,
            topic_id: topic_id.clone(),
            user_name: new.user_name,
            text: new.text,
            reference: new.reference,
            created_at,
        };
        pending.items.push(item.clone());

        if let Err(e) = self.kv.set_json(QUEUE_KEY, &pending.items) {
            pending.items.pop();
            return Err(e.into());
        }
        pending.next_seq += 1;

        debug!(topic = %topic_id, seq = item.seq, pending = pending.items.len(), "Comment queued");
        Ok(item)
    }

    /// Queued comments in submission order
    pub fn pending(&self) -> Vec<QueuedComment> {
        self.pending.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a delivered item. It leaves the in-memory queue even when the
    /// local write fails.
    fn remove(&self, seq: u64) -> Result<()> {
        let mut pending = self.pending.lock();
        pending.items.retain(|i| i.seq != seq);
        self.kv.set_json(QUEUE_KEY, &pending.items)?;
        Ok(())
    }

    /// Try to deliver every queued comment, oldest first.
    ///
    /// Concurrent flushes run one after the other. Items are removed one at
    /// a time as they are accepted, so an interrupted flush resends at most
    /// the item that was in flight.
    pub async fn flush(&self, topics: &TopicStore) -> Result<FlushReport> {
        let _guard = self.flush_lock.lock().await;
        let batch = self.pending();
        let mut report = FlushReport::default();

        for item in batch {
            let sent = topics.insert_comment(&item.topic_id, item.to_new_comment()).await;

            match sent {
                Ok(comment) => {
                    if let Err(e) = self.remove(item.seq) {
                        warn!(seq = item.seq, error = %e, "Delivered comment still saved as queued");
                        report.unsaved += 1;
                    }
                    report.delivered.push(comment);
                }
                Err(e) => {
                    warn!(topic = %item.topic_id, seq = item.seq, error = %e, "Queued comment not delivered");
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.len();
        if !report.delivered.is_empty() || report.failed > 0 {
            info!(
                delivered = report.delivered.len(),
                failed = report.failed,
                remaining = report.remaining,
                unsaved = report.unsaved,
                "Queue flushed"
            );
        }
        Ok(report)
    }

    /// Flush whenever connectivity comes back, and once at start if online
    pub fn spawn_auto_flush(self: Arc<Self>, topics: TopicStore, connectivity: Connectivity) -> JoinHandle<()> {
        let mut online_rx = connectivity.subscribe();

        tokio::spawn(async move {
            let mut was_online = *online_rx.borrow_and_update();
            if was_online {
                self.flush_logged(&topics).await;
            }

            while online_rx.changed().await.is_ok() {
                let online = *online_rx.borrow_and_update();
                if online && !was_online && !self.is_empty() {
                    info!(pending = self.len(), "Back online, flushing queued comments");
                    self.flush_logged(&topics).await;
                }
                was_online = online;
            }
        })
    }

    async fn flush_logged(&self, topics: &TopicStore) {
        if let Err(e) = self.flush(topics).await {
            warn!(error = %e, "Queue flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplyMode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use yap_core::Error;
    use yap_storage::{FileKv, MemoryKv, MemoryStore, StoreError};

    /// Key-value store whose writes fail while `broken` is set
    #[derive(Default)]
    struct BrokenKv {
        inner: MemoryKv,
        broken: AtomicBool,
    }

    impl KeyValueStore for BrokenKv {
        fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    fn setup() -> (Arc<MemoryStore>, TopicStore, OfflineQueue) {
        let store = Arc::new(MemoryStore::new());
        let topics = TopicStore::new(store.clone(), ReplyMode::Subcollection);
        let queue = OfflineQueue::load(Arc::new(MemoryKv::new())).unwrap();
        (store, topics, queue)
    }

    #[tokio::test]
    async fn test_flush_delivers_in_order() {
        let (_, topics, queue) = setup();
        let topic = topics.create_topic("t", "b", "").await.unwrap();

        queue.enqueue(&topic.id, "alice", "one", None).unwrap();
        queue.enqueue(&topic.id, "alice", "two", Some("quote")).unwrap();
        assert_eq!(queue.len(), 2);

        let report = queue.flush(&topics).await.unwrap();
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(report.remaining, 0);

        let texts: Vec<_> = report.delivered.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(topics.list_comments(&topic.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_items_stay_queued() {
        let (store, topics, queue) = setup();
        let topic = topics.create_topic("t", "b", "").await.unwrap();
        queue.enqueue(&topic.id, "alice", "hello", None).unwrap();
        queue
            .enqueue(&TopicId::new("deleted").unwrap(), "alice", "lost", None)
            .unwrap();

        store.set_online(false);
        let report = queue.flush(&topics).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.remaining, 2);

        store.set_online(true);
        let report = queue.flush(&topics).await.unwrap();
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.failed, 1);
        assert_eq!(queue.pending()[0].text, "lost");
    }

    #[tokio::test]
    async fn test_enqueue_validates() {
        let (_, _, queue) = setup();
        let err = queue
            .enqueue(&TopicId::new("t").unwrap(), "alice", "   ", None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        let topic = TopicId::new("t1").unwrap();

        {
            let queue = OfflineQueue::load(Arc::new(FileKv::open(&path).unwrap())).unwrap();
            queue.enqueue(&topic, "alice", "first", None).unwrap();
            queue.enqueue(&topic, "alice", "second", None).unwrap();
        }

        let queue = OfflineQueue::load(Arc::new(FileKv::open(&path).unwrap())).unwrap();
        let pending = queue.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].text, "first");

        let third = queue.enqueue(&topic, "alice", "third", None).unwrap();
        assert!(third.seq > pending[1].seq);
        assert!(third.created_at > pending[1].created_at);
    }

    #[tokio::test]
    async fn test_concurrent_flushes_deliver_once() {
        let (_, topics, queue) = setup();
        let topic = topics.create_topic("t", "b", "").await.unwrap();
        for n in 0..5 {
            queue.enqueue(&topic.id, "alice", &format!("c{}", n), None).unwrap();
        }

        let (a, b) = tokio::join!(queue.flush(&topics), queue.flush(&topics));
        let delivered = a.unwrap().delivered.len() + b.unwrap().delivered.len();

        assert_eq!(delivered, 5);
        assert_eq!(topics.list_comments(&topic.id).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_local_write_failure_does_not_stop_flush() {
        let store = Arc::new(MemoryStore::new());
        let topics = TopicStore::new(store, ReplyMode::Subcollection);
        let topic = topics.create_topic("t", "b", "").await.unwrap();

        let kv = Arc::new(BrokenKv::default());
        let queue = OfflineQueue::load(kv.clone()).unwrap();
        for text in ["one", "two", "three"] {
            queue.enqueue(&topic.id, "alice", text, None).unwrap();
        }

        kv.broken.store(true, Ordering::SeqCst);
        let report = queue.flush(&topics).await.unwrap();
        assert_eq!(report.delivered.len(), 3);
        assert_eq!(report.unsaved, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(topics.list_comments(&topic.id).await.unwrap().len(), 3);

        // the saved queue still lists them, so a restart resends
        let restored = OfflineQueue::load(kv.clone()).unwrap();
        assert_eq!(restored.len(), 3);
    }
}

//! Board facade used by presentation layers
//!
//! Ties the device identity, the action ledger, the store adapter, the
//! offline queue and the local marks together behind the operations a
//! user performs.

use crate::adapter::{CommentThread, TopicStore};
use crate::config::BoardConfig;
use crate::connectivity::Connectivity;
use crate::identity::DeviceIdentity;
use crate::ledger::{ActionLedger, CountOutcome};
use crate::marks::LocalMarks;
use crate::paths;
use crate::queue::{FlushReport, OfflineQueue, QueuedComment};
use crate::search::filter_topics;
use crate::subscription::{self, Subscription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};
use yap_core::{ActionKind, Comment, CommentId, Reply, Result, Topic, TopicId};
use yap_storage::{DocumentStore, KeyValueStore};

/// How a comment submission ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Sent(Comment),
    /// Stored locally until the next flush
    Queued(QueuedComment),
}

/// An opened topic
#[derive(Debug, Clone)]
pub struct TopicView {
    pub topic: Topic,
    pub thread: Vec<CommentThread>,
    pub favorited: bool,
    /// `None` when the view could not be recorded
    pub view: Option<CountOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WatchKey {
    Topics,
    Comments(TopicId),
}

pub struct Board {
    identity: DeviceIdentity,
    kv: Arc<dyn KeyValueStore>,
    topics: TopicStore,
    ledger: ActionLedger,
    queue: Arc<OfflineQueue>,
    marks: LocalMarks,
    connectivity: Connectivity,
    config: BoardConfig,
    watchers: Mutex<HashMap<WatchKey, AbortHandle>>,
    opened: Mutex<Option<TopicId>>,
}

impl Board {
    /// Open the board for this device. `name` seeds the display name of a
    /// device that has none yet.
    pub fn open(
        store: Arc<dyn DocumentStore>,
        kv: Arc<dyn KeyValueStore>,
        config: BoardConfig,
        name: Option<&str>,
    ) -> Result<Self> {
        let identity = DeviceIdentity::load_or_init(kv.as_ref(), name)?;
        let topics = TopicStore::new(store.clone(), config.reply_mode);
        let ledger = ActionLedger::new(store, config.transactions.clone());
        let queue = Arc::new(OfflineQueue::load(kv.clone())?);
        let marks = LocalMarks::load(kv.clone())?;

        info!(
            device = %identity.device_id(),
            name = %identity.display_name(),
            queued = queue.len(),
            "Board opened"
        );

        Ok(Self {
            identity,
            kv,
            topics,
            ledger,
            queue,
            marks,
            connectivity: Connectivity::default(),
            config,
            watchers: Mutex::new(HashMap::new()),
            opened: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn topics(&self) -> &TopicStore {
        &self.topics
    }

    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn marks(&self) -> &LocalMarks {
        &self.marks
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Deliver queued comments whenever connectivity returns
    pub fn spawn_auto_flush(&self) -> JoinHandle<()> {
        self.queue
            .clone()
            .spawn_auto_flush(self.topics.clone(), self.connectivity.clone())
    }

    pub async fn list_topics(&self) -> Result<Vec<Topic>> {
        let topics = self.topics.list_topics().await?;
        if let Err(e) = self.marks.observe(&topics) {
            warn!(error = %e, "Could not update unread marks");
        }
        Ok(topics)
    }

    /// Listing filtered by a free-text query or by `unread`
    pub async fn search(&self, query: &str) -> Result<Vec<Topic>> {
        let topics = self.list_topics().await?;
        Ok(filter_topics(topics, query, |id| self.marks.is_unread(id)))
    }

    pub async fn create_topic(&self, title: &str, body: &str, keywords: &str) -> Result<Topic> {
        let topic = self.topics.create_topic(title, body, keywords).await?;
        if let Err(e) = self.marks.remember(&topic.id) {
            warn!(topic = %topic.id, error = %e, "Could not record own topic");
        }
        Ok(topic)
    }

    /// Open a topic: count the view, mark it read and load its thread.
    ///
    /// Opening a topic ends every comment subscription on other topics. A view that cannot be recorded does not stop the topic
    /// from opening; a missing topic does.
    pub async fn open_topic(&self, id: &TopicId) -> Result<TopicView> {
        let device = self.identity.device_id();

        let view = match self.ledger.ensure_counted(id, device, ActionKind::View).await {
            Ok(outcome) => Some(outcome),
            Err(e @ yap_core::Error::NotFound(_)) => return Err(e),
            Err(e) => {
                warn!(topic = %id, error = %e, "View not recorded");
                None
            }
        };

        let topic = self.topics.get_topic(id).await?;
        let thread = self.topics.load_thread(id).await?;
        let favorited = self.ledger.is_counted(id, device, ActionKind::Favorite).await?;

        if let Err(e) = self.marks.mark_read(id) {
            warn!(topic = %id, error = %e, "Could not clear unread mark");
        }
        if let Err(e) = self.marks.set_favorite(id, favorited) {
            warn!(topic = %id, error = %e, "Could not cache favorite mark");
        }

        *self.opened.lock() = Some(id.clone());
        self.detach_comments_except(id);

        Ok(TopicView {
            topic,
            thread,
            favorited,
            view,
        })
    }

    /// Stop following the opened topic
    pub fn close_topic(&self) {
        if let Some(previous) = self.opened.lock().take() {
            self.detach(&WatchKey::Comments(previous));
        }
    }

    pub async fn toggle_favorite(&self, id: &TopicId) -> Result<bool> {
        let favorited = self.ledger.toggle(id, self.identity.device_id()).await?;
        if let Err(e) = self.marks.set_favorite(id, favorited) {
            warn!(topic = %id, error = %e, "Could not cache favorite mark");
        }
        Ok(favorited)
    }

    /// Post a comment as this device, queueing it when the store is
    /// unreachable
    pub async fn submit_comment(
        &self,
        topic: &TopicId,
        text: &str,
        reference: Option<&str>,
    ) -> Result<Submission> {
        let name = self.identity.display_name();

        if !self.connectivity.is_online() {
            let queued = self.queue.enqueue(topic, name, text, reference)?;
            return Ok(Submission::Queued(queued));
        }

        match self.topics.add_comment(topic, name, text, reference).await {
            Ok(comment) => Ok(Submission::Sent(comment)),
            Err(e) if e.is_offline() => {
                warn!(topic = %topic, error = %e, "Store unreachable, queueing comment");
                let queued = self.queue.enqueue(topic, name, text, reference)?;
                Ok(Submission::Queued(queued))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn submit_reply(&self, topic: &TopicId, comment: &CommentId, text: &str) -> Result<Reply> {
        self.topics
            .add_reply(topic, comment, self.identity.display_name(), text)
            .await
    }

    pub async fn flush_queue(&self) -> Result<FlushReport> {
        self.queue.flush(&self.topics).await
    }

    /// Deliver queued comments once, unless offline or nothing is queued
    pub async fn flush_if_online(&self) -> Result<Option<FlushReport>> {
        if !self.connectivity.is_online() || self.queue.is_empty() {
            return Ok(None);
        }
        self.flush_queue().await.map(Some)
    }

    pub fn rename(&mut self, name: &str) -> Result<()> {
        self.identity.rename(self.kv.as_ref(), name)
    }

    /// Live topic listing; replaces any earlier listing subscription
    pub fn watch_topics(&self) -> Result<Subscription<Topic>> {
        let scope = paths::topics()?;
        let topics = self.topics.clone();

        let sub = subscription::watch(
            self.topics.store(),
            self.config.subscription_buffer,
            move |path| scope.contains(path),
            move || {
                let topics = topics.clone();
                async move { topics.list_topics().await }
            },
        );
        self.attach(WatchKey::Topics, &sub);
        Ok(sub)
    }

    /// Live comment thread of one topic, replies included; replaces any
    /// earlier subscription for the same topic
    pub fn watch_comments(&self, topic: &TopicId) -> Result<Subscription<CommentThread>> {
        let scope = paths::comments(topic)?;
        let topics = self.topics.clone();
        let id = topic.clone();

        let sub = subscription::watch(
            self.topics.store(),
            self.config.subscription_buffer,
            move |path| scope.encloses(path),
            move || {
                let topics = topics.clone();
                let id = id.clone();
                async move { topics.load_thread(&id).await }
            },
        );
        self.attach(WatchKey::Comments(topic.clone()), &sub);
        Ok(sub)
    }

    /// Number of live subscriptions held by the board
    pub fn active_watchers(&self) -> usize {
        self.watchers
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn attach<T>(&self, key: WatchKey, sub: &Subscription<T>) {
        if let Some(previous) = self.watchers.lock().insert(key, sub.abort_handle()) {
            previous.abort();
        }
    }

    fn detach_comments_except(&self, keep: &TopicId) {
        self.watchers.lock().retain(|key, handle| match key {
            WatchKey::Comments(topic) if topic != keep => {
                handle.abort();
                false
            }
            _ => true,
        });
    }

    fn detach(&self, key: &WatchKey) {
        if let Some(handle) = self.watchers.lock().remove(key) {
            handle.abort();
        }
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        for (_, handle) in self.watchers.lock().drain() {
            handle.abort();
        }
    }
}

//! Device-local read and favorite marks
//!
//! Topics that show up in a listing for the first time are marked unread
//! until opened. The first listing on a device only records what exists.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use yap_core::{Result, Topic, TopicId};
use yap_storage::{KeyValueExt, KeyValueStore};

pub const UNREAD_KEY: &str = "unreadTopics";
pub const FAVORITES_KEY: &str = "favoriteTopics";
pub const KNOWN_KEY: &str = "knownTopics";

#[derive(Default)]
struct MarkState {
    unread: BTreeSet<TopicId>,
    favorites: BTreeSet<TopicId>,
    known: Option<BTreeSet<TopicId>>,
}

pub struct LocalMarks {
    kv: Arc<dyn KeyValueStore>,
    state: Mutex<MarkState>,
}

impl LocalMarks {
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let state = MarkState {
            unread: kv.get_json(UNREAD_KEY)?.unwrap_or_default(),
            favorites: kv.get_json(FAVORITES_KEY)?.unwrap_or_default(),
            known: kv.get_json(KNOWN_KEY)?,
        };
        Ok(Self {
            kv,
            state: Mutex::new(state),
        })
    }

    pub fn is_unread(&self, topic: &TopicId) -> bool {
        self.state.lock().unread.contains(topic)
    }

    pub fn is_favorite(&self, topic: &TopicId) -> bool {
        self.state.lock().favorites.contains(topic)
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().unread.len()
    }

    /// Note a listing; returns the topics that became unread
    pub fn observe(&self, topics: &[Topic]) -> Result<Vec<TopicId>> {
        let mut state = self.state.lock();

        let Some(known) = state.known.as_mut() else {
            state.known = Some(topics.iter().map(|t| t.id.clone()).collect());
            self.kv.set_json(KNOWN_KEY, &state.known)?;
            return Ok(Vec::new());
        };

        let fresh: Vec<TopicId> = topics
            .iter()
            .filter(|t| known.insert(t.id.clone()))
            .map(|t| t.id.clone())
            .collect();
        if fresh.is_empty() {
            return Ok(fresh);
        }

        state.unread.extend(fresh.iter().cloned());
        self.kv.set_json(KNOWN_KEY, &state.known)?;
        self.kv.set_json(UNREAD_KEY, &state.unread)?;
        Ok(fresh)
    }

    /// Record a topic this device created; it is never unread here
    pub fn remember(&self, topic: &TopicId) -> Result<()> {
        let mut state = self.state.lock();
        if state.known.get_or_insert_with(BTreeSet::new).insert(topic.clone()) {
            self.kv.set_json(KNOWN_KEY, &state.known)?;
        }
        Ok(())
    }

    pub fn mark_read(&self, topic: &TopicId) -> Result<()> {
        let mut state = self.state.lock();
        if state.unread.remove(topic) {
            self.kv.set_json(UNREAD_KEY, &state.unread)?;
        }
        Ok(())
    }

    pub fn set_favorite(&self, topic: &TopicId, favorite: bool) -> Result<()> {
        let mut state = self.state.lock();
        let changed = if favorite {
            state.favorites.insert(topic.clone())
        } else {
            state.favorites.remove(topic)
        };
        if changed {
            self.kv.set_json(FAVORITES_KEY, &state.favorites)?;
        }
        Ok(())
    }
}

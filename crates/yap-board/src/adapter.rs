//! Topic and comment persistence over a document store

use crate::config::ReplyMode;
use crate::paths;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use yap_core::fields::{CREATED_AT, FAVORITES_COUNT, REPLIES, VIEW_COUNT};
use yap_core::{
    topic_order, Comment, CommentId, Error, NewComment, NewTopic, Reply, ReplyId, Result, Topic,
    TopicId,
};
use yap_storage::{
    Direction, DocumentStore, Precondition, Query, Snapshot, StoreError, Write, WriteBatch,
};

/// A comment together with its replies in creation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    pub comment: Comment,
    pub replies: Vec<Reply>,
}

/// Reads and writes board records
#[derive(Clone)]
pub struct TopicStore {
    store: Arc<dyn DocumentStore>,
    reply_mode: ReplyMode,
}

impl TopicStore {
    pub fn new(store: Arc<dyn DocumentStore>, reply_mode: ReplyMode) -> Self {
        Self { store, reply_mode }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn reply_mode(&self) -> ReplyMode {
        self.reply_mode
    }

    /// All topics, most favorited first, then most viewed, then newest.
    ///
    /// When the backend has no compound index for that ordering, the topics
    /// are fetched newest first and sorted locally into the same order.
    pub async fn list_topics(&self) -> Result<Vec<Topic>> {
        let query = Query::new(paths::topics()?)
            .order_by(FAVORITES_COUNT, Direction::Descending)
            .order_by(VIEW_COUNT, Direction::Descending)
            .order_by(CREATED_AT, Direction::Descending);

        match self.store.query(&query).await {
            Ok(docs) => Ok(decode_all(&docs, |_| Vec::new())),
            Err(StoreError::IndexRequired(reason)) => {
                warn!(reason = %reason, "Compound topic index missing, sorting locally");
                let fallback =
                    Query::new(paths::topics()?).order_by(CREATED_AT, Direction::Descending);
                let docs = self.store.query(&fallback).await?;
                let mut topics: Vec<Topic> = decode_all(&docs, |_| Vec::new());
                topics.sort_by(topic_order);
                Ok(topics)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_topic(&self, id: &TopicId) -> Result<Topic> {
        let path = paths::topic(id)?;
        match self.store.get(&path).await? {
            Some(snapshot) => decode(&snapshot, &[]),
            None => Err(Error::NotFound(format!("topic {}", id))),
        }
    }

    /// Validate and store a new topic with both counters at zero
    pub async fn create_topic(&self, title: &str, body: &str, keywords: &str) -> Result<Topic> {
        let new = NewTopic::new(title, body, keywords)?;
        let data = to_document(&new)?;
        let path = self.store.add(&paths::topics()?, data).await?;
        let topic = new.into_topic(TopicId::new(path.id())?);

        info!(topic = %topic.id, keywords = topic.keywords.len(), "Topic created");
        Ok(topic)
    }

    /// Comments of a topic, oldest first
    pub async fn list_comments(&self, topic_id: &TopicId) -> Result<Vec<Comment>> {
        let query = Query::new(paths::comments(topic_id)?).order_by(CREATED_AT, Direction::Ascending);
        let docs = self.store.query(&query).await?;
        Ok(decode_all(&docs, |_| vec![("topicId", topic_id.to_string())]))
    }

    /// Store a comment; fails with `NotFound` when the topic is gone
    pub async fn add_comment(
        &self,
        topic_id: &TopicId,
        user_name: &str,
        text: &str,
        reference: Option<&str>,
    ) -> Result<Comment> {
        let new = NewComment::new(user_name, text, reference)?;
        self.insert_comment(topic_id, new).await
    }

    /// Store an already validated comment as is
    pub async fn insert_comment(&self, topic_id: &TopicId, new: NewComment) -> Result<Comment> {
        let path = paths::comments(topic_id)?.auto_doc();

        let batch = WriteBatch::new()
            .precondition(Precondition::exists(paths::topic(topic_id)?))
            .write(Write::Set {
                path: path.clone(),
                data: to_document(&new)?,
            });
        self.store.commit(batch).await?;

        debug!(topic = %topic_id, comment = %path.id(), "Comment stored");
        Ok(new.into_comment(CommentId::new(path.id())?, topic_id.clone()))
    }

    /// Store a reply under a comment according to the configured reply mode
    pub async fn add_reply(
        &self,
        topic_id: &TopicId,
        comment_id: &CommentId,
        user_name: &str,
        text: &str,
    ) -> Result<Reply> {
        let mut reply = Reply::new(user_name, text)?;
        let comment_path = paths::comment(topic_id, comment_id)?;

        let batch = match self.reply_mode {
            ReplyMode::Embedded => WriteBatch::new().write(Write::ArrayUnion {
                path: comment_path,
                field: REPLIES.to_string(),
                values: vec![to_document(&reply)?],
            }),
            ReplyMode::Subcollection => {
                let path = paths::replies(topic_id, comment_id)?.auto_doc();
                reply.id = Some(ReplyId::new(path.id())?);
                WriteBatch::new()
                    .precondition(Precondition::exists(comment_path))
                    .write(Write::Set {
                        path,
                        data: to_document(&reply)?,
                    })
            }
        };
        self.store.commit(batch).await?;

        debug!(topic = %topic_id, comment = %comment_id, mode = ?self.reply_mode, "Reply stored");
        Ok(reply)
    }

    /// Replies of one comment in creation order
    pub async fn list_replies(&self, topic_id: &TopicId, comment_id: &CommentId) -> Result<Vec<Reply>> {
        match self.reply_mode {
            ReplyMode::Embedded => {
                let path = paths::comment(topic_id, comment_id)?;
                let snapshot = self
                    .store
                    .get(&path)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("comment {}", path)))?;
                let comment: Comment = decode(&snapshot, &[("topicId", topic_id.to_string())])?;
                Ok(comment.replies)
            }
            ReplyMode::Subcollection => {
                let query = Query::new(paths::replies(topic_id, comment_id)?)
                    .order_by(CREATED_AT, Direction::Ascending);
                let docs = self.store.query(&query).await?;
                Ok(decode_all(&docs, |_| Vec::new()))
            }
        }
    }

    /// Every comment of a topic with its replies
    pub async fn load_thread(&self, topic_id: &TopicId) -> Result<Vec<CommentThread>> {
        let comments = self.list_comments(topic_id).await?;
        let mut thread = Vec::with_capacity(comments.len());

        for mut comment in comments {
            let replies = match self.reply_mode {
                ReplyMode::Embedded => std::mem::take(&mut comment.replies),
                ReplyMode::Subcollection => self.list_replies(topic_id, &comment.id).await?,
            };
            thread.push(CommentThread { comment, replies });
        }

        Ok(thread)
    }

    /// Number of comments plus replies on a topic
    pub async fn count_comments(&self, topic_id: &TopicId) -> Result<usize> {
        let thread = self.load_thread(topic_id).await?;
        Ok(thread.iter().map(|t| 1 + t.replies.len()).sum())
    }
}

pub(crate) fn to_document<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Store(format!("serialization: {}", e)))
}

/// Decode a document, injecting its id and any path-derived fields
pub(crate) fn decode<T: DeserializeOwned>(snapshot: &Snapshot, extra: &[(&str, String)]) -> Result<T> {
    let mut data = snapshot.data.clone();
    let Some(fields) = data.as_object_mut() else {
        return Err(Error::Malformed {
            path: snapshot.path.to_string(),
            reason: "document body is not an object".to_string(),
        });
    };

    fields.insert("id".to_string(), Value::String(snapshot.id().to_string()));
    for (key, value) in extra {
        fields.insert(key.to_string(), Value::String(value.clone()));
    }

    serde_json::from_value(data).map_err(|e| Error::Malformed {
        path: snapshot.path.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a query result, skipping documents that do not fit the record
fn decode_all<T, F>(docs: &[Snapshot], extra: F) -> Vec<T>
where
    T: DeserializeOwned,
    F: Fn(&Snapshot) -> Vec<(&'static str, String)>,
{
    docs.iter()
        .filter_map(|snapshot| match decode(snapshot, &extra(snapshot)) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping malformed document");
                None
            }
        })
        .collect()
}

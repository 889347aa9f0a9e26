//! Document layout of the board inside the store
//!
//! ```text
//! topics/{topic}
//! topics/{topic}/comments/{comment}
//! topics/{topic}/comments/{comment}/replies/{reply}
//! topics/{topic}/views/{device}
//! topics/{topic}/favorites/{device}
//! ```

use yap_core::{ActionKind, CommentId, DeviceId, Result, TopicId};
use yap_storage::{CollectionPath, DocPath};

pub const TOPICS: &str = "topics";
pub const COMMENTS: &str = "comments";
pub const REPLIES: &str = "replies";

pub fn topics() -> Result<CollectionPath> {
    Ok(CollectionPath::new(TOPICS)?)
}

pub fn topic(id: &TopicId) -> Result<DocPath> {
    Ok(topics()?.doc(id.as_str())?)
}

pub fn comments(topic_id: &TopicId) -> Result<CollectionPath> {
    Ok(topic(topic_id)?.child(COMMENTS)?)
}

pub fn comment(topic_id: &TopicId, id: &CommentId) -> Result<DocPath> {
    Ok(comments(topic_id)?.doc(id.as_str())?)
}

pub fn replies(topic_id: &TopicId, comment_id: &CommentId) -> Result<CollectionPath> {
    Ok(comment(topic_id, comment_id)?.child(REPLIES)?)
}

/// Marker recording that `device` performed `kind` on the topic
pub fn marker(topic_id: &TopicId, device: &DeviceId, kind: ActionKind) -> Result<DocPath> {
    Ok(topic(topic_id)?.child(kind.collection())?.doc(device.as_str())?)
}

//! Yap Core - discussion board domain model
//!
//! This crate provides the types every other Yap crate speaks:
//! - Validated identifiers for topics, comments, replies and devices
//! - Topic, comment, reply and device-marker records
//! - Keyword normalisation and the topic popularity ordering

pub mod comment;
pub mod error;
pub mod ids;
pub mod marker;
pub mod topic;

pub use comment::{Comment, NewComment, Reply};
pub use error::{Error, Result};
pub use ids::{CommentId, DeviceId, ReplyId, Timestamp, TopicId};
pub use marker::{ActionKind, ActionMarker};
pub use topic::{normalize_keywords, topic_order, NewTopic, Topic};

/// Document field names shared by the store adapter and the query layer
pub mod fields {
    pub const CREATED_AT: &str = "createdAt";
    pub const VIEW_COUNT: &str = "viewCount";
    pub const FAVORITES_COUNT: &str = "favoritesCount";
    pub const REPLIES: &str = "replies";
}

/// Trim a required text field, rejecting it when nothing is left
pub fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

//! Comment and reply records

use crate::error::Result;
use crate::ids::{CommentId, ReplyId, Timestamp, TopicId};
use crate::require_text;
use serde::{Deserialize, Serialize};

/// A comment on a topic.
///
/// `id` and `topic_id` come from the document path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(skip_serializing)]
    pub id: CommentId,
    #[serde(skip_serializing)]
    pub topic_id: TopicId,
    pub user_name: String,
    pub text: String,
    pub created_at: Timestamp,
    /// Quoted excerpt of the topic body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Replies stored inside the comment document (embedded reply mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Reply>,
}

/// A validated comment submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub user_name: String,
    pub text: String,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl NewComment {
    pub fn new(user_name: &str, text: &str, reference: Option<&str>) -> Result<Self> {
        Ok(Self {
            user_name: user_name.trim().to_string(),
            text: require_text("comment", text)?,
            created_at: Timestamp::now(),
            reference: reference
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from),
        })
    }

    pub fn into_comment(self, id: CommentId, topic_id: TopicId) -> Comment {
        Comment {
            id,
            topic_id,
            user_name: self.user_name,
            text: self.text,
            created_at: self.created_at,
            reference: self.reference,
            replies: Vec::new(),
        }
    }
}

/// A reply to a comment.
///
/// Replies embedded in the comment document carry no id; two embedded
/// replies with the same author, text and instant are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(default, skip_serializing)]
    pub id: Option<ReplyId>,
    pub user_name: String,
    pub text: String,
    pub created_at: Timestamp,
}

impl Reply {
    pub fn new(user_name: &str, text: &str) -> Result<Self> {
        Ok(Self {
            id: None,
            user_name: user_name.trim().to_string(),
            text: require_text("reply", text)?,
            created_at: Timestamp::now(),
        })
    }
}

//! Topic records and ordering

use crate::error::Result;
use crate::ids::{Timestamp, TopicId};
use crate::require_text;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A discussion thread.
///
/// Title, body and keywords never change after creation; only the two
/// counters move, and only through the action ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Taken from the document path, never stored in the document body
    #[serde(skip_serializing)]
    pub id: TopicId,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub favorites_count: u64,
}

/// A validated topic submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTopic {
    pub title: String,
    pub body: String,
    pub keywords: Vec<String>,
    pub created_at: Timestamp,
    pub view_count: u64,
    pub favorites_count: u64,
}

impl NewTopic {
    /// Validate user input; `keywords` is the raw comma-separated field
    pub fn new(title: &str, body: &str, keywords: &str) -> Result<Self> {
        Ok(Self {
            title: require_text("title", title)?,
            body: require_text("body", body)?,
            keywords: normalize_keywords(keywords),
            created_at: Timestamp::now(),
            view_count: 0,
            favorites_count: 0,
        })
    }

    pub fn into_topic(self, id: TopicId) -> Topic {
        Topic {
            id,
            title: self.title,
            body: self.body,
            keywords: self.keywords,
            created_at: self.created_at,
            view_count: self.view_count,
            favorites_count: self.favorites_count,
        }
    }
}

/// Split a comma-separated keyword field.
///
/// Entries are trimmed and empty ones dropped. Repeated keywords are kept
/// in position: `"cute, , cute"` yields `["cute", "cute"]`.
pub fn normalize_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Listing order: most favorited, then most viewed, then newest.
/// Ties fall back to the topic id so the order is total.
pub fn topic_order(a: &Topic, b: &Topic) -> Ordering {
    b.favorites_count
        .cmp(&a.favorites_count)
        .then_with(|| b.view_count.cmp(&a.view_count))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn topic(id: &str, favs: u64, views: u64, created: u64) -> Topic {
        Topic {
            id: TopicId::new(id).unwrap(),
            title: id.to_string(),
            body: "body".into(),
            keywords: vec![],
            created_at: Timestamp(created),
            view_count: views,
            favorites_count: favs,
        }
    }

    #[test]
    fn test_keywords_keep_repeats() {
        assert_eq!(normalize_keywords("cute, , cute"), vec!["cute", "cute"]);
        assert_eq!(normalize_keywords(" rust ,async,, "), vec!["rust", "async"]);
        assert!(normalize_keywords("").is_empty());
        assert!(normalize_keywords(" , ,").is_empty());
    }

    #[test]
    fn test_new_topic_validation() {
        let t = NewTopic::new("Cats", "Meow", "cute, , cute").unwrap();
        assert_eq!(t.title, "Cats");
        assert_eq!(t.keywords, vec!["cute", "cute"]);
        assert_eq!(t.view_count, 0);
        assert_eq!(t.favorites_count, 0);

        assert!(matches!(NewTopic::new(" ", "Meow", ""), Err(Error::Validation(_))));
        assert!(matches!(NewTopic::new("Cats", "", ""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_topic_order() {
        let mut topics = vec![
            topic("a", 0, 10, 300),
            topic("b", 2, 0, 100),
            topic("c", 0, 10, 400),
            topic("d", 2, 5, 50),
            topic("e", 0, 10, 400),
        ];
        topics.sort_by(topic_order);

        let ids: Vec<&str> = topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b", "c", "e", "a"]);
    }

    #[test]
    fn test_topic_document_shape() {
        let t = topic("t1", 1, 2, 3);
        let json = serde_json::to_value(&t).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["favoritesCount"], 1);
        assert_eq!(json["viewCount"], 2);
        assert_eq!(json["createdAt"], 3);
    }

    #[test]
    fn test_missing_counters_default_to_zero() {
        let json = serde_json::json!({
            "id": "t1",
            "title": "Old",
            "body": "From before favorites existed",
            "createdAt": 5,
        });
        let t: Topic = serde_json::from_value(json).unwrap();
        assert_eq!(t.favorites_count, 0);
        assert_eq!(t.view_count, 0);
        assert!(t.keywords.is_empty());
    }
}

//! Topic search

use yap_core::{Topic, TopicId};

/// Query that selects unread topics instead of matching text
pub const UNREAD_QUERY: &str = "unread";

/// Filter a topic listing, keeping its order.
///
/// An empty query keeps everything. Otherwise a topic matches when the
/// query occurs, ignoring case, in its title, its body or one of its
/// keywords.
pub fn filter_topics<F>(topics: Vec<Topic>, query: &str, is_unread: F) -> Vec<Topic>
where
    F: Fn(&TopicId) -> bool,
{
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return topics;
    }
    if needle == UNREAD_QUERY {
        return topics.into_iter().filter(|t| is_unread(&t.id)).collect();
    }

    topics
        .into_iter()
        .filter(|t| {
            t.title.to_lowercase().contains(&needle)
                || t.body.to_lowercase().contains(&needle)
                || t.keywords.iter().any(|k| k.to_lowercase().contains(&needle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use yap_core::Timestamp;

    fn topic(id: &str, title: &str, body: &str, keywords: &[&str]) -> Topic {
        Topic {
            id: TopicId::new(id).unwrap(),
            title: title.to_string(),
            body: body.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            created_at: Timestamp(0),
            view_count: 0,
            favorites_count: 0,
        }
    }

    fn sample() -> Vec<Topic> {
        vec![
            topic("a", "Cats", "Tell me about cats", &["pets"]),
            topic("b", "Rust", "Borrow checker woes", &["code"]),
            topic("c", "Dogs", "Good boys", &["Pets", "walks"]),
        ]
    }

    fn ids(topics: &[Topic]) -> Vec<&str> {
        topics.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_empty_query_keeps_all() {
        assert_eq!(ids(&filter_topics(sample(), "  ", |_| false)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_matches_keywords_ignoring_case() {
        assert_eq!(ids(&filter_topics(sample(), "PETS", |_| false)), vec!["a", "c"]);
        assert_eq!(ids(&filter_topics(sample(), "borrow", |_| false)), vec!["b"]);
    }

    #[test]
    fn test_unread_query() {
        let result = filter_topics(sample(), "Unread", |id| id.as_str() == "b");
        assert_eq!(ids(&result), vec!["b"]);
    }
}

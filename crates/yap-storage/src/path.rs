//! Collection and document paths
//!
//! Paths alternate collection and document segments:
//! `topics` is a collection, `topics/t1` a document,
//! `topics/t1/comments` a nested collection.

use crate::StoreError;
use yap_core::ids::validate_segment;

fn parse_segments(path: &str, documents: bool) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('/').collect();

    for segment in &segments {
        validate_segment(segment)
            .map_err(|reason| StoreError::InvalidPath(format!("{}: {}", path, reason)))?;
    }

    let expected_even = documents;
    if (segments.len() % 2 == 0) != expected_even {
        let kind = if documents { "document" } else { "collection" };
        return Err(StoreError::InvalidPath(format!(
            "{} has the wrong number of segments for a {} path",
            path, kind
        )));
    }

    Ok(())
}

/// Path to a collection of documents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        parse_segments(&path, false)?;
        Ok(Self(path))
    }

    /// Document with the given id inside this collection
    pub fn doc(&self, id: &str) -> Result<DocPath, StoreError> {
        DocPath::new(format!("{}/{}", self.0, id))
    }

    /// Document with a freshly generated id
    pub fn auto_doc(&self) -> DocPath {
        DocPath(format!("{}/{}", self.0, uuid::Uuid::new_v4().simple()))
    }

    /// Last segment, shared by every collection of the same kind
    pub fn group(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `doc` sits directly in this collection
    pub fn contains(&self, doc: &DocPath) -> bool {
        doc.collection_str() == self.0
    }

    /// Whether `doc` sits in this collection or anywhere below it
    pub fn encloses(&self, doc: &DocPath) -> bool {
        doc.0
            .strip_prefix(&self.0)
            .map_or(false, |rest| rest.starts_with('/'))
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Path to a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        parse_segments(&path, true)?;
        Ok(Self(path))
    }

    /// Document id (last segment)
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection holding this document
    pub fn collection(&self) -> CollectionPath {
        CollectionPath(self.collection_str().to_string())
    }

    /// Nested collection below this document
    pub fn child(&self, name: &str) -> Result<CollectionPath, StoreError> {
        CollectionPath::new(format!("{}/{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn collection_str(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(parent, _)| parent)
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_shapes() {
        assert!(CollectionPath::new("topics").is_ok());
        assert!(CollectionPath::new("topics/t1/comments").is_ok());
        assert!(CollectionPath::new("topics/t1").is_err());
        assert!(DocPath::new("topics/t1").is_ok());
        assert!(DocPath::new("topics").is_err());
        assert!(DocPath::new("topics//t1").is_err());
        assert!(DocPath::new("topics/t 1").is_err());
    }

    #[test]
    fn test_navigation() {
        let topics = CollectionPath::new("topics").unwrap();
        let topic = topics.doc("t1").unwrap();
        assert_eq!(topic.id(), "t1");
        assert_eq!(topic.collection(), topics);

        let comments = topic.child("comments").unwrap();
        assert_eq!(comments.as_str(), "topics/t1/comments");
        assert_eq!(comments.group(), "comments");

        let comment = comments.doc("c1").unwrap();
        let reply = comment.child("replies").unwrap().doc("r1").unwrap();

        assert!(comments.contains(&comment));
        assert!(!comments.contains(&reply));
        assert!(comments.encloses(&reply));
        assert!(!topics.contains(&comment));
    }

    #[test]
    fn test_encloses_requires_segment_boundary() {
        let comments = CollectionPath::new("topics/t1/comments").unwrap();
        let other = DocPath::new("topics/t1/commentsx/c1").unwrap();
        assert!(!comments.encloses(&other));
    }

    #[test]
    fn test_auto_doc_is_valid() {
        let topics = CollectionPath::new("topics").unwrap();
        let doc = topics.auto_doc();
        assert!(DocPath::new(doc.as_str()).is_ok());
        assert!(topics.contains(&doc));
    }
}

//! In-memory document store

use crate::{
    ChangeEvent, ChangeKind, DocPath, DocumentStore, Expect, OrderBy, Query, Snapshot, StoreError,
    WriteBatch, CHANGE_CHANNEL_CAPACITY,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

struct StoredDoc {
    version: u64,
    data: Value,
}

#[derive(Default)]
struct State {
    docs: BTreeMap<DocPath, StoredDoc>,
    /// Last version handed out; versions never repeat, even across deletes
    clock: u64,
}

/// In-memory document store
///
/// Fast, volatile storage suitable for development and tests.
/// Data is lost when the process exits. Commits are serialized behind a
/// single lock, so a batch is applied entirely or not at all.
///
/// Two switches exist for exercising failure paths: the store can be taken
/// offline, and the next N transactional commits can be forced to conflict.
pub struct MemoryStore {
    state: Mutex<State>,
    enforce_indexes: bool,
    /// Registered composite indexes: (collection group, sort keys)
    indexes: RwLock<HashSet<(String, Vec<OrderBy>)>>,
    online: AtomicBool,
    injected_conflicts: AtomicU32,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    /// A store that serves every ordering
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A store that refuses compound orderings without a registered index
    pub fn with_index_enforcement() -> Self {
        Self::build(true)
    }

    fn build(enforce_indexes: bool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            state: Mutex::new(State::default()),
            enforce_indexes,
            indexes: RwLock::new(HashSet::new()),
            online: AtomicBool::new(true),
            injected_conflicts: AtomicU32::new(0),
            changes,
        }
    }

    /// Register a composite index for every collection named `group`
    pub fn add_index(&self, group: &str, order_by: &[OrderBy]) {
        self.indexes
            .write()
            .insert((group.to_string(), order_by.to_vec()));
    }

    /// Simulate losing or regaining the connection to the store
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Make the next `n` transactional commits fail with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().docs.len()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        self.ensure_online()?;

        let state = self.state.lock();
        Ok(state.docs.get(path).map(|doc| Snapshot {
            path: path.clone(),
            version: doc.version,
            data: doc.data.clone(),
        }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        self.ensure_online()?;
        query.validate()?;

        if self.enforce_indexes && query.is_compound() {
            let key = (query.collection.group().to_string(), query.order_by.clone());
            if !self.indexes.read().contains(&key) {
                return Err(StoreError::IndexRequired(format!(
                    "{} ordered by {:?}",
                    query.collection, query.order_by
                )));
            }
        }

        let mut docs: Vec<Snapshot> = {
            let state = self.state.lock();
            state
                .docs
                .iter()
                .filter(|(path, _)| query.collection.contains(path))
                .map(|(path, doc)| Snapshot {
                    path: path.clone(),
                    version: doc.version,
                    data: doc.data.clone(),
                })
                .collect()
        };

        query.sort(&mut docs);
        Ok(docs)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.ensure_online()?;

        let transactional = batch
            .preconditions
            .iter()
            .any(|p| matches!(p.expect, Expect::Version(_)));
        if transactional && self.take_injected_conflict() {
            debug!("Injected commit conflict");
            return Err(StoreError::Conflict("injected".into()));
        }

        let events = {
            let mut state = self.state.lock();

            for precondition in &batch.preconditions {
                let current = state.docs.get(&precondition.path).map(|d| d.version);
                precondition.check(current)?;
            }

            // Stage every write first so a failing write leaves nothing behind
            let mut staged: BTreeMap<DocPath, Option<Value>> = BTreeMap::new();
            for write in &batch.writes {
                let path = write.path();
                let current = match staged.get(path) {
                    Some(doc) => doc.clone(),
                    None => state.docs.get(path).map(|d| d.data.clone()),
                };
                let next = write.apply(current)?;
                staged.insert(path.clone(), next);
            }

            let mut events = Vec::with_capacity(staged.len());
            for (path, next) in staged {
                match next {
                    Some(data) => {
                        state.clock += 1;
                        let version = state.clock;
                        let kind = if state.docs.contains_key(&path) {
                            ChangeKind::Modified
                        } else {
                            ChangeKind::Added
                        };
                        state.docs.insert(path.clone(), StoredDoc { version, data });
                        events.push(ChangeEvent { path, kind });
                    }
                    None => {
                        if state.docs.remove(&path).is_some() {
                            events.push(ChangeEvent {
                                path,
                                kind: ChangeKind::Removed,
                            });
                        }
                    }
                }
            }
            events
        };

        for event in events {
            let _ = self.changes.send(event);
        }

        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollectionPath, Direction, Precondition, Write};
    use serde_json::json;

    fn topics() -> CollectionPath {
        CollectionPath::new("topics").unwrap()
    }

    async fn put(store: &MemoryStore, id: &str, data: Value) -> DocPath {
        let path = topics().doc(id).unwrap();
        store
            .commit(WriteBatch::new().write(Write::Set { path: path.clone(), data }))
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        let path = put(&store, "t1", json!({"title": "hello"})).await;

        let snap = store.get(&path).await.unwrap().unwrap();
        assert_eq!(snap.data["title"], "hello");
        assert_eq!(snap.id(), "t1");
        assert!(store.get(&topics().doc("nope").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_versions_increase() {
        let store = MemoryStore::new();
        let path = put(&store, "t1", json!({"n": 1})).await;
        let v1 = store.get(&path).await.unwrap().unwrap().version;
        put(&store, "t1", json!({"n": 2})).await;
        let v2 = store.get(&path).await.unwrap().unwrap().version;
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_nothing() {
        let store = MemoryStore::new();
        let a = topics().doc("a").unwrap();
        let missing = topics().doc("missing").unwrap();

        let batch = WriteBatch::new()
            .write(Write::Set { path: a.clone(), data: json!({"n": 1}) })
            .write(Write::Increment { path: missing, field: "n".into(), by: 1 });

        assert!(matches!(store.commit(batch).await, Err(StoreError::NotFound(_))));
        assert!(store.get(&a).await.unwrap().is_none());
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn test_query_scopes_to_collection() {
        let store = MemoryStore::new();
        put(&store, "t1", json!({"createdAt": 1})).await;
        put(&store, "t2", json!({"createdAt": 2})).await;
        let comments = topics().doc("t1").unwrap().child("comments").unwrap();
        store.add(&comments, json!({"createdAt": 3})).await.unwrap();

        let query = Query::new(topics()).order_by("createdAt", Direction::Descending);
        let docs = store.query(&query).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["t2", "t1"]);

        let docs = store.query(&Query::new(comments)).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_index_enforcement() {
        let store = MemoryStore::with_index_enforcement();
        put(&store, "t1", json!({"a": 1, "b": 2})).await;

        let compound = Query::new(topics())
            .order_by("a", Direction::Descending)
            .order_by("b", Direction::Descending);
        assert!(matches!(store.query(&compound).await, Err(StoreError::IndexRequired(_))));

        let single = Query::new(topics()).order_by("a", Direction::Descending);
        assert!(store.query(&single).await.is_ok());

        store.add_index("topics", &compound.order_by);
        assert_eq!(store.query(&compound).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline() {
        let store = MemoryStore::new();
        store.set_online(false);
        let err = store.get(&topics().doc("t1").unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_online(true);
        assert!(store.get(&topics().doc("t1").unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_conflicts_only_hit_transactions() {
        let store = MemoryStore::new();
        let path = put(&store, "t1", json!({"n": 0})).await;
        store.inject_conflicts(1);

        // Plain writes are unaffected
        let plain = WriteBatch::new().write(Write::Increment { path: path.clone(), field: "n".into(), by: 1 });
        store.commit(plain).await.unwrap();

        let guarded = |v| {
            WriteBatch::new()
                .precondition(Precondition::version(path.clone(), Some(v)))
                .write(Write::Increment { path: path.clone(), field: "n".into(), by: 1 })
        };
        let version = store.get(&path).await.unwrap().unwrap().version;
        assert!(matches!(store.commit(guarded(version)).await, Err(StoreError::Conflict(_))));
        store.commit(guarded(version)).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap().unwrap().data["n"], 2);
    }

    #[tokio::test]
    async fn test_watch_reports_changes() {
        let store = MemoryStore::new();
        let mut rx = store.watch();

        let path = put(&store, "t1", json!({"n": 0})).await;
        put(&store, "t1", json!({"n": 1})).await;
        store
            .commit(WriteBatch::new().write(Write::Delete { path: path.clone() }))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), ChangeEvent { path: path.clone(), kind: ChangeKind::Added });
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent { path: path.clone(), kind: ChangeKind::Modified });
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent { path, kind: ChangeKind::Removed });
    }

    #[tokio::test]
    async fn test_add_generates_distinct_ids() {
        let store = MemoryStore::new();
        let a = store.add(&topics(), json!({})).await.unwrap();
        let b = store.add(&topics(), json!({})).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.document_count(), 2);
    }
}

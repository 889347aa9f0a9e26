//! Behaviour every document store backend must share

use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use yap_storage::{
    run_transaction, ChangeKind, CollectionPath, Direction, DocPath, DocumentStore, MemoryStore,
    Precondition, Query, RetryPolicy, StoreError, Transaction, Write, WriteBatch,
};

fn backends() -> Vec<(&'static str, Arc<dyn DocumentStore>)> {
    let mut stores: Vec<(&'static str, Arc<dyn DocumentStore>)> =
        vec![("memory", Arc::new(MemoryStore::new()))];
    #[cfg(feature = "sqlite")]
    stores.push(("sqlite", Arc::new(yap_storage::SqliteStore::in_memory().unwrap())));
    stores
}

fn doc(path: &str) -> DocPath {
    DocPath::new(path).unwrap()
}

async fn set(store: &dyn DocumentStore, path: &str, data: serde_json::Value) {
    store
        .commit(WriteBatch::new().write(Write::Set { path: doc(path), data }))
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_precondition_applies_nothing() {
    for (name, store) in backends() {
        set(store.as_ref(), "topics/t", json!({"n": 1})).await;

        let batch = WriteBatch::new()
            .precondition(Precondition::exists(doc("topics/missing")))
            .write(Write::Increment {
                path: doc("topics/t"),
                field: "n".into(),
                by: 1,
            });
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)), "{}", name);

        let after = store.get(&doc("topics/t")).await.unwrap().unwrap();
        assert_eq!(after.data["n"], 1, "{}", name);
    }
}

#[tokio::test]
async fn failing_write_rolls_back_earlier_writes() {
    for (name, store) in backends() {
        let batch = WriteBatch::new()
            .write(Write::Set {
                path: doc("topics/a"),
                data: json!({"title": "a"}),
            })
            .write(Write::Increment {
                path: doc("topics/missing"),
                field: "n".into(),
                by: 1,
            });
        assert!(store.commit(batch).await.is_err(), "{}", name);
        assert!(store.get(&doc("topics/a")).await.unwrap().is_none(), "{}", name);
    }
}

#[tokio::test]
async fn compound_order_breaks_ties_by_id() {
    for (name, store) in backends() {
        set(store.as_ref(), "topics/b", json!({"f": 1, "v": 2})).await;
        set(store.as_ref(), "topics/a", json!({"f": 1, "v": 2})).await;
        set(store.as_ref(), "topics/c", json!({"f": 3, "v": 0})).await;
        set(store.as_ref(), "topics/c/views/d1", json!({})).await;

        let query = Query::new(CollectionPath::new("topics").unwrap())
            .order_by("f", Direction::Descending)
            .order_by("v", Direction::Descending);
        let docs = store.query(&query).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"], "{}", name);
    }
}

#[tokio::test]
async fn watch_reports_each_change() {
    for (name, store) in backends() {
        let mut changes = store.watch();

        set(store.as_ref(), "topics/t", json!({})).await;
        set(store.as_ref(), "topics/t", json!({"x": 1})).await;
        store
            .commit(WriteBatch::new().write(Write::Delete { path: doc("topics/t") }))
            .await
            .unwrap();

        let kinds: Vec<ChangeKind> = vec![
            changes.recv().await.unwrap().kind,
            changes.recv().await.unwrap().kind,
            changes.recv().await.unwrap().kind,
        ];
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed],
            "{}",
            name
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transactions_lose_no_updates() {
    const WRITERS: u64 = 16;

    for (name, store) in backends() {
        set(store.as_ref(), "counters/c", json!({"n": 0})).await;
        let policy = RetryPolicy {
            max_attempts: 200,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
        };

        let tasks = (0..WRITERS).map(|_| {
            let store = store.clone();
            let policy = policy.clone();
            tokio::spawn(async move {
                let path = doc("counters/c");
                run_transaction(&policy, || {
                    let store = store.clone();
                    let path = path.clone();
                    async move {
                        let mut txn = Transaction::new(store.as_ref());
                        let current = txn.get(&path).await?.map(|s| s.data["n"].as_u64().unwrap_or(0));
                        txn.set(path, json!({"n": current.unwrap_or(0) + 1}));
                        txn.commit().await?;
                        Ok::<_, StoreError>(())
                    }
                })
                .await
            })
        });

        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let counter = store.get(&doc("counters/c")).await.unwrap().unwrap();
        assert_eq!(counter.data["n"], WRITERS, "{}", name);
    }
}

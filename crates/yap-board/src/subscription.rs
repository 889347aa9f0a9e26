//! Live query subscriptions
//!
//! A subscription re-runs a query whenever a change lands under the
//! watched collection and delivers the full result each time. Bursts of
//! changes are coalesced into one reload.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};
use yap_core::Result;
use yap_storage::{DocPath, DocumentStore};

/// Stream of full result lists, one per relevant change.
///
/// Dropping or cancelling the subscription stops the watcher task.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Vec<T>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// Next snapshot of the result; `None` once the subscription has ended
    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.rx.recv().await
    }

    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `store`, calling `load` initially and after every change
/// for which `relevant` holds
pub fn watch<T, R, L, Fut>(
    store: &Arc<dyn DocumentStore>,
    buffer: usize,
    relevant: R,
    load: L,
) -> Subscription<T>
where
    T: Send + 'static,
    R: Fn(&DocPath) -> bool + Send + 'static,
    L: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
{
    // subscribe before the first load so no change slips in between
    let mut changes = store.watch();
    let (tx, rx) = mpsc::channel(buffer.max(1));

    let task = tokio::spawn(async move {
        if !deliver(&tx, load().await).await {
            return;
        }

        loop {
            match changes.recv().await {
                Ok(event) if relevant(&event.path) => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscription lagged, reloading");
                }
                Err(RecvError::Closed) => break,
            }

            loop {
                match changes.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }

            if !deliver(&tx, load().await).await {
                break;
            }
        }
        debug!("Subscription ended");
    });

    Subscription { rx, task }
}

/// Send a result downstream; false once nobody listens anymore
async fn deliver<T>(tx: &mpsc::Sender<Vec<T>>, result: Result<Vec<T>>) -> bool {
    match result {
        Ok(items) => tx.send(items).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Subscription reload failed");
            !tx.is_closed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use yap_storage::{CollectionPath, MemoryStore, Query, Write, WriteBatch};

    type Loading = std::pin::Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send>>;

    fn load_ids(store: Arc<dyn DocumentStore>, items: CollectionPath) -> impl Fn() -> Loading + Send + 'static {
        move || {
            let store = store.clone();
            let items = items.clone();
            Box::pin(async move {
                let docs = store.query(&Query::new(items)).await?;
                let ids: Vec<String> = docs.iter().map(|d| d.id().to_string()).collect();
                Ok::<_, yap_core::Error>(ids)
            })
        }
    }

    async fn put(store: &MemoryStore, path: &str) {
        store
            .commit(WriteBatch::new().write(Write::Set {
                path: DocPath::new(path).unwrap(),
                data: json!({}),
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delivers_initial_and_updates() {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        let items = CollectionPath::new("items").unwrap();
        let scope = items.clone();

        let mut sub = watch(&store, 4, move |p| scope.contains(p), load_ids(store.clone(), items));
        assert_eq!(sub.next().await.unwrap(), Vec::<String>::new());

        put(&memory, "items/a").await;
        assert_eq!(sub.next().await.unwrap(), vec!["a"]);

        // changes elsewhere do not wake the subscription
        put(&memory, "other/x").await;
        put(&memory, "items/b").await;
        assert_eq!(sub.next().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_the_watcher() {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        let items = CollectionPath::new("items").unwrap();
        let scope = items.clone();

        let mut sub = watch(&store, 4, move |p| scope.contains(p), load_ids(store.clone(), items));
        sub.next().await.unwrap();
        let handle = sub.abort_handle();
        sub.cancel();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
        put(&memory, "items/a").await;
    }
}

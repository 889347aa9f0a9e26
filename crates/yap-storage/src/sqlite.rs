//! SQLite storage backend

use crate::{
    ChangeEvent, ChangeKind, DocPath, DocumentStore, Direction, KeyValueStore,
    Query, Snapshot, StoreError, WriteBatch, CHANGE_CHANNEL_CAPACITY,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::broadcast;

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        path TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

    CREATE TABLE IF NOT EXISTS clock (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        value INTEGER NOT NULL
    );

    INSERT OR IGNORE INTO clock (id, value) VALUES (0, 0);

    CREATE TABLE IF NOT EXISTS local_kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

fn open_connection(path: Option<&Path>) -> Result<Connection, StoreError> {
    let conn = match path {
        Some(p) => Connection::open(p),
        None => Connection::open_in_memory(),
    }
    .map_err(db_err)?;

    conn.execute_batch(SCHEMA).map_err(db_err)?;
    Ok(conn)
}

/// SQLite document store
///
/// Embedded persistence for single-node setups. Each commit runs in one
/// SQLite transaction; versions come from a store-wide clock row so they
/// never repeat, even after a document is deleted and created again.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    /// Create a new SQLite store with the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::from_connection(open_connection(Some(path.as_ref()))?))
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(open_connection(None)?))
    }

    fn from_connection(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            changes,
        }
    }

    fn load(conn: &Connection, path: &DocPath) -> Result<Option<(u64, Value)>, StoreError> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, data FROM documents WHERE path = ?1",
                params![path.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        match row {
            Some((version, raw)) => {
                let data = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Serialization(format!("{}: {}", path, e)))?;
                Ok(Some((version as u64, data)))
            }
            None => Ok(None),
        }
    }

    fn tick(conn: &Connection) -> Result<u64, StoreError> {
        let value: i64 = conn
            .query_row(
                "UPDATE clock SET value = value + 1 WHERE id = 0 RETURNING value",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(value as u64)
    }

    fn apply_batch(conn: &mut Connection, batch: &WriteBatch) -> Result<Vec<ChangeEvent>, StoreError> {
        let tx = conn.transaction().map_err(db_err)?;

        for precondition in &batch.preconditions {
            let current = Self::load(&tx, &precondition.path)?.map(|(v, _)| v);
            precondition.check(current)?;
        }

        let mut staged: BTreeMap<DocPath, (bool, Option<Value>)> = BTreeMap::new();
        for write in &batch.writes {
            let path = write.path();
            let (existed, current) = match staged.remove(path) {
                Some((existed, doc)) => (existed, doc),
                None => {
                    let doc = Self::load(&tx, path)?.map(|(_, data)| data);
                    (doc.is_some(), doc)
                }
            };
            let next = write.apply(current)?;
            staged.insert(path.clone(), (existed, next));
        }

        let mut events = Vec::with_capacity(staged.len());
        for (path, (existed, next)) in staged {
            match next {
                Some(data) => {
                    let version = Self::tick(&tx)?;
                    let raw = serde_json::to_string(&data)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?;
                    tx.execute(
                        r#"
                        INSERT INTO documents (path, collection, doc_id, version, data)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT(path) DO UPDATE SET
                            version = excluded.version,
                            data = excluded.data
                        "#,
                        params![
                            path.as_str(),
                            path.collection().as_str(),
                            path.id(),
                            version as i64,
                            raw
                        ],
                    )
                    .map_err(db_err)?;
                    let kind = if existed { ChangeKind::Modified } else { ChangeKind::Added };
                    events.push(ChangeEvent { path, kind });
                }
                None => {
                    let affected = tx
                        .execute("DELETE FROM documents WHERE path = ?1", params![path.as_str()])
                        .map_err(db_err)?;
                    if affected > 0 {
                        events.push(ChangeEvent {
                            path,
                            kind: ChangeKind::Removed,
                        });
                    }
                }
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(events)
    }

    fn order_clause(query: &Query) -> String {
        let mut keys: Vec<String> = query
            .order_by
            .iter()
            .map(|key| {
                let dir = match key.direction {
                    Direction::Ascending => "ASC",
                    Direction::Descending => "DESC",
                };
                format!("json_extract(data, '$.{}') {}", key.field, dir)
            })
            .collect();
        keys.push("doc_id ASC".to_string());
        keys.join(", ")
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let conn = self.conn.lock();
        let doc = Self::load(&conn, path)?;
        Ok(doc.map(|(version, data)| Snapshot {
            path: path.clone(),
            version,
            data,
        }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        query.validate()?;

        // Field names are validated identifiers, safe to embed
        let sql = format!(
            "SELECT path, version, data FROM documents WHERE collection = ?1 ORDER BY {}",
            Self::order_clause(query)
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows: Vec<(String, i64, String)> = stmt
            .query_map(params![query.collection.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(db_err)?
            .collect::<Result<_, _>>()
            .map_err(db_err)?;

        rows.into_iter()
            .map(|(path, version, raw)| {
                let data = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Serialization(format!("{}: {}", path, e)))?;
                Ok(Snapshot {
                    path: DocPath::new(path)?,
                    version: version as u64,
                    data,
                })
            })
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let events = {
            let mut conn = self.conn.lock();
            Self::apply_batch(&mut conn, &batch)?
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

/// Key-value store in a SQLite table
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open_connection(Some(path.as_ref()))?),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open_connection(None)?),
        })
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn
            .lock()
            .query_row("SELECT value FROM local_kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(db_err)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO local_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM local_kv WHERE key = ?1", params![key])
            .map_err(db_err)?;
        Ok(())
    }
}

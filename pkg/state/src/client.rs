use pkg_constants::state::{EVENT_CHANNEL_CAPACITY, EVENT_LOG_CAPACITY};
use serde::Serialize;
use serde::de::DeserializeOwned;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::watch::{EventLog, EventType};

fn backend(op: &'static str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        op,
        message: e.to_string(),
    }
}

/// Persistent state store backed by SlateDB on a local filesystem.
/// Every mutation is recorded in the store's [`EventLog`].
#[derive(Clone)]
pub struct StateStore {
    db: Db,
    events: EventLog,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        info!("Opening SlateDB state store at {}", path);

        std::fs::create_dir_all(path).map_err(|e| StoreError::Backend {
            op: "create_dir",
            message: format!("{}: {}", path, e),
        })?;

        let object_store =
            Arc::new(LocalFileSystem::new_with_prefix(path).map_err(|e| backend("open", e))?);
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| backend("open", e))?;
        Ok(Self {
            db,
            events: EventLog::new(EVENT_LOG_CAPACITY, EVENT_CHANNEL_CAPACITY),
        })
    }

    /// The watch log fed by this store's mutations.
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    /// Store a value under the given key.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| backend("put", e))?;
        self.events
            .emit(EventType::Put, key.to_string(), Some(value.to_vec()))
            .await;
        Ok(())
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(backend("get", e)),
        }
    }

    /// Delete a key. Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let previous = self.get(key).await?;
        if previous.is_none() {
            return Ok(false);
        }
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| backend("delete", e))?;
        self.events
            .emit(EventType::Delete, key.to_string(), previous)
            .await;
        Ok(true)
    }

    /// List all key-value pairs whose keys start with `prefix`.
    /// Returns them as `(key_string, raw_bytes)`.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| backend("scan_prefix", e))?;

        while let Some(kv) = iter.next().await.map_err(|e| backend("scan_prefix", e))? {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    /// Serialize `value` as JSON and store it under `key`.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.put(key, &data).await
    }

    /// Fetch and decode the JSON value stored under `key`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Decode every JSON value under `prefix`. Fails on the first entry that
    /// does not decode.
    pub async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        self.list_prefix(prefix)
            .await?
            .into_iter()
            .map(|(key, value)| {
                serde_json::from_slice(&value).map_err(|source| StoreError::Decode { key, source })
            })
            .collect()
    }

    /// Like [`list_json`](Self::list_json), but entries that fail to decode
    /// are logged and skipped.
    pub async fn list_json_lossy<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<T>, StoreError> {
        let entries = self.list_prefix(prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_slice(&value) {
                Ok(obj) => Some(obj),
                Err(e) => {
                    warn!("Skipping undecodable entry {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> Result<(), StoreError> {
        info!("Closing SlateDB state store");
        self.db.close().await.map_err(|e| backend("close", e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::watch::EventType;

    pub(crate) fn temp_dir() -> String {
        std::env::temp_dir()
            .join(format!("authz-state-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string()
    }

    #[tokio::test]
    async fn test_put_get_delete_emit_events() {
        let store = StateStore::new(&temp_dir()).await.unwrap();
        let mut rx = store.events().subscribe();

        store
            .put_json("/registry/clusters/local", &serde_json::json!({ "name": "local" }))
            .await
            .unwrap();
        let value: Option<serde_json::Value> =
            store.get_json("/registry/clusters/local").await.unwrap();
        assert_eq!(value.unwrap()["name"], "local");

        assert!(store.delete("/registry/clusters/local").await.unwrap());
        assert!(!store.delete("/registry/clusters/local").await.unwrap());
        assert!(store.get("/registry/clusters/local").await.unwrap().is_none());

        let put = rx.recv().await.unwrap();
        assert_eq!(put.event_type, EventType::Put);
        let delete = rx.recv().await.unwrap();
        assert_eq!(delete.event_type, EventType::Delete);
        // Delete events carry the last stored value.
        let last: serde_json::Value = delete.decode().unwrap();
        assert_eq!(last["name"], "local");

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_json_rejects_garbage() {
        let store = StateStore::new(&temp_dir()).await.unwrap();
        store
            .put_json("/registry/clusters/a", &serde_json::json!({ "name": "a" }))
            .await
            .unwrap();
        store.put("/registry/clusters/b", b"not json").await.unwrap();
        store
            .put_json("/registry/globalroles/a", &serde_json::json!({ "name": "a" }))
            .await
            .unwrap();

        let err = store
            .list_json::<serde_json::Value>("/registry/clusters/")
            .await
            .unwrap_err();
        match err {
            StoreError::Decode { key, .. } => assert_eq!(key, "/registry/clusters/b"),
            other => panic!("expected decode error, got {other}"),
        }

        let clusters: Vec<serde_json::Value> =
            store.list_json_lossy("/registry/clusters/").await.unwrap();
        assert_eq!(clusters.len(), 1);
        store.close().await.unwrap();
    }
}

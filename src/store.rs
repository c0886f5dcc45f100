use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};

use crate::error::StoreError;

pub const ENABLED_KEY: &str = "extensionEnabled";
pub const PENDING_RESTORE_KEY: &str = "pendingRestore";

const CHANGE_CAPACITY: usize = 64;

pub fn autosave_key(url: &str) -> String {
    format!("autosave_{}", url)
}

/// A write or removal observed on the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<Value>,
}

pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>>;

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?).await
}

pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        MemoryStore {
            entries: Mutex::new(HashMap::new()),
            changes,
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `set` calls served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn notify(&self, key: &str, new_value: Option<Value>) {
        // Nobody listening is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
        });
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .insert(key.to_string(), value.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.notify(key, Some(value));
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if self.entries.lock().await.remove(key).is_some() {
                self.notify(key, None);
            }
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

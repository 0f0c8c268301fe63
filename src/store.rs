//! # Store
//!
//! Keyed application state with explicit persistence. The state itself lives
//! in memory; `save` / `load` copy single keys to and from a local
//! [`Storage`], `save_for_session` / `load_for_session` do the same against a
//! session [`Storage`]. Values travel through storage JSON-encoded.
//!
//! Stores are singletons per identifier, see [`Store::shared`].

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::registry::{Registry, RegistryResult};

/// Registry identifier of the default store.
pub const DEFAULT_STORE_NAME: &str = "_STORE";

/// String key/value storage backing a [`Store`].
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|item| item.value().clone())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Storage persisted as a single JSON object file. The whole file is
/// rewritten on every `set_item`.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut items = self.items.write();
        items.insert(key.to_string(), value.to_string());
        let content = serde_json::to_string_pretty(&*items).map_err(StoreError::Encode)?;
        fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        trace!(key, path = %self.path.display(), "Storage item written");
        Ok(())
    }
}

pub struct Store {
    state: RwLock<HashMap<String, Value>>,
    local: Arc<dyn Storage>,
    session: Arc<dyn Storage>,
}

impl Store {
    /// A store whose local and session storage are both in memory.
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()), Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(local: Arc<dyn Storage>, session: Arc<dyn Storage>) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            local,
            session,
        }
    }

    /// The store registered under `identifier`, created in memory on first
    /// access.
    pub fn shared(registry: &Registry, identifier: &str) -> RegistryResult<Arc<Self>> {
        registry.get_or_insert_with(identifier, Self::new)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.read().get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Typed read. `None` when unset or not a `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> &Self {
        self.state.write().insert(key.to_string(), value.into());
        self
    }

    /// Typed write.
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<&Self> {
        let value = serde_json::to_value(value).map_err(StoreError::Encode)?;
        Ok(self.set(key, value))
    }

    pub fn state(&self) -> HashMap<String, Value> {
        self.state.read().clone()
    }

    /// Writes `key` to local storage.
    pub fn save(&self, key: &str) -> StoreResult<&Self> {
        self.persist(key, self.local.as_ref())
    }

    /// Reads `key` from local storage. An absent or empty item sets
    /// `default`, or `null` without one.
    pub fn load(&self, key: &str, default: Option<Value>) -> StoreResult<&Self> {
        self.restore(key, self.local.as_ref(), default)
    }

    pub fn save_for_session(&self, key: &str) -> StoreResult<&Self> {
        self.persist(key, self.session.as_ref())
    }

    pub fn load_for_session(&self, key: &str, default: Option<Value>) -> StoreResult<&Self> {
        self.restore(key, self.session.as_ref(), default)
    }

    fn persist(&self, key: &str, storage: &dyn Storage) -> StoreResult<&Self> {
        let value = self.get(key).unwrap_or(Value::Null);
        let encoded = serde_json::to_string(&value).map_err(StoreError::Encode)?;
        storage.set_item(key, &encoded)?;
        debug!(key, "Store value saved");
        Ok(self)
    }

    fn restore(
        &self,
        key: &str,
        storage: &dyn Storage,
        default: Option<Value>,
    ) -> StoreResult<&Self> {
        let stored = match storage.get_item(key) {
            Some(item) if !item.is_empty() => {
                serde_json::from_str(&item).map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                })?
            }
            _ => Value::Null,
        };
        let value = match stored {
            Value::Null => default.unwrap_or(Value::Null),
            Value::String(s) if s.is_empty() => default.unwrap_or(Value::String(s)),
            stored => stored,
        };
        debug!(key, "Store value loaded");
        Ok(self.set(key, value))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.state.read().len())
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Storage file {} is not a JSON object of strings: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stored value for {key} is not valid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Value could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_fresh_store_is_empty() {
        let store = Store::new();
        assert!(store.state().is_empty());
        assert_eq!(store.get("foo"), None);
    }

    #[test]
    fn test_get_with_default() {
        let store = Store::new();
        assert_eq!(store.get_or("foo5", json!(0)), json!(0));
        store.set("foo5", 5);
        assert_eq!(store.get_or("foo5", json!(0)), json!(5));
    }

    #[test]
    fn test_save_and_load_local() {
        let local = Arc::new(MemoryStorage::new());
        let store = Store::with_storage(local.clone(), Arc::new(MemoryStorage::new()));

        store.set("foo", json!({ "bar": 123 })).save("foo").unwrap();
        assert_eq!(local.get_item("foo").as_deref(), Some(r#"{"bar":123}"#));

        let restored = Store::with_storage(local, Arc::new(MemoryStorage::new()));
        restored.load("foo", None).unwrap();
        assert_eq!(restored.get("foo"), Some(json!({ "bar": 123 })));
    }

    #[test]
    fn test_session_is_separate_from_local() {
        let store = Store::new();
        store.set("foo2", json!({ "bar": 123 }));
        store.save_for_session("foo2").unwrap();

        store.set("foo2", json!(null));
        store.load_for_session("foo2", None).unwrap();
        assert_eq!(store.get("foo2"), Some(json!({ "bar": 123 })));

        store.load("foo2", Some(json!("local default"))).unwrap();
        assert_eq!(store.get("foo2"), Some(json!("local default")));
    }

    #[test]
    fn test_load_missing_uses_default() {
        let store = Store::new();
        store.load("foo4", Some(json!({ "bar": 0 }))).unwrap();
        store.load_for_session("foo3", Some(json!({ "bar": 0 }))).unwrap();
        store.load("foo6", None).unwrap();

        assert_eq!(store.get("foo4"), Some(json!({ "bar": 0 })));
        assert_eq!(store.get("foo3"), Some(json!({ "bar": 0 })));
        assert_eq!(store.get("foo6"), Some(Value::Null));
    }

    #[test]
    fn test_load_corrupt_item() {
        let local = Arc::new(MemoryStorage::new());
        local.set_item("broken", "{not json").unwrap();
        let store = Store::with_storage(local, Arc::new(MemoryStorage::new()));

        assert!(matches!(
            store.load("broken", None),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn test_typed_access() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Settings {
            theme: String,
        }

        let store = Store::new();
        store
            .set_as(
                "settings",
                &Settings {
                    theme: "dark".to_string(),
                },
            )
            .unwrap();

        assert_eq!(
            store.get_as::<Settings>("settings"),
            Some(Settings {
                theme: "dark".to_string()
            })
        );
        assert_eq!(store.get_as::<u32>("settings"), None);
    }

    #[test]
    fn test_shared_store_is_singleton() {
        let registry = Registry::new();
        let a = Store::shared(&registry, "_STORE_TEST").unwrap();
        let b = Store::shared(&registry, "_STORE_TEST").unwrap();
        a.set("foo", 1);
        assert_eq!(b.get("foo"), Some(json!(1)));
    }

    #[test]
    fn test_file_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.get_item("foo"), None);
        storage.set_item("foo", r#"{"bar":123}"#).unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get_item("foo").as_deref(), Some(r#"{"bar":123}"#));
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn test_file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(matches!(
            FileStorage::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }
}

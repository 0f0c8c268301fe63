//! # Global Registry
//!
//! A process-scoped mapping from string identifiers to arbitrary values. Every
//! other primitive in the crate (buses, the command sequence counter, stores,
//! translations, the runtime mode) keeps its singleton instance here, keyed by a
//! well-known identifier, so two call sites using the same identifier observe
//! the same instance.
//!
//! Code that wants isolation (tests, embedded sub-applications) builds its own
//! [`Registry`] and passes it around; [`Registry::global`] is the shared
//! process-wide instance and is never torn down.

use std::{
    any::{type_name, Any},
    sync::Arc,
};

use dashmap::{mapref::entry::Entry, DashMap};
use lazy_static::lazy_static;
use thiserror::Error;
use tracing::trace;

type Slot = Arc<dyn Any + Send + Sync>;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<Registry> = Arc::new(Registry::new());
}

#[derive(Default)]
pub struct Registry {
    values: DashMap<String, Slot>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry. Empty on first access.
    pub fn global() -> Arc<Registry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Returns the value stored under `identifier`.
    ///
    /// `None` if nothing is stored, or if the stored value is not a `T`.
    pub fn get<T>(&self, identifier: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let slot = self.values.get(identifier)?.value().clone();
        slot.downcast::<T>().ok()
    }

    /// Stores `value` under `identifier`, replacing any previous value, and
    /// returns the stored value.
    pub fn set<T>(&self, identifier: &str, value: T) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        let value = Arc::new(value);
        self.values
            .insert(identifier.to_string(), value.clone() as Slot);
        trace!(identifier, "registry value set");
        value
    }

    /// Returns the instance registered under `identifier`, creating and
    /// registering it with `init` on first access.
    ///
    /// Creation happens under the identifier's shard lock, so concurrent first
    /// callers still end up sharing one instance.
    pub fn get_or_insert_with<T, F>(&self, identifier: &str, init: F) -> RegistryResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let slot = match self.values.entry(identifier.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                trace!(identifier, "registry singleton created");
                entry.insert(Arc::new(init()) as Slot).value().clone()
            }
        };
        slot.downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                identifier: identifier.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.values.contains_key(identifier)
    }

    /// Drops the registry's handle on `identifier`. Holders of the value keep
    /// their `Arc`; the next `get_or_insert_with` creates a fresh instance.
    pub fn remove(&self, identifier: &str) -> bool {
        self.values.remove(identifier).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut identifiers: Vec<String> =
            self.values.iter().map(|entry| entry.key().clone()).collect();
        identifiers.sort();
        f.debug_struct("Registry")
            .field("identifiers", &identifiers)
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry value {identifier} is not a {expected}")]
    TypeMismatch {
        identifier: String,
        expected: &'static str,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

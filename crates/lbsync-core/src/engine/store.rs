// ── Flow store ──
//
// Typed key/value context shared by the tasks of one flow execution.
// Values are stored behind `Arc` so snapshots for revert are cheap.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::CoreError;

type Value = Arc<dyn Any + Send + Sync>;

/// Typed name of a store entry.
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

/// Execution context for one flow run. Not persisted.
#[derive(Default)]
pub struct Store {
    values: DashMap<&'static str, Value>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert used when seeding a flow.
    pub fn with<T: Any + Send + Sync>(self, key: Key<T>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: Key<T>, value: T) {
        self.values.insert(key.name, Arc::new(value));
    }

    /// Read a required entry.
    pub fn get<T: Any + Send + Sync>(&self, key: Key<T>) -> Result<Arc<T>, CoreError> {
        self.try_get(key).ok_or_else(|| CoreError::MissingInput {
            key: key.name.to_owned(),
        })
    }

    /// Read an optional entry. A value of the wrong type counts as absent.
    pub fn try_get<T: Any + Send + Sync>(&self, key: Key<T>) -> Option<Arc<T>> {
        let value = Arc::clone(self.values.get(key.name)?.value());
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy the named entries into a detached store.
    pub fn snapshot(&self, names: &[&'static str]) -> Store {
        let snap = Store::new();
        self.copy_into(&snap, names);
        snap
    }

    pub(crate) fn copy_into(&self, other: &Store, names: &[&'static str]) {
        for name in names {
            if let Some(v) = self.values.get(name) {
                other.values.insert(*name, Arc::clone(v.value()));
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        f.debug_struct("Store").field("keys", &keys).finish()
    }
}

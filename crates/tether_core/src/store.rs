//! Stores hold the last known value of a resource.
//!
//! A controller only ever holds a shared handle to its store, so a store can
//! outlive the controller and be handed to the next one.

use std::fmt::Debug;

use parking_lot::RwLock;

/// Cache for the last successfully retrieved value.
///
/// Implementations must serialize internally: reads may race a write from the
/// controller's completion task.
pub trait DataStore<T>: Send + Sync + Debug {
    fn get(&self) -> Option<T>;

    fn store(&self, value: T);

    fn clear(&self);
}

/// Keeps the value in memory behind a read-write lock.
#[derive(Debug)]
pub struct MemoryDataStore<T> {
    value: RwLock<Option<T>>,
}

impl<T> MemoryDataStore<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: RwLock::new(Some(value)),
        }
    }
}

impl<T> Default for MemoryDataStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DataStore<T> for MemoryDataStore<T>
where
    T: Clone + Send + Sync + Debug,
{
    fn get(&self) -> Option<T> {
        self.value.read().clone()
    }

    fn store(&self, value: T) {
        *self.value.write() = Some(value);
    }

    fn clear(&self) {
        self.value.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_get_clear() {
        let store = MemoryDataStore::new();
        assert_eq!(store.get(), None);

        store.store("first".to_string());
        store.store("second".to_string());
        assert_eq!(store.get().as_deref(), Some("second"));

        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn with_value_is_prepopulated() {
        let store = MemoryDataStore::with_value(7u32);
        assert_eq!(store.get(), Some(7));
    }
}

//! An in-memory object cache with one named secondary index.
//!
//! Objects are keyed by `namespace/name`. The index function maps an object
//! to zero or more index values; the cache keeps the reverse mapping up to
//! date on every insert and removal so lookups never scan all objects.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Maps an object to the index values it should be filed under.
pub type IndexFn<T> = fn(&T) -> Vec<String>;

pub struct Indexer<T> {
    name: &'static str,
    index_fn: IndexFn<T>,
    inner: RwLock<IndexerInner<T>>,
}

struct IndexerInner<T> {
    objects: HashMap<String, T>,
    index: HashMap<String, BTreeSet<String>>,
}

impl<T: Clone> Indexer<T> {
    pub fn new(name: &'static str, index_fn: IndexFn<T>) -> Self {
        Self {
            name,
            index_fn,
            inner: RwLock::new(IndexerInner {
                objects: HashMap::new(),
                index: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert or replace the object stored under `key`.
    pub fn upsert(&self, key: String, obj: T) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.objects.remove(&key) {
            inner.unindex(&key, (self.index_fn)(&old));
        }
        for value in (self.index_fn)(&obj) {
            inner.index.entry(value).or_default().insert(key.clone());
        }
        inner.objects.insert(key, obj);
    }

    /// Remove the object stored under `key`, returning it.
    pub fn remove(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.write();
        let old = inner.objects.remove(key)?;
        inner.unindex(key, (self.index_fn)(&old));
        Some(old)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.read().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().objects.contains_key(key)
    }

    /// All objects filed under `value`, ordered by object key.
    pub fn by_index(&self, value: &str) -> Vec<T> {
        let inner = self.inner.read();
        match inner.index.get(value) {
            Some(keys) => keys
                .iter()
                .filter_map(|k| inner.objects.get(k).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// All cached objects, ordered by object key.
    pub fn list(&self) -> Vec<T> {
        let inner = self.inner.read();
        let mut keys: Vec<&String> = inner.objects.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| inner.objects.get(k).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> IndexerInner<T> {
    fn unindex(&mut self, key: &str, values: Vec<String>) {
        for value in values {
            if let Some(keys) = self.index.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.index.remove(&value);
                }
            }
        }
    }
}

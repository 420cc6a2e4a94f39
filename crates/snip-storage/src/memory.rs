use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::error::{Result, StoreError};
use snip_core::store::{assign_id, IdGenerator, Store, Visitor};
use snip_core::Record;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, Record>,
    counter: u32,
}

/// Volatile in-memory implementation of the [`Store`] trait.
///
/// The record map and the sequence counter sit behind one reader/writer
/// lock, so a reader sees either all of a `put` or none of it.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    closed: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Record>> {
        self.ensure_open()?;
        Ok(self.state.read().records.get(key).cloned())
    }

    async fn put(&self, generate: IdGenerator<'_>, record: &mut Record) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.write();

        if !record.id.is_valid() {
            assign_id(generate, state.counter, record)?;
            // the timestamp tells wrapped counters apart
            state.counter = state.counter.wrapping_add(1);
        }

        let key = record.id.to_string();
        trace!(key = %key, "storing record in memory");
        state.records.insert(key, record.clone());
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        for key in keys {
            state.records.remove(key);
        }
        Ok(())
    }

    async fn for_each(&self, visit: Visitor<'_>) -> Result<()> {
        self.ensure_open()?;
        // Snapshot under the lock so the visitor runs without holding it.
        let snapshot: Vec<(String, Record)> = self
            .state
            .read()
            .records
            .iter()
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect();

        for (key, record) in snapshot {
            visit(&key, record)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        self.state.write().records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_core::{Id, IdError};

    fn generator(counter: u32) -> std::result::Result<Id, IdError> {
        Ok(Id::from_parts(100, 7, counter))
    }

    #[tokio::test]
    async fn put_assigns_counter_from_zero() {
        let store = InMemoryStore::new();

        let mut first = Record::new("https://example.com/1");
        let mut second = Record::new("https://example.com/2");
        store.put(&generator, &mut first).await.unwrap();
        store.put(&generator, &mut second).await.unwrap();

        assert_eq!(first.id.counter(), 0);
        assert_eq!(second.id.counter(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let store = InMemoryStore::new();
        assert!(store.get("b0b0b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_generation_keeps_counter() {
        let store = InMemoryStore::new();

        let mut record = Record::new("https://example.com");
        let err = store
            .put(&|_| Err(IdError::OutOfRange { second: 0 }), &mut record)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Id(_)));
        assert!(store.is_empty());

        store.put(&generator, &mut record).await.unwrap();
        assert_eq!(record.id.counter(), 0);
    }

    #[tokio::test]
    async fn counter_wraps() {
        let store = InMemoryStore::new();
        store.state.write().counter = u32::MAX;

        let mut last = Record::new("https://example.com/last");
        let mut wrapped = Record::new("https://example.com/wrapped");
        store.put(&generator, &mut last).await.unwrap();
        store.put(&generator, &mut wrapped).await.unwrap();

        assert_eq!(last.id.counter(), u32::MAX);
        assert_eq!(wrapped.id.counter(), 0);
    }

    #[tokio::test]
    async fn close_rejects_further_calls() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();

        assert!(matches!(store.get("b00").await, Err(StoreError::Closed)));
        assert!(matches!(store.close().await, Err(StoreError::Closed)));
    }
}

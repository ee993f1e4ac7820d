//! Test stores shared by the integration suites.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use kvclone::{EntryStream, Key, KeyValueEntry, KeyValueStore, LocalStore, StoreError, StoreResult};

pub async fn seeded_store(pairs: &[(&str, &str)]) -> LocalStore {
    let store = LocalStore::in_memory();
    for (key, value) in pairs {
        store.put(&Key::from(*key), value.as_bytes()).await.unwrap();
    }
    store
}

pub async fn numbered_store(count: usize) -> LocalStore {
    let store = LocalStore::in_memory();
    for i in 0..count {
        store
            .put(&Key::from(format!("/key/{:04}", i)), format!("value-{}", i).as_bytes())
            .await
            .unwrap();
    }
    store
}

pub async fn contents(store: &dyn KeyValueStore) -> Vec<(Key, Vec<u8>)> {
    let mut entries = store.scan().await.unwrap();
    let mut out = Vec::new();
    while let Some(entry) = entries.next().await {
        let entry = entry.unwrap();
        out.push((entry.key, entry.value));
    }
    out.sort();
    out
}

/// Destination that rejects writes for a fixed set of keys.
pub struct FaultyStore {
    pub inner: LocalStore,
    rejected: HashSet<Key>,
}

impl FaultyStore {
    pub fn rejecting<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Self {
            inner: LocalStore::in_memory(),
            rejected: keys.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    fn kind(&self) -> &'static str {
        "faulty"
    }

    async fn scan(&self) -> StoreResult<EntryStream> {
        self.inner.scan().await
    }

    async fn put(&self, key: &Key, value: &[u8]) -> StoreResult<()> {
        if self.rejected.contains(key) {
            return Err(StoreError::IoError(std::io::Error::other("write rejected")));
        }
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn len(&self) -> StoreResult<u64> {
        self.inner.len().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Destination that records how many writes overlap.
pub struct GaugedStore {
    pub inner: LocalStore,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugedStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: LocalStore::in_memory(),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for GaugedStore {
    fn kind(&self) -> &'static str {
        "gauged"
    }

    async fn scan(&self) -> StoreResult<EntryStream> {
        self.inner.scan().await
    }

    async fn put(&self, key: &Key, value: &[u8]) -> StoreResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.put(key, value).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn len(&self) -> StoreResult<u64> {
        self.inner.len().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Source whose enumeration faults after `good` entries.
pub struct BrokenSource {
    pub good: usize,
}

#[async_trait]
impl KeyValueStore for BrokenSource {
    fn kind(&self) -> &'static str {
        "broken"
    }

    async fn scan(&self) -> StoreResult<EntryStream> {
        let good = (0..self.good)
            .map(|i| Ok(KeyValueEntry::new(format!("k{}", i), format!("v{}", i))));
        let fault = std::iter::once(Err(StoreError::Corrupt("truncated value log".to_string())));
        Ok(stream::iter(good.chain(fault).collect::<Vec<_>>()).boxed())
    }

    async fn put(&self, _key: &Key, _value: &[u8]) -> StoreResult<()> {
        Err(StoreError::Closed)
    }

    async fn get(&self, _key: &Key) -> StoreResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn len(&self) -> StoreResult<u64> {
        Ok(self.good as u64)
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

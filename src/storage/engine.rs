use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::{Key, KeyValueEntry, StoreResult};

/// Lazy enumeration of a store's full keyspace.
///
/// Each key appears once per enumeration. An `Err` item is a structural fault
/// of the source, not a per-key condition.
pub type EntryStream = BoxStream<'static, StoreResult<KeyValueEntry>>;

/// Key-value store trait - the two operations a clone relies on, plus the
/// handful callers need to inspect and release a store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend name used in log lines ("local", "remote").
    fn kind(&self) -> &'static str;

    /// Open a cursor over every entry, in the store's own order.
    async fn scan(&self) -> StoreResult<EntryStream>;

    /// Write `value` under `key`, replacing any existing value.
    async fn put(&self, key: &Key, value: &[u8]) -> StoreResult<()>;

    /// Read one key.
    async fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>>;

    /// Number of keys currently stored.
    async fn len(&self) -> StoreResult<u64>;

    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Flush and release backend resources. Further writes fail.
    async fn close(&self) -> StoreResult<()>;
}

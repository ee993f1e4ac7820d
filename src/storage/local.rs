//! Embedded, directory-backed key-value store.
//!
//! The live keyspace is an ordered in-memory map. Every write is appended to
//! the WAL before it becomes visible. Once the WAL holds `checkpoint_threshold`
//! records (or as many records as the last snapshot had keys, whichever is
//! larger) the map is folded into a fresh snapshot on the blocking pool and
//! the WAL is truncated. Reopening a directory replays snapshot + WAL.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::engine::{EntryStream, KeyValueStore};
use super::persistence::{DurabilityMode, PersistenceManager, WalRecord};
use crate::core::{Key, KeyValueEntry, StoreError, StoreResult};

/// Entries pulled from the map per lock acquisition while scanning.
const SCAN_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct LocalStoreOptions {
    pub durability: DurabilityMode,
    pub checkpoint_threshold: usize,
}

impl Default for LocalStoreOptions {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::Async,
            checkpoint_threshold: 1000,
        }
    }
}

impl LocalStoreOptions {
    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }
}

struct LocalState {
    entries: BTreeMap<Key, Vec<u8>>,
    persistence: Option<PersistenceManager>,
    closed: bool,
}

impl LocalState {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

pub struct LocalStore {
    path: Option<PathBuf>,
    state: Arc<Mutex<LocalState>>,
}

impl LocalStore {
    /// Open (or create) a store rooted at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::open_with(path, LocalStoreOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: LocalStoreOptions) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let mut persistence = PersistenceManager::new(&path, options.durability)?;
        persistence
            .wal_mut()
            .set_checkpoint_threshold(options.checkpoint_threshold);
        let entries = persistence.recover()?;
        tracing::debug!(path = %path.display(), keys = entries.len(), "local store recovered");

        Ok(Self {
            path: Some(path),
            state: Arc::new(Mutex::new(LocalState {
                entries,
                persistence: Some(persistence),
                closed: false,
            })),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(Mutex::new(LocalState {
                entries: BTreeMap::new(),
                persistence: None,
                closed: false,
            })),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshots written since the store was opened.
    pub fn checkpoints(&self) -> StoreResult<u64> {
        let guard = self.state.lock()?;
        Ok(guard
            .persistence
            .as_ref()
            .map_or(0, PersistenceManager::checkpoints))
    }

    /// Write a snapshot on the blocking pool if one is still due when the
    /// lock is taken there.
    async fn checkpoint_if_due(&self) -> StoreResult<()> {
        let state = Arc::clone(&self.state);
        run_blocking(move || {
            let mut guard = state.lock()?;
            let state = &mut *guard;
            if state.closed {
                return Ok(());
            }
            match state.persistence.as_mut() {
                Some(persistence) if persistence.needs_checkpoint() => {
                    persistence.checkpoint(&state.entries)
                }
                _ => Ok(()),
            }
        })
        .await
    }

    fn read_page(state: &Mutex<LocalState>, lower: Bound<Key>) -> StoreResult<Vec<KeyValueEntry>> {
        let guard = state.lock()?;
        guard.ensure_open()?;
        Ok(guard
            .entries
            .range((lower, Bound::Unbounded))
            .take(SCAN_PAGE_SIZE)
            .map(|(key, value)| KeyValueEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn scan(&self) -> StoreResult<EntryStream> {
        self.state.lock()?.ensure_open()?;

        let state = Arc::clone(&self.state);
        let pages = stream::unfold(Some(Bound::Unbounded), move |cursor: Option<Bound<Key>>| {
            let state = Arc::clone(&state);
            async move {
                let lower = cursor?;
                let page = match Self::read_page(&state, lower) {
                    Ok(page) => page,
                    Err(err) => return Some((vec![Err(err)], None)),
                };
                let last = page.last()?.key.clone();
                let next = (page.len() == SCAN_PAGE_SIZE).then_some(Bound::Excluded(last));
                Some((page.into_iter().map(Ok).collect::<Vec<_>>(), next))
            }
        });

        Ok(pages.flat_map(stream::iter).boxed())
    }

    async fn put(&self, key: &Key, value: &[u8]) -> StoreResult<()> {
        let checkpoint_due = {
            let mut guard = self.state.lock()?;
            let state = &mut *guard;
            state.ensure_open()?;

            if let Some(persistence) = state.persistence.as_mut() {
                persistence.log(&WalRecord::Put {
                    key: key.clone(),
                    value: value.to_vec(),
                })?;
            }
            state.entries.insert(key.clone(), value.to_vec());
            state
                .persistence
                .as_ref()
                .is_some_and(PersistenceManager::needs_checkpoint)
        };

        // The record is already in the WAL, so the put has succeeded whatever
        // happens to the snapshot.
        if checkpoint_due {
            if let Err(err) = self.checkpoint_if_due().await {
                tracing::warn!(
                    path = ?self.path,
                    error = %err,
                    "checkpoint failed, WAL retained"
                );
            }
        }
        Ok(())
    }

    async fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        let guard = self.state.lock()?;
        guard.ensure_open()?;
        Ok(guard.entries.get(key).cloned())
    }

    async fn len(&self) -> StoreResult<u64> {
        let guard = self.state.lock()?;
        guard.ensure_open()?;
        Ok(guard.entries.len() as u64)
    }

    async fn close(&self) -> StoreResult<()> {
        let state = Arc::clone(&self.state);
        run_blocking(move || {
            let mut guard = state.lock()?;
            let state = &mut *guard;
            if state.closed {
                return Ok(());
            }
            if let Some(persistence) = state.persistence.as_mut() {
                persistence.checkpoint(&state.entries)?;
                persistence.close()?;
            }
            state.closed = true;
            Ok(())
        })
        .await
    }
}

/// Snapshot and WAL file I/O stays off the async workers.
async fn run_blocking<T, F>(work: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| StoreError::IoError(std::io::Error::other(err)))?
}

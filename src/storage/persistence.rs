//! Write-Ahead Logging (WAL) and snapshot persistence for the local store

use crate::core::{Key, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const WAL_FILE_NAME: &str = "kvclone.wal";
pub const SNAPSHOT_FILE_NAME: &str = "kvclone.snapshot";
const SNAPSHOT_VERSION: u32 = 1;
pub const DEFAULT_CHECKPOINT_THRESHOLD: usize = 1000;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// WAL Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    Put { key: Key, value: Vec<u8> },
}

// ============================================================================
// Store Snapshot
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub entries: BTreeMap<Key, Vec<u8>>,
    pub metadata: SnapshotMetadata,
}

/// Serialized form of a snapshot, borrowing the live map so a checkpoint
/// does not copy the keyspace.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    entries: &'a BTreeMap<Key, Vec<u8>>,
    metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: u64,
    pub key_count: usize,
}

impl<'a> SnapshotRef<'a> {
    fn new(entries: &'a BTreeMap<Key, Vec<u8>>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries,
            metadata: SnapshotMetadata {
                created_at: now_millis(),
                key_count: entries.len(),
            },
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every WAL append.
    Sync,
    /// Flush to the OS after every append; no fsync.
    #[default]
    Async,
    /// Nothing touches disk.
    None,
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
    /// WAL length (in records) that makes the next checkpoint due.
    next_checkpoint_at: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> StoreResult<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            next_checkpoint_at: DEFAULT_CHECKPOINT_THRESHOLD,
        })
    }

    /// Append one framed record. On failure the log is cut back to its
    /// previous length so no partial frame is left ahead of later appends.
    pub fn append(&mut self, record: &WalRecord) -> StoreResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let serialized = rmp_serde::to_vec(record)?;
        let mut frame = Vec::with_capacity(serialized.len() + 4);
        frame.extend_from_slice(&(serialized.len() as u32).to_le_bytes());
        frame.extend_from_slice(&serialized);

        let file = self.wal_file.as_mut().ok_or(StoreError::Closed)?;
        let committed_len = file.get_ref().metadata()?.len();
        if let Err(err) = Self::write_frame(file, &frame, self.durability_mode) {
            if let Err(rollback) = self.truncate_to(committed_len) {
                tracing::error!(
                    path = %self.wal_path.display(),
                    error = %rollback,
                    "could not roll back failed WAL append"
                );
            }
            return Err(err.into());
        }
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    fn write_frame(
        file: &mut BufWriter<File>,
        frame: &[u8],
        durability_mode: DurabilityMode,
    ) -> std::io::Result<()> {
        file.write_all(frame)?;
        file.flush()?;
        if durability_mode == DurabilityMode::Sync {
            file.get_mut().sync_all()?;
        }
        Ok(())
    }

    /// Drop anything past `len`, including bytes still buffered.
    fn truncate_to(&mut self, len: u64) -> StoreResult<()> {
        let Some(writer) = self.wal_file.take() else {
            return Ok(());
        };
        let (file, _unwritten) = writer.into_parts();
        file.set_len(len)?;
        self.wal_file = Some(BufWriter::new(file));
        Ok(())
    }

    /// Read every complete record. A torn trailing record (crash mid-append)
    /// is dropped; anything else malformed is an error.
    pub fn read_all(&self) -> StoreResult<Vec<WalRecord>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(path = %self.wal_path.display(), "dropping torn WAL tail");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            let record: WalRecord = rmp_serde::from_slice(&data)
                .map_err(|e| StoreError::Corrupt(format!("WAL record: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn clear(&mut self) -> StoreResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.wal_path)?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    /// Schedule the next checkpoint after a snapshot of `snapshot_len` keys.
    ///
    /// The WAL may grow to the size of the snapshot before the next one, so
    /// filling a store with M keys rewrites O(M) bytes of snapshot in total.
    fn schedule_after_snapshot(&mut self, snapshot_len: usize) {
        self.next_checkpoint_at = self.checkpoint_threshold.max(snapshot_len);
    }

    /// Push the next attempt one interval further out, keeping the WAL.
    fn defer_checkpoint(&mut self, snapshot_len: usize) {
        self.next_checkpoint_at =
            self.entries_since_checkpoint + self.checkpoint_threshold.max(snapshot_len);
    }

    /// Stop accepting appends.
    pub fn close(&mut self) -> StoreResult<()> {
        if let Some(mut file) = self.wal_file.take() {
            file.flush()?;
        }
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.next_checkpoint_at
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
        self.next_checkpoint_at = self.checkpoint_threshold;
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Write through a temp file in the same directory, then rename over the
    /// old snapshot so readers never observe a partial file.
    pub fn save(&self, entries: &BTreeMap<Key, Vec<u8>>) -> StoreResult<()> {
        let parent = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;
        let serialized = rmp_serde::to_vec(&SnapshotRef::new(entries))?;
        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        temp.write_all(&serialized)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| StoreError::IoError(e.error))?;
        Ok(())
    }

    pub fn load(&self) -> StoreResult<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| StoreError::Corrupt(format!("snapshot: {}", e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
    checkpoints: u64,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE_NAME), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE_NAME));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
            checkpoints: 0,
        })
    }

    pub fn log(&mut self, record: &WalRecord) -> StoreResult<()> {
        self.wal.append(record)
    }

    /// Write `entries` as the new snapshot, then truncate the WAL.
    ///
    /// If the snapshot cannot be written the WAL is left untouched and the
    /// next attempt is deferred by one interval.
    pub fn checkpoint(&mut self, entries: &BTreeMap<Key, Vec<u8>>) -> StoreResult<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        if let Err(err) = self.snapshot.save(entries) {
            self.wal.defer_checkpoint(entries.len());
            return Err(err);
        }
        self.wal.clear()?;
        self.wal.schedule_after_snapshot(entries.len());
        self.checkpoints += 1;
        Ok(())
    }

    /// Snapshots written since this manager was opened.
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Rebuild the keyspace from the last snapshot plus the WAL written
    /// after it.
    pub fn recover(&self) -> StoreResult<BTreeMap<Key, Vec<u8>>> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(BTreeMap::new());
        }
        let mut entries = match self.snapshot.load()? {
            Some(snapshot) => snapshot.entries,
            None => BTreeMap::new(),
        };
        for record in self.wal.read_all()? {
            match record {
                WalRecord::Put { key, value } => {
                    entries.insert(key, value);
                }
            }
        }
        Ok(entries)
    }

    pub fn close(&mut self) -> StoreResult<()> {
        self.wal.close()
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }
    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }
}

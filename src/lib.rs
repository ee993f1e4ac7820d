// ============================================================================
// kvclone Library
// ============================================================================

//! Copy the full contents of one key-value store into another.
//!
//! Two backends are supported: a local embedded store ([`LocalStore`]) and a
//! MongoDB collection ([`RemoteStore`]). Any pairing works, including
//! local-to-local and remote-to-remote.
//!
//! ```no_run
//! use kvclone::{CloneConfig, RawEndpoint, TracingReporter, clone_stores};
//! use std::sync::Arc;
//!
//! # async fn run() -> kvclone::Result<()> {
//! let config = CloneConfig::new(
//!     RawEndpoint::remote("mongodb://localhost:27017", "hub").collection("datastore"),
//!     RawEndpoint::local("/var/lib/hub/datastore"),
//! )
//! .with_parallel(200);
//!
//! let summary = clone_stores(&config, Arc::new(TracingReporter)).await?;
//! println!("copied {} keys in {:?}", summary.copied, summary.elapsed);
//! summary.destination.close().await.ok();
//! # Ok(())
//! # }
//! ```

pub mod clone;
pub mod connection;
pub mod core;
pub mod storage;

pub use clone::{
    Cloner, CopyFailure, CopyOptions, CopyReporter, CopySummary, CopyTally, NullReporter,
    RecordingReporter, ReportEvent, TallySnapshot, TracingReporter, clone_remote_to_local,
    clone_stores,
};
pub use connection::{CloneConfig, EndpointDescriptor, RawEndpoint, redact_uri, resolve_endpoints};
pub use core::{CloneError, Key, KeyValueEntry, Result, Side, StoreError, StoreResult};
pub use storage::{
    DurabilityMode, EntryStream, KeyValueStore, LocalStore, LocalStoreOptions, RemoteStore,
};

//! Copy engine.
//!
//! One orchestrating loop pulls entries from the source stream and spawns a
//! write task per entry. Admission is gated by a semaphore of `concurrency`
//! permits: the loop suspends while every permit is held, so enumeration can
//! never run more than `concurrency` writes ahead of completion. Every spawned
//! task is tracked in a [`JoinSet`] and joined before the batch is judged.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

use super::report::CopyReporter;
use super::tally::{CopyFailure, CopyTally, TallySnapshot};
use crate::core::{CloneError, KeyValueEntry, Result};
use crate::storage::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Maximum number of write tasks in flight. Must be at least 1.
    pub concurrency: usize,
    /// Report every copied key.
    pub verbose: bool,
}

impl CopyOptions {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// A completed batch. Owned by the caller, who decides when to close the
/// destination.
pub struct CopySummary<D: ?Sized> {
    pub destination: Arc<D>,
    pub copied: u64,
    pub elapsed: Duration,
}

impl<D: ?Sized> fmt::Debug for CopySummary<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopySummary")
            .field("copied", &self.copied)
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

pub struct Cloner {
    options: CopyOptions,
    reporter: Arc<dyn CopyReporter>,
}

impl Cloner {
    pub fn new(options: CopyOptions, reporter: Arc<dyn CopyReporter>) -> Result<Self> {
        if options.concurrency == 0 {
            return Err(CloneError::config("concurrency limit must be at least 1"));
        }
        Ok(Self { options, reporter })
    }

    /// Copy every entry of `source` into `destination`.
    ///
    /// Returns the destination only when every write succeeded. Keys that
    /// were written before a failure stay written.
    pub async fn copy<S, D>(&self, source: &S, destination: Arc<D>) -> Result<CopySummary<D>>
    where
        S: KeyValueStore + ?Sized,
        D: KeyValueStore + ?Sized + 'static,
    {
        let started = Instant::now();
        let mut entries = source.scan().await.map_err(CloneError::SourceRead)?;

        let admission = Arc::new(Semaphore::new(self.options.concurrency));
        let tally = Arc::new(CopyTally::new());
        let mut in_flight = JoinSet::new();
        let mut read_error = None;

        while let Some(next) = entries.next().await {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    read_error = Some(err);
                    break;
                }
            };

            // The semaphore is never closed.
            let Ok(permit) = Arc::clone(&admission).acquire_owned().await else {
                break;
            };
            while let Some(done) = in_flight.try_join_next() {
                settle(done);
            }

            let task = CopyTask {
                entry,
                destination: Arc::clone(&destination),
                tally: Arc::clone(&tally),
                reporter: Arc::clone(&self.reporter),
                options: self.options,
            };
            in_flight.spawn(task.run(permit));
        }
        drop(entries);

        // Drain: nothing below runs while a write is still in flight.
        while let Some(done) = in_flight.join_next().await {
            settle(done);
        }

        let TallySnapshot { copied, failures } = tally.snapshot();
        for failure in &failures {
            self.reporter.failed(failure);
        }

        if let Some(err) = read_error {
            self.reporter.aborted(copied, &err.to_string());
            return Err(CloneError::SourceRead(err));
        }
        if !failures.is_empty() {
            return Err(CloneError::BatchCopy {
                failed: failures.len(),
                copied,
            });
        }

        let elapsed = started.elapsed();
        self.reporter.finished(copied, elapsed);
        Ok(CopySummary {
            destination,
            copied,
            elapsed,
        })
    }
}

/// One entry in flight against the destination.
struct CopyTask<D: ?Sized> {
    entry: KeyValueEntry,
    destination: Arc<D>,
    tally: Arc<CopyTally>,
    reporter: Arc<dyn CopyReporter>,
    options: CopyOptions,
}

impl<D: KeyValueStore + ?Sized> CopyTask<D> {
    async fn run(self, permit: OwnedSemaphorePermit) {
        let KeyValueEntry { key, value } = self.entry;
        let write = AssertUnwindSafe(self.destination.put(&key, &value))
            .catch_unwind()
            .await;

        match write {
            Ok(Ok(())) => {
                let every = self.options.concurrency as u64;
                let reporter = &self.reporter;
                self.tally.record_success(|copied| {
                    if copied % every == 0 {
                        reporter.progress(copied);
                    }
                });
                if self.options.verbose {
                    reporter.copied(&key);
                }
            }
            Ok(Err(err)) => self.tally.record_failure(CopyFailure::new(key, err)),
            Err(panic) => self
                .tally
                .record_failure(CopyFailure::new(key, panic_message(panic.as_ref()))),
        }

        drop(permit);
    }
}

fn settle(done: std::result::Result<(), JoinError>) {
    // Write panics are caught inside the task; this only fires if a reporter
    // panicked after the outcome was already recorded.
    if let Err(err) = done {
        tracing::warn!(error = %err, "copy task ended abnormally");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("write panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("write panicked: {}", message)
    } else {
        "write panicked".to_string()
    }
}

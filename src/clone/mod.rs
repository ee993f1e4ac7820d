//! Whole-store cloning: validate, open both ends, copy.

pub mod engine;
pub mod report;
pub mod tally;

pub use engine::{Cloner, CopyOptions, CopySummary};
pub use report::{CopyReporter, NullReporter, RecordingReporter, ReportEvent, TracingReporter};
pub use tally::{CopyFailure, CopyTally, TallySnapshot};

use std::sync::Arc;
use std::time::Duration;

use crate::connection::{CloneConfig, EndpointDescriptor, RawEndpoint};
use crate::core::{CloneError, Result, Side};
use crate::storage::{self, KeyValueStore};

/// Open one endpoint within `timeout`, the only cancellable stage of a clone.
pub async fn open_endpoint(
    side: Side,
    descriptor: &EndpointDescriptor,
    timeout: Duration,
    reporter: &dyn CopyReporter,
) -> Result<Arc<dyn KeyValueStore>> {
    let target = descriptor.redacted();
    let store = match tokio::time::timeout(timeout, storage::open(descriptor)).await {
        Ok(Ok(store)) => store,
        Ok(Err(source)) => {
            return Err(CloneError::Connection {
                side,
                target,
                source,
            });
        }
        Err(_) => {
            return Err(CloneError::ConnectTimeout {
                side,
                target,
                timeout,
            });
        }
    };
    reporter.endpoint_opened(side, descriptor.kind(), &target);
    Ok(store)
}

/// Run a complete clone described by `config`.
///
/// Both endpoints are validated before either is opened. The source is
/// closed once the copy ends; the destination is returned open on success
/// and closing it is up to the caller.
pub async fn clone_stores(
    config: &CloneConfig,
    reporter: Arc<dyn CopyReporter>,
) -> Result<CopySummary<dyn KeyValueStore>> {
    let (source, destination) = config.validate()?;
    let cloner = Cloner::new(
        CopyOptions::new(config.parallel).verbose(config.verbose),
        Arc::clone(&reporter),
    )?;

    let timeout = config.connect_timeout();
    let source = open_endpoint(Side::Source, &source, timeout, reporter.as_ref()).await?;
    let destination =
        open_endpoint(Side::Destination, &destination, timeout, reporter.as_ref()).await?;

    let outcome = cloner.copy(source.as_ref(), destination).await;
    if let Err(err) = source.close().await {
        tracing::warn!(error = %err, "closing source store failed");
    }
    outcome
}

/// Copy a MongoDB-backed store into a local store at `path`.
pub async fn clone_remote_to_local(
    uri: &str,
    database: &str,
    collection: &str,
    path: impl Into<std::path::PathBuf>,
    parallel: usize,
    verbose: bool,
) -> Result<CopySummary<dyn KeyValueStore>> {
    let config = CloneConfig::new(
        RawEndpoint::remote(uri, database).collection(collection),
        RawEndpoint::local(path),
    )
    .with_parallel(parallel)
    .with_verbose(verbose);
    clone_stores(&config, Arc::new(TracingReporter)).await
}

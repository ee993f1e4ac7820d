pub mod engine;
pub mod local;
pub mod persistence;
pub mod remote;

pub use engine::{EntryStream, KeyValueStore};
pub use local::{LocalStore, LocalStoreOptions};
pub use persistence::DurabilityMode;
pub use remote::{DEFAULT_COLLECTION, RemoteStore};

use std::sync::Arc;

use crate::connection::EndpointDescriptor;
use crate::core::StoreResult;

/// Open a store handle for a resolved endpoint.
///
/// A local endpoint creates its directory if needed; a remote endpoint
/// connects and pings its database before returning.
pub async fn open(descriptor: &EndpointDescriptor) -> StoreResult<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match descriptor {
        EndpointDescriptor::Local { path } => Arc::new(LocalStore::open(path)?),
        EndpointDescriptor::Remote {
            uri,
            database,
            collection,
            connect_timeout,
        } => Arc::new(RemoteStore::connect(uri, database, collection, *connect_timeout).await?),
    };
    Ok(store)
}

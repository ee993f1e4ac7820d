use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::endpoint::{EndpointDescriptor, RawEndpoint, resolve_endpoints};
use crate::core::{CloneError, Result};

pub const DEFAULT_PARALLEL: usize = 100;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Clone job configuration
///
/// Can be built programmatically or loaded from a JSON file:
///
/// ```json
/// {
///   "source": { "remote_uri": "mongodb://localhost:27017", "remote_database": "hub" },
///   "destination": { "local_path": "/var/lib/hub/datastore" },
///   "parallel": 200
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    pub source: RawEndpoint,
    pub destination: RawEndpoint,
    /// Maximum number of writes in flight.
    pub parallel: usize,
    /// Log every copied key.
    pub verbose: bool,
    /// Bound on opening each endpoint.
    pub connect_timeout_secs: u64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            source: RawEndpoint::default(),
            destination: RawEndpoint::default(),
            parallel: DEFAULT_PARALLEL,
            verbose: false,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl CloneConfig {
    pub fn new(source: RawEndpoint, destination: RawEndpoint) -> Self {
        Self {
            source,
            destination,
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CloneError::config(format!("reading config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
            .map_err(|e| CloneError::config(format!("parsing config {}: {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// Set the concurrency limit
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the bound on opening each endpoint. Kept in whole seconds, like
    /// the config file field; a fractional part rounds up.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.connect_timeout_secs = secs.max(1);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Validate the endpoints and the concurrency limit.
    pub fn validate(&self) -> Result<(EndpointDescriptor, EndpointDescriptor)> {
        let endpoints = resolve_endpoints(&self.source, &self.destination, self.connect_timeout())?;
        if self.parallel == 0 {
            return Err(CloneError::config("parallel must be at least 1"));
        }
        Ok(endpoints)
    }
}

pub mod config;
pub mod endpoint;

pub use config::CloneConfig;
pub use endpoint::{EndpointDescriptor, RawEndpoint, redact_uri, resolve_endpoints};

pub mod error;
pub mod types;

pub use error::{CloneError, Result, StoreError, StoreResult};
pub use types::{Key, KeyValueEntry, Side};

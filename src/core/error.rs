use std::time::Duration;

use thiserror::Error;

use super::types::Side;

/// Failures raised by a store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Remote store error: {0}")]
    Remote(#[from] mongodb::error::Error),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Store is closed")]
    Closed,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::EncodeError(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::DecodeError(err.to_string())
    }
}

/// Top-level failure of one clone invocation.
///
/// Exactly one of these is returned per failed call. Failures of individual
/// keys never surface here one by one; they are reported through the
/// [`CopyReporter`](crate::clone::CopyReporter) and counted in
/// [`CloneError::BatchCopy`].
#[derive(Error, Debug)]
pub enum CloneError {
    #[error("{0}")]
    Configuration(String),

    #[error("parsing {side} URI: {source}")]
    InvalidUri {
        side: Side,
        #[source]
        source: url::ParseError,
    },

    #[error("connecting to {side} {target}: {source}")]
    Connection {
        side: Side,
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("connecting to {side} {target}: timed out after {timeout:?}")]
    ConnectTimeout {
        side: Side,
        target: String,
        timeout: Duration,
    },

    #[error("reading source: {0}")]
    SourceRead(#[source] StoreError),

    #[error("had {failed} errors")]
    BatchCopy { failed: usize, copied: u64 },
}

impl CloneError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type Result<T> = std::result::Result<T, CloneError>;

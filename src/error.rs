//! Error types returned by every fallible operation in this crate.

use thiserror::Error;

/// The single error type returned by `oplog-store` public APIs.
///
/// Each variant corresponds to one of the error kinds named by the store
/// contract: construction failures, access-control rejections, content
/// verification failures, cache I/O, and lifecycle misuse.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity is required to initialize a store")]
    MissingIdentity,

    #[error("unable to instantiate operation log: {0}")]
    LogInit(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("entry signature or hash did not verify")]
    InvalidSignature,

    #[error("recomputed content address did not match claimed hash")]
    HashMismatch,

    #[error("timed out fetching block {0}")]
    BlockFetchTimeout(String),

    #[error("permanently failed to fetch block {0}: {1}")]
    BlockFetchPermanent(String, String),

    #[error("cache read failed: {0}")]
    CacheRead(String),

    #[error("cache write failed: {0}")]
    CacheWrite(String),

    #[error("cache close failed: {0}")]
    CacheClose(String),

    #[error("unable to decode: {0}")]
    Decode(String),

    #[error("store is closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("snapshot not found")]
    NotFound,

    #[error("append failed: {0}")]
    Append(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

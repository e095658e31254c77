//! Error types shared across the cache coordinator and lock service.

use thiserror::Error;

/// Errors surfaced by cache coordination, the remote KV substrate, and the
/// distributed lock service.
///
/// Variants are split along the line the design draws between availability
/// hazards (the remote store is flaky, a publish was dropped) and
/// correctness hazards (a value could not be serialized or deserialized).
/// Callers that only care about "did my operation succeed" can match on
/// [`CoordError::is_availability_hazard`] instead of enumerating variants.
#[derive(Error, Debug)]
pub enum CoordError {
    /// The remote KV/pub-sub substrate returned an error or could not be
    /// reached. Degraded operation (L1-only reads, skipped invalidation
    /// broadcast) is preferred over failing the caller outright.
    #[error("remote store error: {0}")]
    Remote(String),

    /// A value could not be encoded or decoded. Unlike a remote hazard this
    /// is never swallowed: a payload that can't round-trip is a bug, not a
    /// transient condition, and is propagated unchanged to the caller.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The value loader supplied to `get_or_load` returned an error.
    #[error("loader error: {0}")]
    Loader(String),

    /// A lock operation failed: the lock was held by another owner, the
    /// lease had already expired, or the backing script rejected the call.
    #[error("lock error: {0}")]
    Lock(String),

    /// A region name was used before it was registered, or a conflicting
    /// registration was attempted.
    #[error("region error: {0}")]
    Region(String),

    /// Configuration was invalid (e.g. `lock-at-most-for < lock-at-least-for`
    /// without an explicit override).
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for conditions that don't fit the variants above.
    #[error("coordination error: {0}")]
    Other(String),
}

impl CoordError {
    /// True for errors that represent a degraded-but-continuable condition
    /// (remote unavailable, publish lost) rather than a correctness bug.
    /// Callers generally log these and proceed; they should never be used
    /// to decide whether a *value* is trustworthy.
    pub fn is_availability_hazard(&self) -> bool {
        matches!(self, CoordError::Remote(_))
    }

    /// True for errors that indicate the payload itself cannot be trusted
    /// and must not be cached or served.
    pub fn is_correctness_hazard(&self) -> bool {
        matches!(self, CoordError::Serialization(_))
    }
}

impl From<redis::RedisError> for CoordError {
    fn from(err: redis::RedisError) -> Self {
        CoordError::Remote(err.to_string())
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        CoordError::Serialization(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for CoordError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CoordError::Serialization(err.to_string())
    }
}

/// Result type used throughout the crate.
pub type CoordResult<T> = Result<T, CoordError>;

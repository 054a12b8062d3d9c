//! Error types for pool operations.

use thiserror::Error;

/// Errors delivered through the `async_get` callback path.
///
/// The router itself never fails; everything that goes wrong between
/// accepting a request and binding a session arrives here.
#[derive(Debug, Clone, Error)]
pub enum GetError {
    /// The group holding this request was detached before a session could
    /// be bound, or the pool was destroyed with the request still queued.
    #[error("the containing group was detached")]
    Aborted,
    /// The group failed to spawn a worker process for this request.
    #[error("failed to spawn a worker process: {0}")]
    SpawnFailed(String),
    /// The group could not be initialized at all.
    #[error("group failed to initialize: {0}")]
    GroupInitFailed(String),
}

/// Errors produced by pool construction and administration.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

//! Process-spawning back end.

use std::sync::Arc;

use thiserror::Error;

use crate::core::options::GetOptions;

/// Why a spawn attempt failed.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The back end rejected or aborted the spawn.
    #[error("{0}")]
    Failed(String),
    /// An I/O error while creating the process or its plumbing.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Identity of a freshly created worker process.
#[derive(Debug, Clone)]
pub struct SpawnedProcess {
    /// Operating-system process id.
    pub pid: u32,
    /// Globally-unique process id assigned by the spawner.
    pub gupid: String,
}

/// Creates worker processes for one group.
///
/// `spawn_process` may block; groups run it on a registered background
/// thread, never under the pool mutex.
pub trait Spawner: Send + Sync {
    /// Create one worker process.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the process could not be created; the
    /// error text is delivered to the group's waiters.
    fn spawn_process(&self) -> Result<SpawnedProcess, SpawnError>;
}

/// Produces per-group spawners; injected at pool construction.
pub trait SpawnerFactory: Send + Sync {
    /// Create a spawner for the group described by `options`.
    fn create(&self, options: &GetOptions) -> Arc<dyn Spawner>;
}

//! # procpool
//!
//! An in-process manager for a bounded population of application worker
//! processes. The pool sits between a request-handling front end and a
//! process-spawning back end: it tracks per-application groups, enforces
//! a global capacity limit, routes `get` requests (creating groups or
//! evicting idle workers as needed), and parks callers it cannot yet
//! serve on a FIFO wait queue.
//!
//! All pool state lives behind one coarse `parking_lot` mutex; user
//! callbacks, spawns, and shutdowns are deferred to a post-lock action
//! list and run after the mutex is released. Synchronous wrappers block
//! on `Arc`-owned rendezvous tickets.
//!
//! ## Modules
//!
//! - [`core`] - the pool coordinator and its contracts
//! - [`config`] - pool configuration
//! - [`infra`] - concrete implementations of the injected contracts
//! - [`util`] - clock, telemetry, and host-metrics helpers
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use procpool::config::PoolConfig;
//! use procpool::core::{GetOptions, Pool, SpawnedProcess, Spawner, SpawnerFactory, SpawnError};
//! use procpool::infra::LocalGroupFactory;
//!
//! struct ForkSpawner;
//!
//! impl Spawner for ForkSpawner {
//!     fn spawn_process(&self) -> Result<SpawnedProcess, SpawnError> {
//!         // Launch the application process here.
//!         Ok(SpawnedProcess { pid: 4207, gupid: "4207-1f".into() })
//!     }
//! }
//!
//! struct ForkSpawnerFactory;
//!
//! impl SpawnerFactory for ForkSpawnerFactory {
//!     fn create(&self, _options: &GetOptions) -> Arc<dyn Spawner> {
//!         Arc::new(ForkSpawner)
//!     }
//! }
//!
//! let pool = Pool::new(
//!     PoolConfig::new().with_max(6),
//!     Arc::new(LocalGroupFactory),
//!     Arc::new(ForkSpawnerFactory),
//! )
//! .unwrap();
//! pool.initialize();
//!
//! let session = pool.get(&GetOptions::new("myapp")).unwrap();
//! // ... proxy one request through the session ...
//! drop(session);
//!
//! pool.destroy();
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod infra;
pub mod util;

// Re-export main types for convenience
pub use crate::config::PoolConfig;
pub use crate::core::{
    DisableResult, GetError, GetOptions, Group, GroupFactory, LifeStatus, Pool, PoolError,
    RestartMethod, Session, Spawner, SpawnerFactory, WorkerProcess,
};
pub use crate::infra::{LocalGroup, LocalGroupFactory};

//! Pool coordination: routing, capacity accounting, and lifecycle.

pub mod actions;
pub mod error;
pub mod group;
pub mod options;
pub mod pool;
pub mod process;
pub mod session;
pub mod spawner;
pub mod threads;
pub mod ticket;

pub use actions::PostLockActions;
pub use error::{AppResult, GetError, PoolError};
pub use group::{
    DisableCallback, DisableResult, Group, GroupContext, GroupFactory, RestartMethod,
    ShutdownCallback,
};
pub use options::GetOptions;
pub use pool::{
    AbortConnectionsCallback, DebugEvent, DebugSupport, GroupSnapshot, LifeStatus, Pool,
    PoolSnapshot,
};
pub use process::WorkerProcess;
pub use session::{GetCallback, GetWaiter, Session, SessionCloser};
pub use spawner::{SpawnedProcess, SpawnError, Spawner, SpawnerFactory};
pub use threads::{StopToken, ThreadRegistry};
pub use ticket::{DetachGroupWaitTicket, DisableWaitTicket, GetTicket};

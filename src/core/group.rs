//! The application-group contract.
//!
//! The pool multiplexes requests across groups but never mutates group
//! contents itself; it issues commands through this trait and reads the
//! query flags. The concrete implementation is injected via
//! [`GroupFactory`].

use std::sync::{Arc, Weak};

use crate::core::actions::PostLockActions;
use crate::core::options::GetOptions;
use crate::core::pool::Pool;
use crate::core::process::WorkerProcess;
use crate::core::session::{GetCallback, GetWaiter, Session};
use crate::core::spawner::Spawner;

/// Outcome of a `disable` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableResult {
    /// The worker was disabled immediately.
    Success,
    /// The worker is busy; the result arrives through the callback.
    Deferred,
    /// Disabling would leave the group unable to serve its waiters.
    Error,
    /// The worker does not belong to this group.
    Noop,
}

/// How a group should replace its workers on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartMethod {
    /// The group picks; currently equivalent to [`RestartMethod::Rolling`].
    #[default]
    Default,
    /// Drop every worker at once; requests wait for fresh spawns.
    Blocking,
    /// Replace workers one at a time, keeping the group serving.
    Rolling,
}

/// One-shot callback carrying the final result of a deferred disable.
pub type DisableCallback = Box<dyn FnOnce(DisableResult) + Send>;

/// One-shot callback signalling that a group finished shutting down.
pub type ShutdownCallback = Box<dyn FnOnce() + Send>;

/// A named set of interchangeable worker processes.
///
/// Every method that the pool calls while holding its own mutex must not
/// call back into the pool synchronously and must not invoke user
/// callbacks directly; side effects go through the `PostLockActions`
/// parameter where one is given, or are deferred to the group's own
/// background work.
pub trait Group: Send + Sync {
    /// Application-group name, unique within the pool.
    fn name(&self) -> &str;

    /// Stable opaque secret identifying the group to administrators.
    fn secret(&self) -> &str;

    /// Filesystem root of the application.
    fn app_root(&self) -> &str;

    /// Serve or park one request.
    ///
    /// Returns a session only when one can be bound synchronously (no-op
    /// requests, or an already-idle worker); otherwise the callback is
    /// appended to the group's own wait queue and `None` is returned.
    fn get(
        &self,
        options: &GetOptions,
        callback: GetCallback,
        actions: &mut PostLockActions,
    ) -> Option<Session>;

    /// Forcibly remove one worker from the group.
    fn detach(&self, process: &Arc<WorkerProcess>, actions: &mut PostLockActions);

    /// Take a worker out of rotation.
    ///
    /// When the result is [`DisableResult::Deferred`], `callback` fires
    /// exactly once with the final outcome; for any other result the
    /// callback is never invoked.
    fn disable(&self, process: &Arc<WorkerProcess>, callback: DisableCallback) -> DisableResult;

    /// Replace the group's workers.
    fn restart(&self, method: RestartMethod);

    /// Begin shutting the group down. `done` fires once shutdown is
    /// complete; it may be posted through `actions` or invoked later from
    /// the group's background work.
    fn shutdown(&self, done: ShutdownCallback, actions: &mut PostLockActions);

    /// Start one spawn attempt if the group is not already spawning.
    /// Called by the pool only when global capacity allows it.
    fn spawn(&self);

    /// Workers currently in rotation.
    fn enabled_processes(&self) -> Vec<Arc<WorkerProcess>>;

    /// Workers draining towards disabled.
    fn disabling_processes(&self) -> Vec<Arc<WorkerProcess>>;

    /// Workers held out of rotation.
    fn disabled_processes(&self) -> Vec<Arc<WorkerProcess>>;

    /// Slots this group occupies, including in-flight spawns.
    fn capacity_used(&self) -> u32;

    /// Total worker count across all three lists.
    fn process_count(&self) -> u32;

    /// Length of the group's own wait queue.
    fn wait_queue_len(&self) -> usize;

    /// Remove and return every parked waiter. Used by the pool to deliver
    /// abort errors when the group is detached.
    fn take_wait_queue(&self) -> Vec<GetWaiter>;

    /// Whether the group has waiters it cannot serve until the pool grants
    /// it capacity.
    fn is_waiting_for_capacity(&self) -> bool;

    /// Whether the group wants to grow within its own configured bounds.
    fn should_spawn(&self) -> bool;

    /// Whether a spawn attempt is in flight.
    fn is_spawning(&self) -> bool;

    /// Whether a restart is in progress.
    fn is_restarting(&self) -> bool;

    /// Minimum number of workers the group tries to keep.
    fn min_processes(&self) -> u32;

    /// Override the minimum worker count (used during shutdown preparation
    /// to stop respawning).
    fn set_min_processes(&self, min: u32);
}

/// Everything a group implementation needs from the pool at creation time.
pub struct GroupContext {
    /// Non-owning back reference; only the registry owns groups.
    pub pool: Weak<Pool>,
    /// The spawner produced for this group by the pool's spawner factory.
    pub spawner: Arc<dyn Spawner>,
    /// The options that caused the group to be created.
    pub options: GetOptions,
}

/// Produces group instances; injected into the pool at construction.
pub trait GroupFactory: Send + Sync {
    /// Create a group for `ctx.options.app_group_name`.
    fn create(&self, ctx: GroupContext) -> Arc<dyn Group>;
}

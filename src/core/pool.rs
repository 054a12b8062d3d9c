//! The pool coordinator.
//!
//! A single coarse mutex guards all pool state: the router's decisions
//! have to observe the group registry, the wait queue, and capacity
//! atomically, and splitting the lock would reintroduce capacity
//! accounting races. Work done under the lock is kept small instead;
//! every externally visible side effect is buffered in a
//! [`PostLockActions`] list and executed after the mutex is released.
//!
//! Lock order is `Pool::inner` before any group's internal lock, never
//! the reverse. Group implementations that need to call back into the
//! pool must do so from their own background threads or from post-lock
//! actions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::core::actions::PostLockActions;
use crate::core::error::{GetError, PoolError};
use crate::core::group::{
    DisableResult, Group, GroupContext, GroupFactory, RestartMethod,
};
use crate::core::options::GetOptions;
use crate::core::process::WorkerProcess;
use crate::core::session::{GetCallback, GetWaiter, Session};
use crate::core::spawner::SpawnerFactory;
use crate::core::threads::{StopToken, ThreadRegistry};
use crate::core::ticket::{DetachGroupWaitTicket, DisableWaitTicket, GetTicket};
use crate::util::sysmetrics::{self, SystemMetrics};

/// Callback invoked on each worker when the pool prepares for shutdown,
/// so long-running connections can be aborted.
pub type AbortConnectionsCallback = Arc<dyn Fn(&Arc<WorkerProcess>) + Send + Sync>;

/// Where the pool is in its life cycle. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeStatus {
    /// Serving requests.
    Alive,
    /// Told to exit; still serving, but workers stop respawning.
    PreparedForShutdown,
    /// `destroy` in progress.
    ShuttingDown,
    /// Fully shut down; the only state in which dropping the pool is legal.
    ShutDown,
}

impl LifeStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::PreparedForShutdown => "prepared_for_shutdown",
            Self::ShuttingDown => "shutting_down",
            Self::ShutDown => "shut_down",
        }
    }
}

/// Internal state transitions published to the debug mailbox when
/// debugging is enabled. Tests use these to observe ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// A group was created and registered.
    GroupCreated(String),
    /// A group was removed from the registry.
    GroupDetached(String),
    /// A worker was forcibly detached to free a slot.
    ProcessEvicted {
        /// Pid of the evicted worker.
        pid: u32,
        /// Name of the group it belonged to.
        group: String,
    },
    /// A request was parked on the pool-level wait queue.
    RequestQueued(String),
    /// The pool-level wait queue was walked.
    WaitlistDrained {
        /// Entries handed to a group during the walk.
        served: usize,
        /// Entries re-queued for lack of capacity.
        remaining: usize,
    },
}

/// Event mailbox installed by [`Pool::init_debugging`].
pub struct DebugSupport {
    tx: Sender<DebugEvent>,
    rx: Receiver<DebugEvent>,
}

impl DebugSupport {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A receiver for the pool's debug events.
    pub fn events(&self) -> Receiver<DebugEvent> {
        self.rx.clone()
    }

    fn publish(&self, event: DebugEvent) {
        let _ = self.tx.send(event);
    }
}

/// Serializable point-in-time view of one group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    /// Application-group name.
    pub name: String,
    /// Application root.
    pub app_root: String,
    /// Slots occupied, including in-flight spawns.
    pub capacity_used: u32,
    /// Workers across the enabled/disabling/disabled lists.
    pub process_count: u32,
    /// Requests parked on the group's own wait queue.
    pub wait_queue_len: usize,
    /// Whether a spawn attempt is in flight.
    pub spawning: bool,
    /// Whether a restart is in progress.
    pub restarting: bool,
}

/// Serializable point-in-time view of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    /// Life-cycle state.
    pub life_status: String,
    /// Configured slot limit.
    pub max: u32,
    /// Slots currently occupied across all groups.
    pub capacity_used: u32,
    /// Requests parked on the pool-level wait queue.
    pub wait_queue_len: usize,
    /// Per-group views.
    pub groups: Vec<GroupSnapshot>,
}

struct PoolInner {
    max: u32,
    max_idle_time: Duration,
    selfchecking: bool,
    life_status: LifeStatus,
    groups: HashMap<String, Arc<dyn Group>>,
    /// Requests that could not be satisfied because the pool is at full
    /// capacity and no worker was eligible for eviction, and whose group
    /// is not in the registry.
    ///
    /// Invariant 1: no entry's `app_group_name` is a registry key.
    /// Invariant 2: non-empty implies the pool is at full capacity.
    get_waitlist: Vec<GetWaiter>,
    debug: Option<Arc<DebugSupport>>,
}

impl PoolInner {
    fn capacity_used(&self) -> u32 {
        self.groups.values().map(|g| g.capacity_used()).sum()
    }

    fn at_full_capacity(&self) -> bool {
        self.capacity_used() >= self.max
    }

    fn all_processes(&self) -> Vec<Arc<WorkerProcess>> {
        let mut result = Vec::new();
        for group in self.groups.values() {
            result.extend(group.enabled_processes());
            result.extend(group.disabling_processes());
            result.extend(group.disabled_processes());
        }
        result
    }

    fn find_matching_group(&self, options: &GetOptions) -> Option<Arc<dyn Group>> {
        self.groups.get(&options.app_group_name).cloned()
    }

    fn publish(&self, event: DebugEvent) {
        if let Some(debug) = &self.debug {
            debug.publish(event);
        }
    }

    /// Cheap self-checks: the wait-queue/capacity relationship and
    /// registry membership of waiters.
    fn verify_invariants(&self) {
        if !self.selfchecking {
            return;
        }
        if !self.get_waitlist.is_empty() {
            assert!(
                self.at_full_capacity(),
                "pool wait queue is non-empty while capacity is free"
            );
        }
        for waiter in &self.get_waitlist {
            assert!(
                !self.groups.contains_key(&waiter.options.app_group_name),
                "pool wait queue holds a request for registered group {}",
                waiter.options.app_group_name
            );
        }
    }

    /// Expensive self-checks: registry keys, process lists, and back
    /// references recomputed bottom-up.
    fn verify_expensive_invariants(&self) {
        if !self.selfchecking {
            return;
        }
        let mut gupids = HashSet::new();
        for (name, group) in &self.groups {
            assert_eq!(group.name(), name, "group registered under a foreign name");
            let listed = group.enabled_processes().len()
                + group.disabling_processes().len()
                + group.disabled_processes().len();
            assert_eq!(
                listed as u32,
                group.process_count(),
                "process lists of group {name} disagree with its process_count"
            );
            for process in group.enabled_processes() {
                assert!(
                    process.is_alive(),
                    "detached process {} still enabled in group {name}",
                    process.gupid()
                );
                assert!(
                    gupids.insert(process.gupid().to_string()),
                    "gupid {} appears twice in the pool",
                    process.gupid()
                );
                if let Some(owner) = process.group().upgrade() {
                    assert_eq!(
                        owner.name(),
                        *name,
                        "process back reference points at a foreign group"
                    );
                }
            }
        }
    }

    fn full_verify_invariants(&self) {
        self.verify_invariants();
        self.verify_expensive_invariants();
    }
}

/// Coordinator for a bounded population of application worker processes.
///
/// The pool tracks per-application groups, enforces a global capacity
/// limit, routes `async_get` requests (creating groups or evicting idle
/// workers as needed), parks callers it cannot yet serve, and
/// orchestrates detach/disable/restart/shutdown.
///
/// `destroy` must be called before the last handle is dropped; dropping a
/// pool that is not shut down is a programmer error and panics.
pub struct Pool {
    /// Self-reference handed to groups as their non-owning back pointer.
    me: Weak<Pool>,
    inner: Mutex<PoolInner>,
    interruptable_threads: ThreadRegistry,
    non_interruptable_threads: ThreadRegistry,
    group_factory: Arc<dyn GroupFactory>,
    spawner_factory: Arc<dyn SpawnerFactory>,
    abort_long_running_connections: Mutex<Option<AbortConnectionsCallback>>,
    system_metrics: Option<SystemMetrics>,
}

impl Pool {
    /// Build a pool from a validated configuration and the injected group
    /// and spawner factories.
    ///
    /// System metrics are sampled once here; failure is logged and
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] when the configuration fails
    /// validation.
    pub fn new(
        config: PoolConfig,
        group_factory: Arc<dyn GroupFactory>,
        spawner_factory: Arc<dyn SpawnerFactory>,
    ) -> Result<Arc<Self>, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let system_metrics = match sysmetrics::collect() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(error = %e, "unable to collect system metrics");
                None
            }
        };

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            inner: Mutex::new(PoolInner {
                max: config.max,
                max_idle_time: config.max_idle_time(),
                selfchecking: config.self_checking,
                life_status: LifeStatus::Alive,
                groups: HashMap::new(),
                get_waitlist: Vec::new(),
                debug: None,
            }),
            interruptable_threads: ThreadRegistry::new(),
            non_interruptable_threads: ThreadRegistry::new(),
            group_factory,
            spawner_factory,
            abort_long_running_connections: Mutex::new(None),
            system_metrics,
        }))
    }

    /// Registry for background threads that are interrupted and joined on
    /// destruction.
    pub fn interruptable_threads(&self) -> &ThreadRegistry {
        &self.interruptable_threads
    }

    /// Registry for background threads that are joined, but not
    /// interrupted, on destruction.
    pub fn non_interruptable_threads(&self) -> &ThreadRegistry {
        &self.non_interruptable_threads
    }

    /// The spawner factory the pool was built with.
    pub fn spawner_factory(&self) -> &Arc<dyn SpawnerFactory> {
        &self.spawner_factory
    }

    /// Host metrics sampled at construction, if collection succeeded.
    pub fn system_metrics(&self) -> Option<&SystemMetrics> {
        self.system_metrics.as_ref()
    }

    /// Install the callback run on every worker by `prepare_for_shutdown`.
    pub fn set_abort_long_running_connections_callback(
        &self,
        callback: AbortConnectionsCallback,
    ) {
        *self.abort_long_running_connections.lock() = Some(callback);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start background housekeeping. Call right after construction.
    pub fn initialize(&self) {
        let pool = self.me.clone();
        self.interruptable_threads
            .spawn("procpool-idle-sweeper", move |stop| {
                idle_sweep_loop(&pool, &stop);
            });
    }

    /// Install a debug-event mailbox and return it.
    pub fn init_debugging(&self) -> Arc<DebugSupport> {
        let debug = Arc::new(DebugSupport::new());
        self.inner.lock().debug = Some(Arc::clone(&debug));
        debug
    }

    /// Tell workers to wind down long-running connections ahead of
    /// shutdown. Idempotent: the abort callback runs at most once per
    /// worker.
    pub fn prepare_for_shutdown(&self) {
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            match inner.life_status {
                LifeStatus::Alive => {}
                LifeStatus::PreparedForShutdown => return,
                _ => panic!("prepare_for_shutdown() called on a pool that is shutting down"),
            }
            inner.life_status = LifeStatus::PreparedForShutdown;

            let callback = self.abort_long_running_connections.lock().clone();
            if let Some(callback) = callback {
                // Zero the minimums first so aborted workers are not
                // immediately respawned.
                for group in inner.groups.values() {
                    group.set_min_processes(0);
                }
                for process in inner.all_processes() {
                    let callback = Arc::clone(&callback);
                    actions.push(Box::new(move || callback(&process)));
                }
            }
        }
        actions.run_all();
    }

    /// Tear the pool down: abort queued callers, detach every group,
    /// join background threads, and transition to `shut_down`.
    ///
    /// # Panics
    ///
    /// Panics when called in any state other than `alive` or
    /// `prepared_for_shutdown`.
    pub fn destroy(&self) {
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            assert!(
                matches!(
                    inner.life_status,
                    LifeStatus::Alive | LifeStatus::PreparedForShutdown
                ),
                "destroy() called twice"
            );
            inner.life_status = LifeStatus::ShuttingDown;

            // Nothing will serve these now; abort them before the groups
            // go away so every callback still fires exactly once.
            for waiter in inner.get_waitlist.drain(..) {
                actions.push_get_callback(waiter.callback, Err(GetError::Aborted));
            }
        }
        actions.run_all();

        loop {
            let name = {
                let inner = self.inner.lock();
                inner.groups.keys().next().cloned()
            };
            match name {
                Some(name) => {
                    self.detach_group_by_name(&name);
                }
                None => break,
            }
        }

        self.interruptable_threads.interrupt_and_join_all();
        self.non_interruptable_threads.join_all();

        let mut inner = self.inner.lock();
        inner.life_status = LifeStatus::ShutDown;
        inner.verify_invariants();
        inner.verify_expensive_invariants();
        debug!("pool shut down");
    }

    /// Current life-cycle state.
    pub fn life_status(&self) -> LifeStatus {
        self.inner.lock().life_status
    }

    // ------------------------------------------------------------------
    // Request routing
    // ------------------------------------------------------------------

    /// Route one request. The callback is invoked exactly once — with a
    /// session or an error — and never while the pool mutex is held.
    ///
    /// # Panics
    ///
    /// Panics when the pool is shutting down or shut down.
    pub fn async_get(&self, options: &GetOptions, callback: GetCallback) {
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            assert!(
                matches!(
                    inner.life_status,
                    LifeStatus::Alive | LifeStatus::PreparedForShutdown
                ),
                "async_get() called on a pool that is shutting down"
            );
            inner.verify_invariants();
            trace!(app_group = %options.app_group_name, "routing get request");

            let mut expect_full = false;
            if let Some(group) = inner.find_matching_group(options) {
                // Best case: the group is already in the pool.
                if let Some(session) = group.get(options, Arc::clone(&callback), &mut actions) {
                    actions.push_get_callback(callback, Ok(session));
                }
            } else if !inner.at_full_capacity() {
                // The group is absent and a slot is free.
                debug!(app_group = %options.app_group_name, "creating group");
                self.create_group_and_get(&mut inner, options, callback, &mut actions);
            } else if let Some(freed) = self.force_free_capacity(&mut inner, None, &mut actions) {
                // Full, but an idle worker elsewhere could be trashed.
                debug!(
                    evicted_pid = freed.pid(),
                    app_group = %options.app_group_name,
                    "evicted an idle worker to make room"
                );
                self.create_group_and_get(&mut inner, options, callback, &mut actions);
                expect_full = true;
            } else {
                // Every worker is busy, initializing, restarting, or
                // spawning. Park the request until capacity frees.
                debug!(app_group = %options.app_group_name, "pool full; queueing request");
                inner.publish(DebugEvent::RequestQueued(options.app_group_name.clone()));
                inner
                    .get_waitlist
                    .push(GetWaiter::new(options, callback));
                expect_full = true;
            }

            self.possibly_spawn_more_for_existing_groups(&mut inner);
            if expect_full {
                debug_assert!(
                    inner.at_full_capacity() || options.noop,
                    "eviction/queue path left free capacity unused"
                );
                inner.verify_expensive_invariants();
            }
            inner.verify_invariants();
        }
        actions.run_all();
    }

    /// Synchronous wrapper over [`Pool::async_get`], blocking on an
    /// `Arc`-owned rendezvous ticket.
    ///
    /// # Errors
    ///
    /// Re-raises whatever error the callback path delivered.
    pub fn get(&self, options: &GetOptions) -> Result<Session, GetError> {
        let ticket = Arc::new(GetTicket::new());
        let producer = Arc::clone(&ticket);
        self.async_get(
            options,
            Arc::new(move |result| producer.complete(result)),
        );
        ticket.wait()
    }

    /// Ensure a group exists for `options` and return it, without binding
    /// a session.
    ///
    /// # Errors
    ///
    /// Fails when the group is detached before the internal no-op request
    /// completes.
    pub fn find_or_create_group(
        &self,
        options: &GetOptions,
    ) -> Result<Arc<dyn Group>, GetError> {
        {
            let mut inner = self.inner.lock();
            if !inner.groups.contains_key(&options.app_group_name) {
                // Created on command, regardless of resource limits.
                self.create_group(&mut inner, options);
            }
        }
        let noop_options = options.clone().with_noop(true);
        let session = self.get(&noop_options)?;
        session.group().upgrade().ok_or(GetError::Aborted)
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Change the global slot limit. Raising it drains the wait queue —
    /// pool-level waiters are favored over group growth because they do
    /// not yet hold any resources — and then spawns opportunistically.
    pub fn set_max(&self, max: u32) {
        assert!(max > 0, "max must be positive");
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            inner.full_verify_invariants();
            let bigger = max > inner.max;
            inner.max = max;
            if bigger {
                self.assign_sessions_to_get_waiters(&mut inner, &mut actions);
                self.possibly_spawn_more_for_existing_groups(&mut inner);
            }
            inner.full_verify_invariants();
        }
        actions.run_all();
    }

    /// Change the idle time after which surplus workers are detached.
    pub fn set_max_idle_time(&self, value: Duration) {
        self.inner.lock().max_idle_time = value;
        self.interruptable_threads.wake_all();
    }

    /// Toggle the invariant verifier. Disabling is permitted only to
    /// reduce overhead in production.
    pub fn enable_self_checking(&self, enabled: bool) {
        self.inner.lock().selfchecking = enabled;
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Detach one worker. Returns `true` iff the worker was alive.
    pub fn detach_process(&self, process: &Arc<WorkerProcess>) -> bool {
        let mut actions = PostLockActions::new();
        let result = {
            let mut inner = self.inner.lock();
            let result = self.detach_process_under_lock(&mut inner, process, &mut actions);
            inner.full_verify_invariants();
            result
        };
        actions.run_all();
        result
    }

    /// Detach the worker with the given pid, if any.
    pub fn detach_process_by_pid(&self, pid: u32) -> bool {
        let mut actions = PostLockActions::new();
        let result = {
            let mut inner = self.inner.lock();
            match inner.all_processes().into_iter().find(|p| p.pid() == pid) {
                Some(process) => {
                    let result =
                        self.detach_process_under_lock(&mut inner, &process, &mut actions);
                    inner.full_verify_invariants();
                    result
                }
                None => false,
            }
        };
        actions.run_all();
        result
    }

    /// Detach the worker with the given gupid, if any.
    pub fn detach_process_by_gupid(&self, gupid: &str) -> bool {
        let mut actions = PostLockActions::new();
        let result = {
            let mut inner = self.inner.lock();
            match inner
                .all_processes()
                .into_iter()
                .find(|p| p.gupid() == gupid)
            {
                Some(process) => {
                    let result =
                        self.detach_process_under_lock(&mut inner, &process, &mut actions);
                    inner.full_verify_invariants();
                    result
                }
                None => false,
            }
        };
        actions.run_all();
        result
    }

    /// Detach a whole group: abort its waiters, remove it from the
    /// registry, shut it down, and block until the group signals shutdown
    /// complete. Returns `true` iff the group existed.
    pub fn detach_group_by_name(&self, name: &str) -> bool {
        let ticket = Arc::new(DetachGroupWaitTicket::new());
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            let Some(group) = inner.groups.get(name).cloned() else {
                return false;
            };
            inner.verify_invariants();
            inner.verify_expensive_invariants();

            for waiter in group.take_wait_queue() {
                actions.push_get_callback(waiter.callback, Err(GetError::Aborted));
            }

            let removed = inner.groups.remove(name).is_some();
            debug_assert!(removed, "group vanished while the lock was held");
            inner.publish(DebugEvent::GroupDetached(name.to_string()));
            debug!(app_group = name, "detaching group");

            let producer = Arc::clone(&ticket);
            group.shutdown(Box::new(move || producer.signal()), &mut actions);

            // Detaching the group freed capacity.
            self.assign_sessions_to_get_waiters(&mut inner, &mut actions);
            self.possibly_spawn_more_for_existing_groups(&mut inner);

            inner.verify_invariants();
            inner.verify_expensive_invariants();
        }
        actions.run_all();
        ticket.wait();
        true
    }

    /// Locate a group by its secret and detach it.
    pub fn detach_group_by_secret(&self, secret: &str) -> bool {
        let name = {
            let inner = self.inner.lock();
            inner
                .groups
                .values()
                .find(|g| g.secret() == secret)
                .map(|g| g.name().to_string())
        };
        match name {
            Some(name) => self.detach_group_by_name(&name),
            None => false,
        }
    }

    /// Take a worker out of rotation, blocking on the group's rendezvous
    /// when the result is deferred.
    pub fn disable_process(&self, gupid: &str) -> DisableResult {
        let inner = self.inner.lock();
        let Some(process) = inner
            .all_processes()
            .into_iter()
            .find(|p| p.gupid() == gupid)
        else {
            return DisableResult::Noop;
        };
        let Some(group) = process.group().upgrade() else {
            return DisableResult::Noop;
        };

        let ticket = Arc::new(DisableWaitTicket::new());
        let producer = Arc::clone(&ticket);
        let result = group.disable(&process, Box::new(move |result| producer.signal(result)));
        if result == DisableResult::Deferred {
            drop(inner);
            ticket.wait()
        } else {
            result
        }
    }

    /// Tell the named group to restart unless it already is. Returns
    /// `true` iff the group exists. Capacity the restart frees is handed
    /// to queued callers afterwards.
    pub fn restart_group_by_name(&self, name: &str, method: RestartMethod) -> bool {
        let mut actions = PostLockActions::new();
        let found = {
            let mut inner = self.inner.lock();
            let Some(group) = inner.groups.get(name).cloned() else {
                return false;
            };
            if !group.is_restarting() {
                group.restart(method);
            }
            self.assign_sessions_to_get_waiters(&mut inner, &mut actions);
            self.possibly_spawn_more_for_existing_groups(&mut inner);
            inner.verify_invariants();
            true
        };
        actions.run_all();
        found
    }

    /// Restart every group rooted at `app_root`. Returns how many groups
    /// were told to restart.
    pub fn restart_groups_by_app_root(
        &self,
        app_root: &str,
        method: RestartMethod,
    ) -> u32 {
        let mut actions = PostLockActions::new();
        let count = {
            let mut inner = self.inner.lock();
            let matching: Vec<_> = inner
                .groups
                .values()
                .filter(|g| g.app_root() == app_root)
                .cloned()
                .collect();
            for group in &matching {
                group.restart(method);
            }
            self.assign_sessions_to_get_waiters(&mut inner, &mut actions);
            self.possibly_spawn_more_for_existing_groups(&mut inner);
            inner.verify_invariants();
            matching.len() as u32
        };
        actions.run_all();
        count
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Slots occupied across all groups.
    pub fn capacity_used(&self) -> u32 {
        self.inner.lock().capacity_used()
    }

    /// Whether no slot is free.
    pub fn at_full_capacity(&self) -> bool {
        self.inner.lock().at_full_capacity()
    }

    /// Total workers across all groups, including disabling and disabled
    /// ones, excluding in-flight spawns.
    pub fn get_process_count(&self) -> u32 {
        let inner = self.inner.lock();
        inner.groups.values().map(|g| g.process_count()).sum()
    }

    /// Number of registered groups.
    pub fn get_group_count(&self) -> usize {
        self.inner.lock().groups.len()
    }

    /// Whether at least one group has a spawn attempt in flight.
    pub fn is_spawning(&self) -> bool {
        let inner = self.inner.lock();
        inner.groups.values().any(|g| g.is_spawning())
    }

    /// Every worker in the pool.
    pub fn get_processes(&self) -> Vec<Arc<WorkerProcess>> {
        self.inner.lock().all_processes()
    }

    /// Look a worker up by pid.
    pub fn find_process_by_pid(&self, pid: u32) -> Option<Arc<WorkerProcess>> {
        self.inner
            .lock()
            .all_processes()
            .into_iter()
            .find(|p| p.pid() == pid)
    }

    /// Look a worker up by gupid.
    pub fn find_process_by_gupid(&self, gupid: &str) -> Option<Arc<WorkerProcess>> {
        self.inner
            .lock()
            .all_processes()
            .into_iter()
            .find(|p| p.gupid() == gupid)
    }

    /// Look a group up by its secret.
    pub fn find_group_by_secret(&self, secret: &str) -> Option<Arc<dyn Group>> {
        let inner = self.inner.lock();
        inner.groups.values().find(|g| g.secret() == secret).cloned()
    }

    /// Look a group up by name.
    pub fn get_group(&self, name: &str) -> Option<Arc<dyn Group>> {
        self.inner.lock().groups.get(name).cloned()
    }

    /// A serializable view of the pool's current state.
    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock();
        let mut groups: Vec<_> = inner
            .groups
            .values()
            .map(|g| GroupSnapshot {
                name: g.name().to_string(),
                app_root: g.app_root().to_string(),
                capacity_used: g.capacity_used(),
                process_count: g.process_count(),
                wait_queue_len: g.wait_queue_len(),
                spawning: g.is_spawning(),
                restarting: g.is_restarting(),
            })
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        PoolSnapshot {
            life_status: inner.life_status.as_str().to_string(),
            max: inner.max,
            capacity_used: inner.capacity_used(),
            wait_queue_len: inner.get_waitlist.len(),
            groups,
        }
    }

    // ------------------------------------------------------------------
    // Collaborator entry points
    // ------------------------------------------------------------------

    /// Re-drain the wait queue and spawn opportunistically. Group
    /// implementations call this whenever capacity may have freed: a
    /// request finished, a spawn completed or failed, a restart finished.
    pub fn handle_freed_capacity(&self) {
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            if !matches!(
                inner.life_status,
                LifeStatus::Alive | LifeStatus::PreparedForShutdown
            ) {
                return;
            }
            inner.verify_invariants();
            self.assign_sessions_to_get_waiters(&mut inner, &mut actions);
            self.possibly_spawn_more_for_existing_groups(&mut inner);
            inner.verify_invariants();
        }
        actions.run_all();
    }

    /// Drop a group whose spawn failure left it empty (no workers, no
    /// waiters, not spawning), then re-drain. Group implementations call
    /// this after delivering spawn errors to their waiters.
    pub fn handle_spawn_failure(&self, group_name: &str) {
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            if !matches!(
                inner.life_status,
                LifeStatus::Alive | LifeStatus::PreparedForShutdown
            ) {
                return;
            }
            if let Some(group) = inner.groups.get(group_name).cloned() {
                if group.process_count() == 0
                    && group.wait_queue_len() == 0
                    && !group.is_spawning()
                {
                    debug!(app_group = group_name, "removing group that failed to initialize");
                    inner.groups.remove(group_name);
                    inner.publish(DebugEvent::GroupDetached(group_name.to_string()));
                    group.shutdown(Box::new(|| {}), &mut actions);
                }
            }
            self.assign_sessions_to_get_waiters(&mut inner, &mut actions);
            self.possibly_spawn_more_for_existing_groups(&mut inner);
            inner.verify_invariants();
        }
        actions.run_all();
    }

    // ------------------------------------------------------------------
    // Internals (all called with the pool mutex held)
    // ------------------------------------------------------------------

    fn create_group(
        &self,
        inner: &mut PoolInner,
        options: &GetOptions,
    ) -> Arc<dyn Group> {
        let spawner = self.spawner_factory.create(options);
        let group = self.group_factory.create(GroupContext {
            pool: self.me.clone(),
            spawner,
            options: options.clone(),
        });
        inner
            .groups
            .insert(options.app_group_name.clone(), Arc::clone(&group));
        inner.publish(DebugEvent::GroupCreated(options.app_group_name.clone()));
        self.interruptable_threads.wake_all();
        group
    }

    fn create_group_and_get(
        &self,
        inner: &mut PoolInner,
        options: &GetOptions,
        callback: GetCallback,
        actions: &mut PostLockActions,
    ) -> Arc<dyn Group> {
        let group = self.create_group(inner, options);
        if let Some(session) = group.get(options, Arc::clone(&callback), actions) {
            // A fresh group can only satisfy no-op requests synchronously.
            debug_assert!(options.noop);
            actions.push_get_callback(callback, Ok(session));
        }
        group
    }

    /// Walk the pool-level wait queue once, in FIFO order, handing each
    /// entry to its group (existing or newly created) while capacity
    /// allows. Entries that still cannot be served are re-queued in
    /// order.
    fn assign_sessions_to_get_waiters(
        &self,
        inner: &mut PoolInner,
        actions: &mut PostLockActions,
    ) {
        if inner.get_waitlist.is_empty() {
            return;
        }
        let waiters = std::mem::take(&mut inner.get_waitlist);
        let total = waiters.len();
        let mut still_waiting = Vec::new();

        for waiter in waiters {
            if let Some(group) = inner.find_matching_group(&waiter.options) {
                if let Some(session) =
                    group.get(&waiter.options, Arc::clone(&waiter.callback), actions)
                {
                    actions.push_get_callback(waiter.callback, Ok(session));
                }
            } else if !inner.at_full_capacity() {
                self.create_group_and_get(inner, &waiter.options, waiter.callback, actions);
            } else {
                still_waiting.push(waiter);
            }
        }

        let remaining = still_waiting.len();
        inner.get_waitlist = still_waiting;
        inner.publish(DebugEvent::WaitlistDrained {
            served: total - remaining,
            remaining,
        });
    }

    /// Two passes over the groups: first the ones starved for capacity
    /// (they have pending clients), then the ones that merely want to
    /// grow. Capacity is checked before every spawn command so `max` is
    /// never exceeded.
    fn possibly_spawn_more_for_existing_groups(&self, inner: &mut PoolInner) {
        if !matches!(
            inner.life_status,
            LifeStatus::Alive | LifeStatus::PreparedForShutdown
        ) {
            return;
        }
        let groups: Vec<_> = inner.groups.values().cloned().collect();
        for group in &groups {
            if inner.at_full_capacity() {
                return;
            }
            if group.is_waiting_for_capacity() {
                debug!(app_group = group.name(), "group is waiting for capacity");
                group.spawn();
            }
        }
        for group in &groups {
            if inner.at_full_capacity() {
                return;
            }
            if group.should_spawn() {
                debug!(app_group = group.name(), "group wants to grow");
                group.spawn();
            }
        }
    }

    /// Pick the globally oldest idle worker, ties broken by gupid, and
    /// detach it to free one slot. Workers whose group still has waiters
    /// are not eligible — trashing them would be unfair to that group.
    fn force_free_capacity(
        &self,
        inner: &mut PoolInner,
        exclude_group: Option<&str>,
        actions: &mut PostLockActions,
    ) -> Option<Arc<WorkerProcess>> {
        let process = find_oldest_idle_process(inner, exclude_group)?;
        let group = process.group().upgrade()?;
        debug_assert_eq!(group.wait_queue_len(), 0);

        debug!(
            pid = process.pid(),
            app_group = group.name(),
            "forcefully detaching idle worker to free capacity"
        );
        inner.publish(DebugEvent::ProcessEvicted {
            pid: process.pid(),
            group: group.name().to_string(),
        });
        group.detach(&process, actions);
        Some(process)
    }

    fn detach_process_under_lock(
        &self,
        inner: &mut PoolInner,
        process: &Arc<WorkerProcess>,
        actions: &mut PostLockActions,
    ) -> bool {
        if !process.is_alive() {
            return false;
        }
        inner.verify_invariants();

        let Some(group) = process.group().upgrade() else {
            return false;
        };
        group.detach(process, actions);
        // The handle is stale from here on.
        self.assign_sessions_to_get_waiters(inner, actions);
        self.possibly_spawn_more_for_existing_groups(inner);

        inner.verify_invariants();
        inner.verify_expensive_invariants();
        true
    }

    fn next_sweep_interval(&self) -> Duration {
        let inner = self.inner.lock();
        if inner.max_idle_time.is_zero() {
            return Duration::from_secs(3600);
        }
        let mut next = inner.max_idle_time;
        for group in inner.groups.values() {
            for process in group.enabled_processes() {
                if !process.is_idle() {
                    continue;
                }
                let remaining = inner
                    .max_idle_time
                    .saturating_sub(process.idle_duration());
                next = next.min(remaining);
            }
        }
        next.max(Duration::from_millis(10))
    }

    /// Detach workers that have been idle longer than `max_idle_time`,
    /// never shrinking a group below its minimum.
    fn sweep_idle_processes(&self) {
        let mut actions = PostLockActions::new();
        {
            let mut inner = self.inner.lock();
            if inner.life_status != LifeStatus::Alive || inner.max_idle_time.is_zero() {
                return;
            }
            inner.verify_invariants();

            let mut victims = Vec::new();
            for group in inner.groups.values() {
                let enabled = group.enabled_processes();
                let mut surplus =
                    enabled.len() as i64 - i64::from(group.min_processes());
                if surplus <= 0 {
                    continue;
                }
                let mut expired: Vec<_> = enabled
                    .into_iter()
                    .filter(|p| {
                        p.is_alive()
                            && p.is_idle()
                            && p.idle_duration() >= inner.max_idle_time
                    })
                    .collect();
                expired.sort_by_key(|p| (p.last_used(), p.gupid().to_string()));
                for process in expired {
                    if surplus <= 0 {
                        break;
                    }
                    victims.push(process);
                    surplus -= 1;
                }
            }

            for process in victims {
                if let Some(group) = process.group().upgrade() {
                    debug!(
                        pid = process.pid(),
                        app_group = group.name(),
                        "detaching worker idle beyond max_idle_time"
                    );
                    group.detach(&process, &mut actions);
                }
            }

            self.assign_sessions_to_get_waiters(&mut inner, &mut actions);
            self.possibly_spawn_more_for_existing_groups(&mut inner);
            inner.verify_invariants();
        }
        actions.run_all();
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.life_status != LifeStatus::ShutDown && !std::thread::panicking() {
            panic!("Pool dropped without calling destroy() first");
        }
    }
}

/// Globally oldest idle worker outside `exclude_group`, selected by
/// `(last_used, gupid)` ascending so the choice is deterministic.
fn find_oldest_idle_process(
    inner: &PoolInner,
    exclude_group: Option<&str>,
) -> Option<Arc<WorkerProcess>> {
    let mut oldest: Option<Arc<WorkerProcess>> = None;
    for (name, group) in &inner.groups {
        if exclude_group == Some(name.as_str()) {
            continue;
        }
        if group.wait_queue_len() > 0 {
            continue;
        }
        for process in group.enabled_processes() {
            if !process.is_alive() || !process.is_idle() {
                continue;
            }
            let better = match &oldest {
                None => true,
                Some(current) => {
                    (process.last_used(), process.gupid())
                        < (current.last_used(), current.gupid())
                }
            };
            if better {
                oldest = Some(process);
            }
        }
    }
    oldest
}

fn idle_sweep_loop(pool: &Weak<Pool>, stop: &StopToken) {
    loop {
        let interval = match pool.upgrade() {
            Some(pool) => pool.next_sweep_interval(),
            None => return,
        };
        if stop.wait_timeout(interval) {
            return;
        }
        let Some(pool) = pool.upgrade() else { return };
        pool.sweep_idle_processes();
    }
}

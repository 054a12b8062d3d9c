//! In-process reference implementation of the group contract.
//!
//! `LocalGroup` keeps the three worker lists, a FIFO wait queue, and the
//! spawn/restart/disable state behind one small mutex. All spawning is
//! pool-commanded: the group never starts a spawn on its own, it only
//! reports `should_spawn`/`is_waiting_for_capacity` and acts when the
//! pool calls [`Group::spawn`].
//!
//! Lock discipline: the pool mutex is always taken before this group's
//! state mutex, never after. Methods running outside the pool lock
//! (spawn completion, session close) release the state mutex before
//! invoking callbacks or calling back into the pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::actions::PostLockActions;
use crate::core::error::GetError;
use crate::core::group::{
    DisableCallback, DisableResult, Group, GroupContext, GroupFactory, RestartMethod,
    ShutdownCallback,
};
use crate::core::options::GetOptions;
use crate::core::pool::Pool;
use crate::core::process::WorkerProcess;
use crate::core::session::{GetCallback, GetWaiter, Session};
use crate::core::spawner::{SpawnedProcess, Spawner};
use crate::util::clock::now_ms;

fn generate_secret() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:012x}-{:06x}", now_ms(), seq)
}

struct GroupState {
    enabled: Vec<Arc<WorkerProcess>>,
    disabling: Vec<Arc<WorkerProcess>>,
    disabled: Vec<Arc<WorkerProcess>>,
    wait_queue: VecDeque<GetWaiter>,
    min_processes: u32,
    spawning: bool,
    restarting: bool,
    shutting_down: bool,
    /// Deferred disable callbacks keyed by gupid, fired when the worker
    /// finishes draining (or is detached).
    pending_disables: Vec<(String, DisableCallback)>,
    /// Shutdown-complete callback parked until an in-flight spawn lands.
    pending_shutdown: Option<ShutdownCallback>,
}

/// A named set of interchangeable worker processes, managed in-process.
pub struct LocalGroup {
    name: String,
    secret: String,
    app_root: String,
    pool: Weak<Pool>,
    spawner: Arc<dyn Spawner>,
    me: Weak<LocalGroup>,
    state: Mutex<GroupState>,
}

impl LocalGroup {
    /// Build a group from the pool-provided context.
    pub fn new(ctx: GroupContext) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: ctx.options.app_group_name.clone(),
            secret: generate_secret(),
            app_root: ctx.options.app_root.clone(),
            pool: ctx.pool,
            spawner: ctx.spawner,
            me: me.clone(),
            state: Mutex::new(GroupState {
                enabled: Vec::new(),
                disabling: Vec::new(),
                disabled: Vec::new(),
                wait_queue: VecDeque::new(),
                min_processes: ctx.options.min_processes,
                spawning: false,
                restarting: false,
                shutting_down: false,
                pending_disables: Vec::new(),
                pending_shutdown: None,
            }),
        })
    }

    fn as_group_weak(&self) -> Weak<dyn Group> {
        self.me.clone()
    }

    /// Lease `process` for one request. Does not touch the state mutex.
    fn bind_session(&self, process: Arc<WorkerProcess>) -> Session {
        process.session_opened();
        let me = self.me.clone();
        let handle = Arc::clone(&process);
        Session::new(
            self.as_group_weak(),
            process,
            Box::new(move || {
                handle.session_closed();
                if let Some(group) = me.upgrade() {
                    group.on_session_closed(&handle);
                }
            }),
        )
    }

    /// One blocking spawn attempt, run on a registered background thread.
    fn run_spawn(&self) {
        debug!(app_group = %self.name, "spawning worker process");
        match self.spawner.spawn_process() {
            Ok(spawned) => self.finish_spawn(spawned),
            Err(error) => self.fail_spawn(error.to_string()),
        }
    }

    fn finish_spawn(&self, spawned: SpawnedProcess) {
        let process = WorkerProcess::new(spawned.pid, spawned.gupid, self.as_group_weak());
        let mut serve = None;
        let mut shutdown_done = None;
        {
            let mut st = self.state.lock();
            st.spawning = false;
            if st.shutting_down {
                // The group was detached while we were spawning; the
                // worker never enters rotation.
                process.mark_detached();
                shutdown_done = st.pending_shutdown.take();
            } else {
                debug!(app_group = %self.name, pid = process.pid(), "worker ready");
                st.enabled.push(Arc::clone(&process));
                st.restarting = false;
                if let Some(waiter) = st.wait_queue.pop_front() {
                    serve = Some((self.bind_session(Arc::clone(&process)), waiter.callback));
                }
            }
        }
        if let Some((session, callback)) = serve {
            callback(Ok(session));
        }
        if let Some(done) = shutdown_done {
            done();
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_freed_capacity();
        }
    }

    fn fail_spawn(&self, message: String) {
        warn!(app_group = %self.name, error = %message, "spawn failed");
        let waiters;
        let shutdown_done;
        let never_initialized;
        {
            let mut st = self.state.lock();
            st.spawning = false;
            st.restarting = false;
            waiters = st.wait_queue.drain(..).collect::<Vec<_>>();
            // A failure that leaves the group without a single worker means
            // the group never initialized; the pool will drop it from the
            // registry, and waiters learn they raced a stillborn group.
            never_initialized = st.enabled.is_empty()
                && st.disabling.is_empty()
                && st.disabled.is_empty()
                && !st.shutting_down;
            shutdown_done = if st.shutting_down {
                st.pending_shutdown.take()
            } else {
                None
            };
        }
        let error = if never_initialized {
            GetError::GroupInitFailed(message)
        } else {
            GetError::SpawnFailed(message)
        };
        for waiter in waiters {
            (waiter.callback)(Err(error.clone()));
        }
        if let Some(done) = shutdown_done {
            done();
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_spawn_failure(&self.name);
        }
    }

    /// Bookkeeping when a session lease is released.
    fn on_session_closed(&self, process: &Arc<WorkerProcess>) {
        let mut ready_disables = Vec::new();
        let mut serve = None;
        {
            let mut st = self.state.lock();
            if process.is_idle() {
                if let Some(idx) = st
                    .disabling
                    .iter()
                    .position(|p| Arc::ptr_eq(p, process))
                {
                    // The worker finished draining.
                    let worker = st.disabling.remove(idx);
                    st.disabled.push(worker);
                    take_pending_disables(&mut st, process.gupid(), &mut ready_disables);
                } else if st.restarting {
                    // Rolling restart: the old worker leaves rotation as
                    // soon as it goes idle.
                    if let Some(idx) =
                        st.enabled.iter().position(|p| Arc::ptr_eq(p, process))
                    {
                        let worker = st.enabled.remove(idx);
                        worker.mark_detached();
                    }
                } else if !st.shutting_down && process.is_alive() {
                    if let Some(waiter) = st.wait_queue.pop_front() {
                        serve =
                            Some((self.bind_session(Arc::clone(process)), waiter.callback));
                    }
                }
            }
        }
        for callback in ready_disables {
            callback(DisableResult::Success);
        }
        if let Some((session, callback)) = serve {
            callback(Ok(session));
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_freed_capacity();
        }
    }
}

fn take_pending_disables(
    st: &mut GroupState,
    gupid: &str,
    out: &mut Vec<DisableCallback>,
) {
    let mut i = 0;
    while i < st.pending_disables.len() {
        if st.pending_disables[i].0 == gupid {
            out.push(st.pending_disables.remove(i).1);
        } else {
            i += 1;
        }
    }
}

impl Group for LocalGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn secret(&self) -> &str {
        &self.secret
    }

    fn app_root(&self) -> &str {
        &self.app_root
    }

    fn get(
        &self,
        options: &GetOptions,
        callback: GetCallback,
        _actions: &mut PostLockActions,
    ) -> Option<Session> {
        let mut st = self.state.lock();
        if options.noop {
            return Some(Session::noop(self.as_group_weak()));
        }
        if !st.restarting {
            let idle = st
                .enabled
                .iter()
                .find(|p| p.is_alive() && p.is_idle())
                .cloned();
            if let Some(process) = idle {
                return Some(self.bind_session(process));
            }
        }
        st.wait_queue.push_back(GetWaiter::new(options, callback));
        None
    }

    fn detach(&self, process: &Arc<WorkerProcess>, actions: &mut PostLockActions) {
        let mut ready_disables = Vec::new();
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            for list in [&mut st.enabled, &mut st.disabling, &mut st.disabled] {
                if let Some(idx) = list.iter().position(|p| Arc::ptr_eq(p, process)) {
                    list.remove(idx);
                    break;
                }
            }
            take_pending_disables(st, process.gupid(), &mut ready_disables);
        }
        process.mark_detached();
        for callback in ready_disables {
            actions.push(Box::new(move || callback(DisableResult::Success)));
        }
    }

    fn disable(&self, process: &Arc<WorkerProcess>, callback: DisableCallback) -> DisableResult {
        let mut st = self.state.lock();
        if let Some(idx) = st.enabled.iter().position(|p| Arc::ptr_eq(p, process)) {
            if process.is_idle() {
                let worker = st.enabled.remove(idx);
                st.disabled.push(worker);
                DisableResult::Success
            } else if st.enabled.len() == 1 && !st.wait_queue.is_empty() {
                // Draining the sole server would strand the waiters.
                DisableResult::Error
            } else {
                let worker = st.enabled.remove(idx);
                st.disabling.push(worker);
                st.pending_disables
                    .push((process.gupid().to_string(), callback));
                DisableResult::Deferred
            }
        } else if st.disabling.iter().any(|p| Arc::ptr_eq(p, process)) {
            st.pending_disables
                .push((process.gupid().to_string(), callback));
            DisableResult::Deferred
        } else {
            DisableResult::Noop
        }
    }

    fn restart(&self, method: RestartMethod) {
        let mut st = self.state.lock();
        if st.shutting_down {
            return;
        }
        debug!(app_group = %self.name, ?method, "restarting group");
        st.restarting = true;
        let victims: Vec<Arc<WorkerProcess>> = match method {
            RestartMethod::Blocking => {
                let mut victims: Vec<_> = st.enabled.drain(..).collect();
                victims.extend(st.disabling.drain(..));
                victims.extend(st.disabled.drain(..));
                victims
            }
            RestartMethod::Default | RestartMethod::Rolling => {
                let (idle, busy): (Vec<_>, Vec<_>) =
                    st.enabled.drain(..).partition(|p| p.is_idle());
                st.enabled = busy;
                idle
            }
        };
        for process in &victims {
            process.mark_detached();
        }
        if st.min_processes == 0 && st.wait_queue.is_empty() && st.enabled.is_empty() {
            // Nothing will respawn, so there is nothing to wait for.
            st.restarting = false;
        }
    }

    fn shutdown(&self, done: ShutdownCallback, actions: &mut PostLockActions) {
        let mut st = self.state.lock();
        st.shutting_down = true;
        debug_assert!(
            st.wait_queue.is_empty(),
            "group shut down with waiters still parked"
        );
        let mut victims: Vec<_> = st.enabled.drain(..).collect();
        victims.extend(st.disabling.drain(..));
        victims.extend(st.disabled.drain(..));
        for process in &victims {
            process.mark_detached();
        }
        for (_, callback) in st.pending_disables.drain(..) {
            actions.push(Box::new(move || callback(DisableResult::Success)));
        }
        if st.spawning {
            st.pending_shutdown = Some(done);
        } else {
            actions.push(done);
        }
    }

    fn spawn(&self) {
        let mut st = self.state.lock();
        if st.spawning || st.shutting_down {
            return;
        }
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        st.spawning = true;
        drop(st);
        let me = self.me.clone();
        pool.non_interruptable_threads()
            .spawn(&format!("procpool-spawn-{}", self.name), move |_stop| {
                if let Some(group) = me.upgrade() {
                    group.run_spawn();
                }
            });
    }

    fn enabled_processes(&self) -> Vec<Arc<WorkerProcess>> {
        self.state.lock().enabled.clone()
    }

    fn disabling_processes(&self) -> Vec<Arc<WorkerProcess>> {
        self.state.lock().disabling.clone()
    }

    fn disabled_processes(&self) -> Vec<Arc<WorkerProcess>> {
        self.state.lock().disabled.clone()
    }

    fn capacity_used(&self) -> u32 {
        let st = self.state.lock();
        (st.enabled.len() + st.disabling.len() + st.disabled.len()) as u32
            + u32::from(st.spawning)
    }

    fn process_count(&self) -> u32 {
        let st = self.state.lock();
        (st.enabled.len() + st.disabling.len() + st.disabled.len()) as u32
    }

    fn wait_queue_len(&self) -> usize {
        self.state.lock().wait_queue.len()
    }

    fn take_wait_queue(&self) -> Vec<GetWaiter> {
        self.state.lock().wait_queue.drain(..).collect()
    }

    fn is_waiting_for_capacity(&self) -> bool {
        let st = self.state.lock();
        !st.wait_queue.is_empty() && !st.spawning && !st.shutting_down
    }

    fn should_spawn(&self) -> bool {
        let st = self.state.lock();
        !st.spawning && !st.shutting_down && (st.enabled.len() as u32) < st.min_processes
    }

    fn is_spawning(&self) -> bool {
        self.state.lock().spawning
    }

    fn is_restarting(&self) -> bool {
        self.state.lock().restarting
    }

    fn min_processes(&self) -> u32 {
        self.state.lock().min_processes
    }

    fn set_min_processes(&self, min: u32) {
        self.state.lock().min_processes = min;
    }
}

/// Produces [`LocalGroup`] instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalGroupFactory;

impl GroupFactory for LocalGroupFactory {
    fn create(&self, ctx: GroupContext) -> Arc<dyn Group> {
        LocalGroup::new(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spawner::SpawnError;
    use std::sync::atomic::AtomicU32;

    struct SeqSpawner {
        pids: AtomicU32,
    }

    impl Spawner for SeqSpawner {
        fn spawn_process(&self) -> Result<SpawnedProcess, SpawnError> {
            let pid = self.pids.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SpawnedProcess {
                pid,
                gupid: format!("gupid-{pid}"),
            })
        }
    }

    fn orphan_group(name: &str) -> Arc<LocalGroup> {
        LocalGroup::new(GroupContext {
            pool: Weak::new(),
            spawner: Arc::new(SeqSpawner {
                pids: AtomicU32::new(0),
            }),
            options: GetOptions::new(name),
        })
    }

    fn add_worker(group: &Arc<LocalGroup>, pid: u32) -> Arc<WorkerProcess> {
        group.finish_spawn(SpawnedProcess {
            pid,
            gupid: format!("gupid-{pid}"),
        });
        group
            .enabled_processes()
            .into_iter()
            .find(|p| p.pid() == pid)
            .expect("worker just added")
    }

    #[test]
    fn test_noop_get_binds_no_worker() {
        let group = orphan_group("app");
        let mut actions = PostLockActions::new();
        let session = group
            .get(
                &GetOptions::new("app").with_noop(true),
                Arc::new(|_| {}),
                &mut actions,
            )
            .expect("noop get is synchronous");
        assert!(session.is_noop());
        assert_eq!(group.process_count(), 0);
        actions.run_all();
    }

    #[test]
    fn test_idle_worker_is_reused() {
        let group = orphan_group("app");
        let worker = add_worker(&group, 1);
        let mut actions = PostLockActions::new();
        let session = group
            .get(&GetOptions::new("app"), Arc::new(|_| {}), &mut actions)
            .expect("idle worker available");
        assert_eq!(session.process().unwrap().pid(), worker.pid());
        assert!(!worker.is_idle());
        drop(session);
        assert!(worker.is_idle());
        actions.run_all();
    }

    #[test]
    fn test_busy_group_parks_the_request() {
        let group = orphan_group("app");
        let _worker = add_worker(&group, 1);
        let mut actions = PostLockActions::new();
        let options = GetOptions::new("app");
        let held = group
            .get(&options, Arc::new(|_| {}), &mut actions)
            .expect("first request binds");
        assert!(group
            .get(&options, Arc::new(|_| {}), &mut actions)
            .is_none());
        assert_eq!(group.wait_queue_len(), 1);
        assert!(group.is_waiting_for_capacity());
        drop(held);
        actions.run_all();
    }

    #[test]
    fn test_disable_idle_worker_succeeds_immediately() {
        let group = orphan_group("app");
        let worker = add_worker(&group, 1);
        let result = group.disable(&worker, Box::new(|_| {}));
        assert_eq!(result, DisableResult::Success);
        assert_eq!(group.enabled_processes().len(), 0);
        assert_eq!(group.disabled_processes().len(), 1);
    }

    #[test]
    fn test_disable_busy_worker_defers_until_drained() {
        let group = orphan_group("app");
        let worker = add_worker(&group, 1);
        let mut actions = PostLockActions::new();
        let session = group
            .get(&GetOptions::new("app"), Arc::new(|_| {}), &mut actions)
            .unwrap();

        let signalled = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&signalled);
        let result = group.disable(
            &worker,
            Box::new(move |r| {
                *slot.lock() = Some(r);
            }),
        );
        assert_eq!(result, DisableResult::Deferred);
        assert!(signalled.lock().is_none());

        drop(session);
        assert_eq!(*signalled.lock(), Some(DisableResult::Success));
        assert_eq!(group.disabled_processes().len(), 1);
        actions.run_all();
    }

    #[test]
    fn test_disable_unknown_worker_is_noop() {
        let group = orphan_group("app");
        let other = orphan_group("other");
        let stranger = add_worker(&other, 9);
        assert_eq!(
            group.disable(&stranger, Box::new(|_| {})),
            DisableResult::Noop
        );
    }

    #[test]
    fn test_blocking_restart_drops_all_workers() {
        let group = orphan_group("app");
        let a = add_worker(&group, 1);
        let b = add_worker(&group, 2);
        group.restart(RestartMethod::Blocking);
        assert_eq!(group.process_count(), 0);
        assert!(!a.is_alive());
        assert!(!b.is_alive());
    }

    #[test]
    fn test_rolling_restart_keeps_busy_workers_until_idle() {
        let group = orphan_group("app");
        let busy = add_worker(&group, 1);
        let _idle = add_worker(&group, 2);
        let mut actions = PostLockActions::new();
        let session = group
            .get(&GetOptions::new("app"), Arc::new(|_| {}), &mut actions)
            .unwrap();
        group.restart(RestartMethod::Rolling);
        // The idle worker left immediately; the busy one serves on.
        assert_eq!(group.enabled_processes().len(), 1);
        assert!(busy.is_alive());
        drop(session);
        assert_eq!(group.enabled_processes().len(), 0);
        assert!(!busy.is_alive());
        actions.run_all();
    }

    #[test]
    fn test_shutdown_signals_done_through_actions() {
        let group = orphan_group("app");
        let _worker = add_worker(&group, 1);
        let mut actions = PostLockActions::new();
        let done = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&done);
        group.shutdown(
            Box::new(move || {
                *flag.lock() = true;
            }),
            &mut actions,
        );
        assert!(!*done.lock());
        actions.run_all();
        assert!(*done.lock());
        assert_eq!(group.process_count(), 0);
    }

    #[test]
    fn test_secrets_are_unique() {
        let a = orphan_group("a");
        let b = orphan_group("b");
        assert_ne!(a.secret(), b.secret());
    }
}

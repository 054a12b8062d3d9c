//! Worker process handles.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::group::Group;

/// One operating-system process hosting an application instance.
///
/// Workers are owned by their group; the pool reaches them only by
/// traversing groups and treats any handle as potentially stale after a
/// detach. The struct is therefore all shared-state: atomics for the hot
/// counters and a small mutex for the idle timestamp.
pub struct WorkerProcess {
    pid: u32,
    gupid: String,
    group: Weak<dyn Group>,
    /// Number of sessions currently bound to this worker.
    sessions: AtomicU32,
    alive: AtomicBool,
    last_used: Mutex<Instant>,
    spawned_at: Instant,
}

impl WorkerProcess {
    /// Create a handle owned by `group`.
    pub fn new(pid: u32, gupid: impl Into<String>, group: Weak<dyn Group>) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            pid,
            gupid: gupid.into(),
            group,
            sessions: AtomicU32::new(0),
            alive: AtomicBool::new(true),
            last_used: Mutex::new(now),
            spawned_at: now,
        })
    }

    /// Operating-system process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Globally-unique process id, stable across reports.
    pub fn gupid(&self) -> &str {
        &self.gupid
    }

    /// The owning group. Upgrading fails once the group has been dropped
    /// by everyone, which only happens after a detach.
    pub fn group(&self) -> Weak<dyn Group> {
        Weak::clone(&self.group)
    }

    /// Whether the process has not been detached.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the process as detached. Idempotent.
    pub fn mark_detached(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Whether no session is currently bound.
    pub fn is_idle(&self) -> bool {
        self.sessions.load(Ordering::Acquire) == 0
    }

    /// Number of sessions currently bound.
    pub fn session_count(&self) -> u32 {
        self.sessions.load(Ordering::Acquire)
    }

    /// Account for a newly bound session.
    pub fn session_opened(&self) {
        self.sessions.fetch_add(1, Ordering::AcqRel);
    }

    /// Account for a closed session and refresh the idle timestamp.
    pub fn session_closed(&self) {
        self.sessions.fetch_sub(1, Ordering::AcqRel);
        *self.last_used.lock() = Instant::now();
    }

    /// Instant of the last session close (or spawn, if never used).
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    /// How long the worker has been idle. Zero while busy.
    pub fn idle_duration(&self) -> Duration {
        if self.is_idle() {
            self.last_used().elapsed()
        } else {
            Duration::ZERO
        }
    }

    /// Instant the worker was spawned.
    pub fn spawned_at(&self) -> Instant {
        self.spawned_at
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.pid)
            .field("gupid", &self.gupid)
            .field("sessions", &self.session_count())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(pid: u32, gupid: &str) -> Arc<WorkerProcess> {
        // A process with no owning group, good enough for handle-level tests.
        let group: Weak<dyn Group> = Weak::<crate::infra::LocalGroup>::new();
        WorkerProcess::new(pid, gupid, group)
    }

    #[test]
    fn test_idle_tracking() {
        let process = orphan(100, "g-100");
        assert!(process.is_idle());
        process.session_opened();
        assert!(!process.is_idle());
        assert_eq!(process.idle_duration(), Duration::ZERO);
        process.session_closed();
        assert!(process.is_idle());
    }

    #[test]
    fn test_detach_is_idempotent() {
        let process = orphan(101, "g-101");
        assert!(process.is_alive());
        process.mark_detached();
        process.mark_detached();
        assert!(!process.is_alive());
    }

    #[test]
    fn test_last_used_advances_on_close() {
        let process = orphan(102, "g-102");
        let before = process.last_used();
        process.session_opened();
        std::thread::sleep(Duration::from_millis(5));
        process.session_closed();
        assert!(process.last_used() > before);
    }
}

//! Sessions and the callback types that deliver them.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::error::GetError;
use crate::core::group::Group;
use crate::core::options::GetOptions;
use crate::core::process::WorkerProcess;

/// Callback invoked exactly once per `async_get` request, with either a
/// bound session or an error.
pub type GetCallback = Arc<dyn Fn(Result<Session, GetError>) + Send + Sync>;

/// Hook run when a session is closed or dropped.
pub type SessionCloser = Box<dyn FnOnce() + Send>;

/// A bound lease of one worker for one request.
///
/// The pool treats sessions as opaque; the owning group constructs them
/// and decides what closing means. No-op sessions carry no worker at all,
/// only the group that satisfied the request.
pub struct Session {
    group: Weak<dyn Group>,
    process: Option<Arc<WorkerProcess>>,
    closer: Mutex<Option<SessionCloser>>,
}

impl Session {
    /// A session bound to `process`, running `closer` once on close.
    pub fn new(
        group: Weak<dyn Group>,
        process: Arc<WorkerProcess>,
        closer: SessionCloser,
    ) -> Self {
        Self {
            group,
            process: Some(process),
            closer: Mutex::new(Some(closer)),
        }
    }

    /// A no-op session: the group exists, no worker is leased.
    pub fn noop(group: Weak<dyn Group>) -> Self {
        Self {
            group,
            process: None,
            closer: Mutex::new(None),
        }
    }

    /// The group that satisfied the request.
    pub fn group(&self) -> Weak<dyn Group> {
        Weak::clone(&self.group)
    }

    /// The leased worker, absent for no-op sessions.
    pub fn process(&self) -> Option<&Arc<WorkerProcess>> {
        self.process.as_ref()
    }

    /// Whether this session leases no worker.
    pub fn is_noop(&self) -> bool {
        self.process.is_none()
    }

    /// Release the lease. Dropping the session has the same effect.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(closer) = self.closer.lock().take() {
            closer();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("noop", &self.is_noop())
            .field("pid", &self.process.as_ref().map(|p| p.pid()))
            .finish()
    }
}

/// A parked `async_get` request: persisted options plus the pending
/// callback. Insertion order on a wait queue is the service order.
pub struct GetWaiter {
    /// Options deep-copied and detached from any transaction context.
    pub options: GetOptions,
    /// The caller's callback, still owed exactly one invocation.
    pub callback: GetCallback,
}

impl GetWaiter {
    /// Park `callback` under a persisted copy of `options`.
    pub fn new(options: &GetOptions, callback: GetCallback) -> Self {
        Self {
            options: options.copy_and_persist().detach_from_transaction(),
            callback,
        }
    }
}

impl std::fmt::Debug for GetWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetWaiter")
            .field("app_group_name", &self.options.app_group_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_close_runs_closer_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let group: Weak<dyn Group> = Weak::<crate::infra::LocalGroup>::new();
        let process = WorkerProcess::new(1, "g-1", Weak::clone(&group));
        let session = Session::new(
            group,
            process,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        session.close();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_noop_session_has_no_process() {
        let group: Weak<dyn Group> = Weak::<crate::infra::LocalGroup>::new();
        let session = Session::noop(group);
        assert!(session.is_noop());
        assert!(session.process().is_none());
    }
}

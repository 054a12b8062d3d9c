//! Deferred side effects.

use crate::core::error::GetError;
use crate::core::session::{GetCallback, Session};

/// Side-effecting callbacks buffered while the pool mutex is held and run
/// after it is released.
///
/// Callbacks may acquire other locks, block on I/O, or call back into the
/// pool; running them under the pool mutex would deadlock. Every public
/// pool method builds one of these, drains it after unlocking, and only
/// then returns.
#[derive(Default)]
pub struct PostLockActions {
    actions: Vec<Box<dyn FnOnce() + Send>>,
}

impl PostLockActions {
    /// An empty action list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer an arbitrary callable.
    pub fn push(&mut self, action: Box<dyn FnOnce() + Send>) {
        self.actions.push(action);
    }

    /// Defer one invocation of a get callback.
    pub fn push_get_callback(&mut self, callback: GetCallback, result: Result<Session, GetError>) {
        self.actions.push(Box::new(move || callback(result)));
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no actions are pending.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every pending action in insertion order. Must be called with no
    /// pool lock held.
    pub fn run_all(&mut self) {
        for action in self.actions.drain(..) {
            action();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_runs_in_insertion_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut actions = PostLockActions::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            actions.push(Box::new(move || order.lock().push(i)));
        }
        actions.run_all();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_run_all_drains() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut actions = PostLockActions::new();
        let c = Arc::clone(&counter);
        actions.push(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        actions.run_all();
        actions.run_all();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(actions.is_empty());
    }
}

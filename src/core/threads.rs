//! Registries for background worker threads.
//!
//! Threads register here so that pool destruction can interrupt and/or
//! join them deterministically. An interruptible thread periodically
//! sleeps on its [`StopToken`]; `interrupt_and_join_all` trips the token
//! and joins. Non-interruptible threads are joined as-is.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

struct Signal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Cooperative stop/wakeup handle passed to every registered thread.
#[derive(Clone)]
pub struct StopToken {
    signal: Arc<Signal>,
}

impl StopToken {
    /// Whether the registry has been told to stop.
    pub fn is_stopped(&self) -> bool {
        *self.signal.stopped.lock()
    }

    /// Sleep up to `timeout`, waking early on stop or on
    /// [`ThreadRegistry::wake_all`]. Returns `true` when stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.signal.stopped.lock();
        if *stopped {
            return true;
        }
        let _ = self.signal.cond.wait_for(&mut stopped, timeout);
        *stopped
    }
}

/// A set of background threads with a shared stop token.
pub struct ThreadRegistry {
    signal: Arc<Signal>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    closed: Mutex<bool>,
}

impl ThreadRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal {
                stopped: Mutex::new(false),
                cond: Condvar::new(),
            }),
            threads: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        }
    }

    /// Spawn and register a thread. The closure receives the registry's
    /// stop token. Spawning after the registry has been joined is refused.
    pub fn spawn<F>(&self, name: &str, f: F)
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        if *self.closed.lock() {
            warn!(thread = name, "registry already joined; refusing to spawn");
            return;
        }
        let token = StopToken {
            signal: Arc::clone(&self.signal),
        };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(token))
            .expect("failed to spawn registered thread");
        self.threads.lock().push(handle);
    }

    /// Wake sleeping threads without stopping them. Used to re-evaluate
    /// deadlines after configuration changes.
    pub fn wake_all(&self) {
        self.signal.cond.notify_all();
    }

    /// Trip the stop token, wake every sleeper, and join all threads.
    pub fn interrupt_and_join_all(&self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.cond.notify_all();
        }
        self.join_all();
    }

    /// Join all registered threads without interrupting them, then refuse
    /// further registrations.
    pub fn join_all(&self) {
        *self.closed.lock() = true;
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("registered thread panicked before join");
            }
        }
    }

    /// Number of currently registered (unjoined) threads.
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// Whether no thread is registered.
    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_interrupt_unblocks_sleeper() {
        let registry = ThreadRegistry::new();
        let seen_stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen_stop);
        registry.spawn("sleeper", move |stop| {
            while !stop.wait_timeout(Duration::from_secs(60)) {}
            flag.store(true, Ordering::SeqCst);
        });
        registry.interrupt_and_join_all();
        assert!(seen_stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_join_all_waits_for_completion() {
        let registry = ThreadRegistry::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            registry.spawn("worker", move |_stop| {
                thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        registry.join_all();
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_spawn_after_join_is_refused() {
        let registry = ThreadRegistry::new();
        registry.join_all();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        registry.spawn("late", move |_stop| flag.store(true, Ordering::SeqCst));
        assert!(registry.is_empty());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wake_all_wakes_without_stopping() {
        let registry = ThreadRegistry::new();
        let wakeups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakeups);
        registry.spawn("waker", move |stop| loop {
            if stop.wait_timeout(Duration::from_secs(60)) {
                return;
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(20));
        registry.wake_all();
        thread::sleep(Duration::from_millis(20));
        registry.interrupt_and_join_all();
        assert!(wakeups.load(Ordering::SeqCst) >= 1);
    }
}

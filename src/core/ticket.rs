//! Rendezvous tickets.
//!
//! Each ticket converts a one-shot asynchronous completion into a
//! synchronous blocking wait. Tickets are always `Arc`-owned: the producer
//! may post its result after the waiter has abandoned the call, and the
//! shared ownership keeps the structure alive for whichever side finishes
//! last.

use parking_lot::{Condvar, Mutex};

use crate::core::error::GetError;
use crate::core::group::DisableResult;
use crate::core::session::Session;

/// Rendezvous for the synchronous `get` wrapper.
pub struct GetTicket {
    state: Mutex<Option<Result<Session, GetError>>>,
    cond: Condvar,
}

impl GetTicket {
    /// An empty ticket awaiting completion.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Post the result and wake the waiter. Later completions are ignored;
    /// the callback contract guarantees there is at most one.
    pub fn complete(&self, result: Result<Session, GetError>) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(result);
            self.cond.notify_one();
        }
    }

    /// Block until the result is posted.
    pub fn wait(&self) -> Result<Session, GetError> {
        let mut state = self.state.lock();
        while state.is_none() {
            self.cond.wait(&mut state);
        }
        state.take().expect("ticket state checked non-empty")
    }
}

impl Default for GetTicket {
    fn default() -> Self {
        Self::new()
    }
}

/// Rendezvous for `detach_group_by_name`: the caller blocks until the
/// group signals shutdown complete.
pub struct DetachGroupWaitTicket {
    done: Mutex<bool>,
    cond: Condvar,
}

impl DetachGroupWaitTicket {
    /// An unsignalled ticket.
    pub fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Signal shutdown complete.
    pub fn signal(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_one();
    }

    /// Block until signalled.
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

impl Default for DetachGroupWaitTicket {
    fn default() -> Self {
        Self::new()
    }
}

/// Rendezvous for a deferred `disable_process`.
pub struct DisableWaitTicket {
    state: Mutex<Option<DisableResult>>,
    cond: Condvar,
}

impl DisableWaitTicket {
    /// An empty ticket awaiting the final disable result.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Post the final result and wake the waiter.
    pub fn signal(&self, result: DisableResult) {
        let mut state = self.state.lock();
        *state = Some(result);
        self.cond.notify_one();
    }

    /// Block until the final result is posted.
    pub fn wait(&self) -> DisableResult {
        let mut state = self.state.lock();
        while state.is_none() {
            self.cond.wait(&mut state);
        }
        state.expect("ticket state checked non-empty")
    }
}

impl Default for DisableWaitTicket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_get_ticket_complete_before_wait() {
        let ticket = GetTicket::new();
        ticket.complete(Err(GetError::Aborted));
        assert!(matches!(ticket.wait(), Err(GetError::Aborted)));
    }

    #[test]
    fn test_get_ticket_cross_thread() {
        let ticket = Arc::new(GetTicket::new());
        let producer = Arc::clone(&ticket);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.complete(Err(GetError::SpawnFailed("boom".into())));
        });
        assert!(matches!(ticket.wait(), Err(GetError::SpawnFailed(_))));
    }

    #[test]
    fn test_get_ticket_survives_abandoned_waiter() {
        // The waiter drops its handle; the producer must still be able to
        // post without touching freed memory.
        let ticket = Arc::new(GetTicket::new());
        let producer = Arc::clone(&ticket);
        drop(ticket);
        producer.complete(Err(GetError::Aborted));
    }

    #[test]
    fn test_detach_ticket_roundtrip() {
        let ticket = Arc::new(DetachGroupWaitTicket::new());
        let producer = Arc::clone(&ticket);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.signal();
        });
        ticket.wait();
    }

    #[test]
    fn test_disable_ticket_carries_result() {
        let ticket = Arc::new(DisableWaitTicket::new());
        let producer = Arc::clone(&ticket);
        thread::spawn(move || producer.signal(DisableResult::Success));
        assert_eq!(ticket.wait(), DisableResult::Success);
    }
}

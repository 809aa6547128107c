//! One-shot, edge-triggered wake primitive over a mutex and condition
//! variable.
//!
//! `Event` carries no latched state of its own: a thread that calls
//! [`Event::wait`] blocks until a subsequent [`Event::post`] or
//! [`Event::broadcast`], but a `post`/`broadcast` that happens before the
//! matching `wait` is not remembered. Callers are expected to re-check
//! whatever predicate they actually care about (a refcount reaching zero, a
//! departing-readers counter hitting zero) after `wait` returns, the same
//! way any condition-variable consumer must. Spurious wakeups are
//! acceptable for the same reason.
//!
//! This is deliberately the only blocking primitive in the crate that is
//! not also a lock: [`crate::rwlock::RawRwLock`] and
//! [`crate::reclaim::Reclaimer::synchronize`] are both built out of one of
//! these plus their own atomic counters.

use parking_lot::{Condvar, Mutex};

/// A wake primitive with no latched state.
pub struct Event {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Event {
    /// Create a new event with no pending wakeups.
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Block until the next [`post`](Event::post) or
    /// [`broadcast`](Event::broadcast). May return spuriously; callers must
    /// re-check their own predicate.
    ///
    /// Checking that predicate outside this call and then calling `wait`
    /// unconditionally is racy: a `post`/`broadcast` landing between the
    /// caller's check and this call is not remembered and is lost, and the
    /// waiter blocks forever. Use [`wait_while`](Event::wait_while) instead
    /// whenever a caller-owned predicate gates the wait.
    pub fn wait(&self) {
        let mut guard = self.mutex.lock();
        self.condvar.wait(&mut guard);
    }

    /// Block until `predicate` returns `false`, holding this event's own
    /// mutex across every check so a concurrent [`post`](Event::post) or
    /// [`broadcast`](Event::broadcast) can never land in the gap between a
    /// check and the subsequent sleep. `predicate` is evaluated at least
    /// once before the first sleep and again after every wakeup, spurious
    /// or not.
    pub fn wait_while(&self, mut predicate: impl FnMut() -> bool) {
        let mut guard = self.mutex.lock();
        while predicate() {
            self.condvar.wait(&mut guard);
        }
    }

    /// Wake exactly one waiter, if any are currently blocked in
    /// [`wait`](Event::wait).
    pub fn post(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
    }

    /// Wake all waiters currently blocked in [`wait`](Event::wait).
    pub fn broadcast(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

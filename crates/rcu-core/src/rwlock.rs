//! A write-preferring, multi-reader/single-writer lock.
//!
//! [`RawRwLock`] implements the bare locking protocol as a pair of signed
//! atomic counters plus two [`Event`]s; [`RwLock<T>`] wraps it with the
//! usual generic, RAII-guarded API. "Write-preferring" means a writer that
//! has announced intent cannot be starved by a steady stream of new
//! readers: once a writer calls [`RawRwLock::write_lock`], every reader
//! that arrives afterward blocks until that writer has run, even if
//! readers already in the critical section haven't finished yet.
//!
//! # Protocol
//!
//! `n_pending` is a signed counter. Its sign carries the writer-pending
//! flag and its magnitude carries the reader count:
//!
//! - No writer pending: `n_pending` holds the number of readers currently
//!   holding (or racing to acquire) the lock, `>= 0`.
//! - Writer pending or active: a writer has subtracted [`MAX_READERS`]
//!   from `n_pending`, making it negative. New readers see the negative
//!   value, back off, and wait.
//!
//! `readers_departing` is a baton: when a writer transitions the lock to
//! pending, it records how many readers were already in the critical
//! section (the value `n_pending` held immediately before the writer's
//! subtraction) into `readers_departing`, then waits for that many readers
//! to call `read_unlock`. Each such reader decrements `readers_departing`
//! and wakes the writer when it reaches zero. Readers that never acquired
//! the lock (because they saw the pending flag and backed off) never touch
//! `readers_departing`.
//!
//! # Safety
//!
//! `write_lock`/`write_unlock` are split across two calls rather than
//! returning a guard, so the writer-serializing mutex must be locked in one
//! call and unlocked in another; this module reaches past
//! `parking_lot::Mutex`'s guard API to its raw lock/unlock pair for that
//! reason. `RwLock<T>`'s guards read and write the wrapped value through an
//! `UnsafeCell`, relying on `RawRwLock` to uphold the usual
//! shared-xor-exclusive invariant.

#![allow(unsafe_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use lock_api::RawMutex as _;

use crate::event::Event;

/// Readers-in-flight headroom subtracted by a pending writer. Chosen far
/// above any realistic thread count so that a writer's `fetch_sub` always
/// leaves `n_pending` negative regardless of how many readers are
/// currently racing to acquire the lock.
pub const MAX_READERS: i64 = 1 << 30;

/// The bare write-preferring lock protocol, with no payload of its own.
pub struct RawRwLock {
    n_pending: AtomicI64,
    readers_departing: AtomicI64,
    writer_mutex: parking_lot::Mutex<()>,
    reader_event: Event,
    writer_event: Event,
}

impl RawRwLock {
    /// A new, unlocked raw lock.
    pub fn new() -> Self {
        Self {
            n_pending: AtomicI64::new(0),
            readers_departing: AtomicI64::new(0),
            writer_mutex: parking_lot::Mutex::new(()),
            reader_event: Event::new(),
            writer_event: Event::new(),
        }
    }

    /// Acquire shared (reader) access, blocking while a writer holds or is
    /// waiting for the lock.
    pub fn read_lock(&self) {
        loop {
            let prev = self.n_pending.fetch_add(1, Ordering::Acquire);
            if prev >= 0 {
                return;
            }
            // A writer is pending or active; undo our increment and wait
            // for it to clear before retrying.
            self.n_pending.fetch_sub(1, Ordering::Relaxed);
            self.reader_event
                .wait_while(|| self.n_pending.load(Ordering::Acquire) < 0);
        }
    }

    /// Release shared access previously acquired with [`read_lock`](Self::read_lock).
    pub fn read_unlock(&self) {
        let prev = self.n_pending.fetch_sub(1, Ordering::Release);
        if prev < 0 {
            // This reader was counted by a writer's pending transition;
            // check in as departed.
            if self.readers_departing.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.writer_event.post();
            }
        }
    }

    /// Acquire exclusive (writer) access, blocking until no reader holds
    /// the lock and any earlier writer has released it.
    pub fn write_lock(&self) {
        self.writer_mutex.raw().lock();
        let readers_in_flight = self.n_pending.fetch_sub(MAX_READERS, Ordering::Acquire);
        if readers_in_flight > 0 {
            tracing::trace!(readers_in_flight, "writer waiting for departing reader cohort");
            self.readers_departing
                .fetch_add(readers_in_flight, Ordering::AcqRel);
            self.writer_event
                .wait_while(|| self.readers_departing.load(Ordering::Acquire) != 0);
        }
    }

    /// Release exclusive access previously acquired with
    /// [`write_lock`](Self::write_lock).
    pub fn write_unlock(&self) {
        self.n_pending.fetch_add(MAX_READERS, Ordering::Release);
        self.reader_event.broadcast();
        // Safe: only ever called by the thread that currently holds the
        // lock via `write_lock`, matching `RawMutex::unlock`'s contract.
        unsafe { self.writer_mutex.raw().unlock() };
    }
}

impl Default for RawRwLock {
    fn default() -> Self {
        Self::new()
    }
}

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A generic, RAII-guarded reader/writer lock over `T`.
///
/// Guards release the lock on [`Drop`] as usual, but also expose an
/// explicit `unlock()` for callers that want to release before the guard's
/// scope ends without restructuring their code.
pub struct RwLock<T> {
    raw: RawRwLock,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Wrap `value` in a new, unlocked lock.
    pub fn new(value: T) -> Self {
        Self {
            raw: RawRwLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire shared access.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.raw.read_lock();
        RwLockReadGuard {
            lock: self,
            released: false,
        }
    }

    /// Acquire exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.raw.write_lock();
        RwLockWriteGuard {
            lock: self,
            released: false,
        }
    }

    /// Consume the lock and return the wrapped value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Access the bare protocol directly, for callers (such as
    /// [`crate::rculist`]) that need to pin a read lock across a borrow
    /// with a lifetime the guard type cannot express.
    pub fn raw(&self) -> &RawRwLock {
        &self.raw
    }

    /// Borrow the wrapped value without going through the lock protocol.
    ///
    /// # Safety
    /// The caller must independently guarantee the access does not race
    /// with a concurrent writer, e.g. by already holding a
    /// [`RawRwLock::read_lock`]/[`RawRwLock::write_lock`] pinned via
    /// [`raw`](Self::raw).
    #[allow(unsafe_code)]
    pub unsafe fn get_unchecked(&self) -> &T {
        unsafe { &*self.value.get() }
    }
}

impl<T: fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock").field("value", &*self.read()).finish()
    }
}

/// A shared-access guard over a [`RwLock`].
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    released: bool,
}

impl<T> RwLockReadGuard<'_, T> {
    /// Release the read lock before the guard goes out of scope.
    pub fn unlock(mut self) {
        self.released = true;
        self.lock.raw.read_unlock();
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            self.lock.raw.read_unlock();
        }
    }
}

/// An exclusive-access guard over a [`RwLock`].
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    released: bool,
}

impl<T> RwLockWriteGuard<'_, T> {
    /// Release the write lock before the guard goes out of scope.
    pub fn unlock(mut self) {
        self.released = true;
        self.lock.raw.write_unlock();
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            self.lock.raw.write_unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_writer_excludes_readers() {
        let lock = Arc::new(RwLock::new(0u64));
        {
            let mut guard = lock.write();
            *guard = 42;
        }
        assert_eq!(*lock.read(), 42);
    }

    #[test]
    fn concurrent_readers_see_consistent_value() {
        let lock = Arc::new(RwLock::new(7u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    let guard = lock.read();
                    assert_eq!(*guard, 7);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn explicit_unlock_releases_before_drop() {
        let lock = RwLock::new(1);
        let guard = lock.read();
        guard.unlock();
        // Would deadlock if the explicit unlock hadn't actually released.
        let mut w = lock.write();
        *w = 2;
        w.unlock();
        assert_eq!(*lock.read(), 2);
    }

    #[test]
    fn pending_writer_is_not_starved_by_new_readers() {
        let lock = Arc::new(RwLock::new(0u64));
        let writer_done = Arc::new(AtomicUsize::new(0));

        // Hold a read lock briefly so the writer has to wait, then spawn a
        // stream of new readers; the writer must still make progress.
        let first_reader = lock.read();
        let writer_lock = lock.clone();
        let writer_done2 = writer_done.clone();
        let writer = thread::spawn(move || {
            let mut guard = writer_lock.write();
            *guard += 1;
            writer_done2.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(10));
        let mut late_readers = Vec::new();
        for _ in 0..20 {
            let lock = lock.clone();
            let writer_done = writer_done.clone();
            late_readers.push(thread::spawn(move || {
                // New readers must back off while the writer is pending;
                // if they didn't, this loop would starve the writer.
                let _ = lock.read();
                assert!(writer_done.load(Ordering::SeqCst) <= 1);
            }));
        }

        drop(first_reader);
        writer.join().unwrap();
        for h in late_readers {
            h.join().unwrap();
        }
        assert_eq!(writer_done.load(Ordering::SeqCst), 1);
        assert_eq!(*lock.read(), 1);
    }
}

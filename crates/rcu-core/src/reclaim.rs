//! Generation-based RCU reclamation.
//!
//! [`Reclaimer`] hands out monotonically increasing *generations*. A reader
//! calls [`Reclaimer::enter`] to pin the current generation for the
//! duration of a read-side critical section and [`Reclaimer::leave`] to
//! release it. A writer that removes an object calls
//! [`Reclaimer::defer_destroy`] instead of freeing it immediately; the
//! destructor only runs once every reader that could have observed the
//! object — every reader pinned at or before the object's retirement
//! generation — has called `leave`.
//!
//! Generations are tracked in a registry: one [`RefCountNode`] per
//! generation that still has live readers or unrun destructors, ordered
//! oldest-first. A generation's node is pruned once its refcount reaches
//! zero; deferred destructors only run once the registry no longer holds a
//! node for (or older than) their retirement generation. Because
//! generations only grow and the registry is processed oldest-first, a
//! generation blocked on a slow reader also blocks collection of every
//! later generation — conservative, but simple and correct, and adequate
//! for the single-writer-per-structure precondition this crate assumes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::DeferDestroyFailure;
use crate::event::Event;
use crate::intrusive::IntrusiveList;
use crate::pqueue::PriorityQueue;
use crate::rwlock::RwLock;

struct RefCountNode {
    generation: u64,
    count: AtomicI64,
}

/// A reader's pin on a generation, produced by [`Reclaimer::enter`] and
/// consumed by [`Reclaimer::leave`].
///
/// Presenting a handle to a different [`Reclaimer`] than the one that
/// produced it, or leaving with the same handle twice, is a precondition
/// violation rather than a recoverable error.
#[derive(Clone, Copy, Debug)]
pub struct ReaderHandle {
    generation: u64,
}

struct DeferredEntry {
    generation: u64,
    destructor: Box<dyn FnOnce() + Send>,
}

fn by_generation(a: &DeferredEntry, b: &DeferredEntry) -> std::cmp::Ordering {
    a.generation.cmp(&b.generation)
}

/// A generation-based reclaimer.
///
/// Readers are expected to call [`enter`](Self::enter)/[`leave`](Self::leave)
/// around every read-side critical section; writers call
/// [`defer_destroy`](Self::defer_destroy) for every object they unlink and,
/// periodically or via [`synchronize`](Self::synchronize), retire old
/// generations so deferred destructors actually run.
pub struct Reclaimer {
    current_generation: AtomicU64,
    registry: RwLock<IntrusiveList<RefCountNode>>,
    deferred: parking_lot::Mutex<
        PriorityQueue<DeferredEntry, fn(&DeferredEntry, &DeferredEntry) -> std::cmp::Ordering>,
    >,
    grace_period: Event,
}

impl Reclaimer {
    /// A new reclaimer starting at generation 0.
    pub fn new() -> Self {
        let mut registry = IntrusiveList::new();
        registry.push_back(RefCountNode {
            generation: 0,
            count: AtomicI64::new(0),
        });
        Self {
            current_generation: AtomicU64::new(0),
            registry: RwLock::new(registry),
            deferred: parking_lot::Mutex::new(PriorityQueue::new(by_generation)),
            grace_period: Event::new(),
        }
    }

    /// The generation currently being handed out to new readers.
    pub fn get_generation(&self) -> u64 {
        self.current_generation.load(Ordering::Acquire)
    }

    /// Pin the current generation for a read-side critical section.
    pub fn enter(&self) -> ReaderHandle {
        // The registry read lock must be taken before reading the current
        // generation: `inc_generation`/`collect_through` only link or prune
        // registry nodes while holding the write lock, so once we hold the
        // read lock here no node for a generation we're about to observe
        // can be pruned out from under us.
        let registry = self.registry.read();
        let generation = self.current_generation.load(Ordering::Acquire);
        let node = registry
            .find(|n| n.generation == generation)
            .expect("current generation always has a registry node");
        node.get().count.fetch_add(1, Ordering::AcqRel);
        ReaderHandle { generation }
    }

    /// Release a pin acquired with [`enter`](Self::enter).
    pub fn leave(&self, handle: ReaderHandle) {
        let became_idle = {
            let registry = self.registry.read();
            let node = registry
                .find(|n| n.generation == handle.generation)
                .expect("reader handle refers to a live generation");
            node.get().count.fetch_sub(1, Ordering::AcqRel) == 1
        };
        if became_idle {
            self.grace_period.broadcast();
        }
    }

    /// Advance to a new generation, returning the generation being
    /// superseded (the one a caller should retire against).
    ///
    /// The new generation's registry node is linked before the generation
    /// counter is published, so any reader that observes the new
    /// generation via [`enter`] is guaranteed to find its node already in
    /// place.
    pub fn inc_generation(&self) -> u64 {
        let mut registry = self.registry.write();
        let previous = self.current_generation.load(Ordering::Relaxed);
        let next = previous + 1;
        registry.push_back(RefCountNode {
            generation: next,
            count: AtomicI64::new(0),
        });
        self.current_generation.store(next, Ordering::Release);
        previous
    }

    /// Defer `destructor` until every reader that could have observed the
    /// object it frees has left.
    ///
    /// Advances the generation as part of retiring the object, so readers
    /// that enter after this call never pin the retired generation.
    ///
    /// On failure to reserve queue storage, `destructor` is handed back
    /// unconsumed alongside the error rather than dropped: dropping it here
    /// would run the object's destructor immediately, which could race a
    /// reader still traversing through it. Retrying or leaking it is left
    /// to the caller's own policy.
    pub fn defer_destroy(
        &self,
        destructor: Box<dyn FnOnce() + Send>,
    ) -> Result<(), DeferDestroyFailure> {
        let retire_generation = self.inc_generation();
        let mut deferred = self.deferred.lock();
        let entry = DeferredEntry {
            generation: retire_generation,
            destructor,
        };
        match deferred.try_push(entry) {
            Ok(()) => {
                drop(deferred);
                self.collect_through(retire_generation);
                Ok(())
            }
            Err((_, entry)) => Err(DeferDestroyFailure {
                generation: retire_generation,
                destructor: entry.destructor,
            }),
        }
    }

    /// Block until every reader pinned at or before the current generation
    /// has left, then run any destructors that become eligible as a
    /// result.
    pub fn synchronize(&self) {
        let retire_generation = self.inc_generation();
        self.grace_period
            .wait_while(|| !self.generation_drained(retire_generation));
        self.collect_through(retire_generation);
    }

    /// Run every deferred destructor retired at or before
    /// `target_generation` whose generation has fully drained, pruning
    /// drained registry nodes along the way.
    ///
    /// Safe to call opportunistically; a generation that hasn't drained
    /// yet is simply left for a later call.
    pub fn collect_through(&self, target_generation: u64) {
        {
            let mut registry = self.registry.write();
            let current = self.current_generation.load(Ordering::Acquire);
            while registry
                .pop_front_if(|n| {
                    n.generation <= target_generation
                        && n.generation < current
                        && n.count.load(Ordering::Acquire) == 0
                })
                .is_some()
            {}
        }

        loop {
            let next_generation = {
                let deferred = self.deferred.lock();
                match deferred.peek() {
                    Some(entry) => entry.generation,
                    None => break,
                }
            };
            if next_generation > target_generation || !self.generation_drained(next_generation) {
                break;
            }
            let ready = {
                let mut deferred = self.deferred.lock();
                deferred.pop_if(|entry| {
                    entry.generation == next_generation && self.generation_drained(entry.generation)
                })
            };
            match ready {
                Some(entry) => {
                    tracing::debug!(generation = entry.generation, "retiring deferred destructor");
                    (entry.destructor)();
                }
                None => break,
            }
        }
    }

    /// True once `generation` can no longer gain new readers (it precedes
    /// the current generation) and every reader that ever pinned it has
    /// left — regardless of whether its registry node has been pruned yet.
    fn generation_drained(&self, generation: u64) -> bool {
        let registry = self.registry.read();
        match registry.find(|n| n.generation == generation) {
            None => true,
            Some(entry) => {
                let current = self.current_generation.load(Ordering::Acquire);
                generation < current && entry.get().count.load(Ordering::Acquire) == 0
            }
        }
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::new()
    }
}

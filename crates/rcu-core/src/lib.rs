//! # rcu-core
//!
//! A small library of concurrency-oriented in-memory data structures built
//! around a generation-based RCU (Read-Copy-Update) memory-reclamation core.
//!
//! The crate is organized in four layers, leaves first:
//!
//! - [`event`] — a one-shot wake primitive over a mutex and condition variable.
//! - [`intrusive`] — an embedded doubly-linked list used by the reclaimer's
//!   refcount registry.
//! - [`pqueue`] — a single-threaded, comparator-ordered sorted queue used for
//!   the reclaimer's deferred-destructor queue.
//! - [`rwlock`] — a write-preferring, multi-reader/single-writer lock.
//! - [`reclaim`] — the generation-based reclaimer itself.
//! - [`rculist`] — an RCU-protected doubly-linked list built on [`reclaim`].
//!
//! No `unsafe` is permitted at the crate root; individual modules that need
//! raw-pointer or raw-lock manipulation ([`intrusive`], [`rculist`],
//! [`rwlock`]) carry their own narrowly-scoped `#[allow(unsafe_code)]`.

#![deny(unsafe_code)]

pub mod error;
pub mod event;
pub mod intrusive;
pub mod pqueue;
pub mod reclaim;
pub mod rculist;
pub mod rwlock;

pub use error::{DeferDestroyFailure, ReclaimError};
pub use reclaim::{ReaderHandle, Reclaimer};
pub use rculist::RcuList;
pub use rwlock::{RawRwLock, RwLock};

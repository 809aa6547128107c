//! An RCU-protected doubly-linked list.
//!
//! A single writer mutates the list at a time (enforced by an internal
//! mutex), publishing new or relinked nodes with release-ordered stores.
//! Any number of readers may traverse the list concurrently and
//! lock-free, using acquire-ordered loads, without ever blocking the
//! writer or each other. A node unlinked by the writer is not freed
//! immediately — it is handed to a [`Reclaimer`] via
//! [`WriteGuard::erase`], which frees it only once every reader that could
//! have been traversing through it has moved on.
//!
//! This crate's reclaimer assumes a single writer per structure (see the
//! crate-level non-goals); concurrent writers to the same `RcuList` are
//! not supported.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::reclaim::{ReaderHandle, Reclaimer};

struct Node<T> {
    value: T,
    next: AtomicPtr<Node<T>>,
    prev: AtomicPtr<Node<T>>,
}

/// A handle to a node previously observed through an [`Iter`], presentable
/// to [`WriteGuard::erase`].
///
/// Valid only for the list it was produced from, and only until erased;
/// using a stale or foreign handle is a precondition violation.
pub struct NodeRef<T>(NonNull<Node<T>>);

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for NodeRef<T> {}

/// An RCU-protected doubly-linked list.
pub struct RcuList<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    writer_mutex: parking_lot::Mutex<()>,
    reclaimer: Reclaimer,
}

unsafe impl<T: Send> Send for RcuList<T> {}
unsafe impl<T: Send + Sync> Sync for RcuList<T> {}

impl<T> RcuList<T> {
    /// A new, empty list.
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            writer_mutex: parking_lot::Mutex::new(()),
            reclaimer: Reclaimer::new(),
        }
    }

    /// Pin a read-side snapshot of the list.
    ///
    /// The returned guard must stay alive for as long as any [`Iter`] or
    /// [`NodeRef`] borrowed from it is in use.
    pub fn read(&self) -> ReadGuard<'_, T> {
        ReadGuard {
            list: self,
            handle: Some(self.reclaimer.enter()),
        }
    }

    /// Acquire exclusive write access, blocking until any other writer has
    /// finished.
    pub fn write(&self) -> WriteGuard<'_, T> {
        WriteGuard {
            list: self,
            _guard: self.writer_mutex.lock(),
        }
    }
}

impl<T> Default for RcuList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RcuList<T> {
    fn drop(&mut self) {
        let mut cursor = *self.head.get_mut();
        while !cursor.is_null() {
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next.load(Ordering::Relaxed);
        }
    }
}

/// A pinned read-side view of an [`RcuList`].
pub struct ReadGuard<'a, T> {
    list: &'a RcuList<T>,
    handle: Option<ReaderHandle>,
}

impl<'a, T> ReadGuard<'a, T> {
    /// An iterator positioned at the first element.
    pub fn begin(&self) -> Iter<'a, T> {
        Iter {
            current: self.list.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }

    /// An iterator positioned one-past-the-last element.
    pub fn end(&self) -> Iter<'a, T> {
        Iter {
            current: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Scan from the front for the first element matching `predicate`,
    /// returning an iterator positioned there.
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Iter<'a, T>> {
        let mut it = self.begin();
        while let Some(value) = it.get() {
            if predicate(value) {
                return Some(it);
            }
            it.advance();
        }
        None
    }

    /// Release the pin before the guard goes out of scope.
    pub fn unlock(mut self) {
        if let Some(handle) = self.handle.take() {
            self.list.reclaimer.leave(handle);
        }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.list.reclaimer.leave(handle);
        }
    }
}

/// A lock-free cursor over a pinned [`RcuList`] snapshot.
pub struct Iter<'g, T> {
    current: *mut Node<T>,
    _marker: PhantomData<&'g T>,
}

impl<'g, T> Iter<'g, T> {
    /// Borrow the value at the cursor's current position, if any.
    pub fn get(&self) -> Option<&'g T> {
        unsafe { self.current.as_ref() }.map(|node| &node.value)
    }

    /// Move the cursor to the next element.
    pub fn advance(&mut self) {
        if let Some(node) = unsafe { self.current.as_ref() } {
            self.current = node.next.load(Ordering::Acquire);
        }
    }

    /// A handle to the node at the cursor's current position, for later
    /// use with [`WriteGuard::erase`].
    pub fn entry(&self) -> Option<NodeRef<T>> {
        NonNull::new(self.current).map(NodeRef)
    }
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.get();
        if value.is_some() {
            self.advance();
        }
        value
    }
}

/// An exclusive-access handle for mutating an [`RcuList`].
pub struct WriteGuard<'a, T> {
    list: &'a RcuList<T>,
    _guard: parking_lot::MutexGuard<'a, ()>,
}

impl<'a, T: Send> WriteGuard<'a, T> {
    /// Link a new node at the front of the list.
    pub fn push_front(&mut self, value: T) {
        let old_head = self.list.head.load(Ordering::Relaxed);
        let node = Box::into_raw(Box::new(Node {
            value,
            next: AtomicPtr::new(old_head),
            prev: AtomicPtr::new(ptr::null_mut()),
        }));
        if old_head.is_null() {
            self.list.tail.store(node, Ordering::Relaxed);
        } else {
            unsafe { (*old_head).prev.store(node, Ordering::Relaxed) };
        }
        self.list.head.store(node, Ordering::Release);
    }

    /// Link a new node at the back of the list.
    pub fn push_back(&mut self, value: T) {
        let old_tail = self.list.tail.load(Ordering::Relaxed);
        let node = Box::into_raw(Box::new(Node {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(old_tail),
        }));
        if old_tail.is_null() {
            self.list.head.store(node, Ordering::Release);
        } else {
            unsafe { (*old_tail).next.store(node, Ordering::Release) };
        }
        self.list.tail.store(node, Ordering::Release);
    }

    /// Unlink `entry` and defer freeing it until every reader that could
    /// be traversing through it has moved on.
    ///
    /// The unlinked node's own `next`/`prev` pointers are left untouched
    /// so readers already positioned on it can still continue their
    /// traversal safely; only its neighbors are relinked.
    pub fn erase(&mut self, entry: NodeRef<T>) {
        let node_ptr = entry.0.as_ptr();
        let (prev, next) = unsafe {
            let node = &*node_ptr;
            (
                node.prev.load(Ordering::Relaxed),
                node.next.load(Ordering::Relaxed),
            )
        };

        if prev.is_null() {
            self.list.head.store(next, Ordering::Release);
        } else {
            unsafe { (*prev).next.store(next, Ordering::Release) };
        }
        if next.is_null() {
            self.list.tail.store(prev, Ordering::Release);
        } else {
            unsafe { (*next).prev.store(prev, Ordering::Release) };
        }

        let owned = unsafe { Box::from_raw(node_ptr) };
        if let Err(failure) = self
            .list
            .reclaimer
            .defer_destroy(Box::new(move || drop(owned)))
        {
            // Readers may still be traversing through this node, so we
            // cannot run the destructor (and free it) synchronously without
            // risking a use-after-free. Leak it instead of freeing early.
            tracing::warn!(error = %failure, "leaking erased node after deferred-destroy allocation failure");
            std::mem::forget(failure.destructor);
        }
    }

    /// Release the write lock before the guard goes out of scope.
    pub fn unlock(self) {}
}

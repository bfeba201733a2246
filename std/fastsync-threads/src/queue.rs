//!
//! Blocking FIFO Queue
//!
//! A thread-safe channel built from one [`Lock`] and two
//! [`ConditionVariable`]s. Consumers wait on "not empty"; producers of a
//! bounded queue wait on "not full". Every blocked call re-checks its
//! condition after waking: another thread may have taken the item (or the
//! slot) between the wakeup and the lock being re-acquired.
//!
//! Length, bound and closed flag are mirrored in atomics written under the
//! lock, so the snapshot queries never block and cannot fail.
//!
//! Usage:
//! ```
//! use std::thread;
//! use fastsync_threads::Queue;
//!
//! let queue = Queue::unbounded();
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         for c in ['a', 'b', 'c'] {
//!             queue.push(c).unwrap();
//!         }
//!     });
//!     let word: String = (0..3).map(|_| queue.shift().unwrap()).collect();
//!     assert_eq!(word, "abc");
//! });
//! ```
//!

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use fastsync_core::{SyncConfig, SyncError, SyncResult};

use crate::condvar::ConditionVariable;
use crate::lock::{Lock, LockGuard};

/// `capacity` value of an unbounded queue. A real bound is never zero.
const UNBOUNDED: usize = 0;

pub struct Queue<T> {
    lock: Lock,
    not_empty: ConditionVariable,
    not_full: ConditionVariable,
    items: UnsafeCell<VecDeque<T>>,
    len: AtomicUsize,
    capacity: AtomicUsize,
    closed: AtomicBool,
}

// SAFETY: `items` is only reached through `Queue::items`, which demands a
// guard on `lock`, so at most one thread touches it at a time.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    pub fn unbounded() -> Self {
        Self::build(Lock::new(), None)
    }

    pub fn bounded(capacity: usize) -> SyncResult<Self> {
        if capacity == 0 {
            return Err(SyncError::InvalidCapacity(capacity));
        }
        Ok(Self::build(Lock::new(), Some(capacity)))
    }

    pub fn with_config(config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self::build(Lock::with_config(config), config.queue_capacity))
    }

    fn build(lock: Lock, capacity: Option<usize>) -> Self {
        Self {
            lock,
            not_empty: ConditionVariable::new(),
            not_full: ConditionVariable::new(),
            items: UnsafeCell::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity.unwrap_or(UNBOUNDED)),
            closed: AtomicBool::new(false),
        }
    }

    /// Append `item`. Blocks while a bounded queue is full. On a closed
    /// queue the item is dropped after the lock is released.
    pub fn push(&self, item: T) -> SyncResult<()> {
        let mut guard = self.lock.acquire()?;
        loop {
            if self.is_closed() {
                drop(guard);
                drop(item);
                return Err(SyncError::Closed);
            }
            let bound = self.capacity();
            let items = self.items(&mut guard);
            if bound.is_none_or(|cap| items.len() < cap) {
                items.push_back(item);
                self.publish_len(items);
                break;
            }
            self.not_full.wait_guard(&mut guard)?;
        }
        self.not_empty.signal();
        Ok(())
    }

    /// Remove the head item, blocking while the queue is empty. Fails with
    /// `Closed` once a closed queue has been drained.
    pub fn shift(&self) -> SyncResult<T> {
        let mut guard = self.lock.acquire()?;
        loop {
            let items = self.items(&mut guard);
            if let Some(item) = items.pop_front() {
                self.publish_len(items);
                self.not_full.signal();
                return Ok(item);
            }
            if self.is_closed() {
                return Err(SyncError::Closed);
            }
            self.not_empty.wait_guard(&mut guard)?;
        }
    }

    pub fn pop(&self) -> SyncResult<T> {
        self.shift()
    }

    /// Remove the head item if there is one, without blocking.
    pub fn try_shift(&self) -> SyncResult<Option<T>> {
        let mut guard = self.lock.acquire()?;
        let items = self.items(&mut guard);
        let item = items.pop_front();
        if item.is_some() {
            self.publish_len(items);
            self.not_full.signal();
        }
        Ok(item)
    }

    /// Snapshot of the item count.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued item and wake blocked producers.
    pub fn clear(&self) -> SyncResult<()> {
        let drained = {
            let mut guard = self.lock.acquire()?;
            let items = self.items(&mut guard);
            let drained = std::mem::take(items);
            self.publish_len(items);
            self.not_full.broadcast();
            drained
        };
        // item destructors run outside the lock
        drop(drained);
        Ok(())
    }

    /// Threads blocked in `shift` or in a bounded `push`.
    pub fn num_waiting(&self) -> usize {
        self.not_empty.num_waiting() + self.not_full.num_waiting()
    }

    pub fn capacity(&self) -> Option<usize> {
        match self.capacity.load(Ordering::Acquire) {
            UNBOUNDED => None,
            cap => Some(cap),
        }
    }

    /// Change the bound. Raising it wakes one blocked producer per new slot.
    pub fn set_capacity(&self, capacity: usize) -> SyncResult<()> {
        if capacity == 0 {
            return Err(SyncError::InvalidCapacity(capacity));
        }
        let _guard = self.lock.acquire()?;
        let previous = self.capacity();
        self.capacity.store(capacity, Ordering::Release);
        tracing::debug!(?previous, capacity, "queue capacity changed");
        if let Some(previous) = previous {
            for _ in previous..capacity {
                self.not_full.signal();
            }
        }
        Ok(())
    }

    /// Refuse further pushes and wake every blocked thread. Items already
    /// queued can still be shifted.
    pub fn close(&self) -> SyncResult<()> {
        let _guard = self.lock.acquire()?;
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(remaining = self.len(), "queue closed");
        }
        self.not_empty.broadcast();
        self.not_full.broadcast();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn items<'g>(&'g self, guard: &'g mut LockGuard<'_>) -> &'g mut VecDeque<T> {
        debug_assert!(std::ptr::eq(guard.lock(), &self.lock));
        // SAFETY: the guard proves `self.lock` is held by this thread, and the
        // exclusive borrow of the guard keeps a second reference from being
        // made (or the lock from being released by a wait) while this one
        // is alive.
        unsafe { &mut *self.items.get() }
    }

    fn publish_len(&self, items: &VecDeque<T>) {
        self.len.store(items.len(), Ordering::Release);
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("lock", &self.lock)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .field("num_waiting", &self.num_waiting())
            .finish_non_exhaustive()
    }
}

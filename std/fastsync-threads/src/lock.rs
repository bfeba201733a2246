//!
//! Lock Implementation
//!
//! A non-reentrant mutual exclusion lock with owner tracking and FIFO
//! handoff.
//!
//! The whole lock state lives in one atomic word:
//!
//! ```text
//!   63                                   1   0
//!  +--------------------------------------+---+
//!  |            owner ThreadKey           | Q |
//!  +--------------------------------------+---+
//! ```
//!
//! `0` means unlocked. Claiming a free lock is a single `compare_exchange`
//! from `0`, and releasing an uncontended lock is a single exchange back to
//! `0`. The `Q` bit is set exactly while the waiter queue is non-empty; it
//! makes the fast release fail so the owner goes through `unlock_contended`,
//! which writes the head waiter's key straight into the word. The word never
//! passes through `0` on a contended release, so a thread arriving late
//! cannot claim the lock ahead of one that is already queued.
//!
//! Usage:
//! ```
//! use fastsync_threads::Lock;
//!
//! let lock = Lock::new();
//! let total = lock.synchronize(|| 2 + 2).unwrap();
//! assert_eq!(total, 4);
//! assert!(!lock.is_locked());
//! ```
//!

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fastsync_core::{SyncConfig, SyncError, SyncResult, ThreadKey, DEFAULT_SPIN_LIMIT};

use crate::parker::{excise, WaitList, Waiter, Wakeup};

const UNLOCKED: u64 = 0;
const QUEUED: u64 = 1;

fn owner_word(key: ThreadKey) -> u64 {
    key.get() << 1
}

pub struct Lock {
    state: AtomicU64,
    waiters: Mutex<WaitList>,
    spin_limit: u32,
}

impl Lock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(UNLOCKED),
            waiters: Mutex::new(WaitList::new()),
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }

    pub fn with_config(config: &SyncConfig) -> Self {
        Self {
            state: AtomicU64::new(UNLOCKED),
            waiters: Mutex::new(WaitList::new()),
            spin_limit: config.spin_limit,
        }
    }

    /// Block until the calling thread holds the lock.
    pub fn lock(&self) -> SyncResult<()> {
        let me = ThreadKey::current();
        if self.claim(me) {
            return Ok(());
        }
        self.lock_contended(me, None).map(|_| ())
    }

    /// Claim the lock only if it is free right now. A lock held by the
    /// caller counts as not free.
    pub fn try_lock(&self) -> bool {
        self.claim(ThreadKey::current())
    }

    /// Block for at most `timeout`. Returns whether the lock was acquired.
    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        let me = ThreadKey::current();
        if self.claim(me) {
            return Ok(true);
        }
        self.lock_contended(me, Some(Instant::now() + timeout))
    }

    pub fn unlock(&self) -> SyncResult<()> {
        let word = owner_word(ThreadKey::current());
        match self
            .state
            .compare_exchange(word, UNLOCKED, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(actual) if actual == word | QUEUED => {
                self.unlock_contended();
                Ok(())
            }
            Err(_) => Err(SyncError::NotOwner { operation: "unlock" }),
        }
    }

    /// Run `body` while holding the lock. The lock is released on every
    /// exit path, including a panic in `body`.
    pub fn synchronize<R>(&self, body: impl FnOnce() -> R) -> SyncResult<R> {
        let _guard = self.acquire()?;
        Ok(body())
    }

    /// Run `body` as the last act of the caller's hold, then release. The
    /// next owner is chosen only after `body` returns or unwinds, so no
    /// other thread runs under the lock between the release and `body`.
    pub fn exclusive_unlock<R>(&self, body: impl FnOnce() -> R) -> SyncResult<R> {
        if !self.is_owned_by_current() {
            return Err(SyncError::NotOwner { operation: "unlock" });
        }
        let _release = LockGuard {
            lock: self,
            _not_send: PhantomData,
        };
        Ok(body())
    }

    pub fn acquire(&self) -> SyncResult<LockGuard<'_>> {
        self.lock()?;
        Ok(LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Snapshot of the hold state. Racy by nature: another thread may take or
    /// release the lock right after this returns.
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }

    pub fn owner(&self) -> Option<ThreadKey> {
        ThreadKey::from_raw(self.state.load(Ordering::Acquire) >> 1)
    }

    pub fn is_owned_by_current(&self) -> bool {
        self.owner() == Some(ThreadKey::current())
    }

    /// Threads currently queued for a handoff.
    pub fn num_waiting(&self) -> usize {
        self.waiters().len()
    }

    fn claim(&self, me: ThreadKey) -> bool {
        self.state
            .compare_exchange(UNLOCKED, owner_word(me), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn waiters(&self) -> MutexGuard<'_, WaitList> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_contended(&self, me: ThreadKey, deadline: Option<Instant>) -> SyncResult<bool> {
        if self.owner() == Some(me) {
            return Err(SyncError::Reentrancy);
        }

        for _ in 0..self.spin_limit {
            if self.state.load(Ordering::Relaxed) == UNLOCKED && self.claim(me) {
                return Ok(true);
            }
            std::hint::spin_loop();
        }

        let waiter = Waiter::new();
        if self.enqueue(&waiter) {
            return Ok(true);
        }

        match waiter.suspend(deadline) {
            Wakeup::Notified => {}
            Wakeup::TimedOut => {
                if self.abandon(&waiter) {
                    return Ok(false);
                }
                waiter.settle();
            }
        }
        debug_assert_eq!(self.owner(), Some(me));
        Ok(true)
    }

    /// Append `waiter` to the queue, or give it the lock outright if the lock
    /// is free. Returns true in the second case.
    fn enqueue(&self, waiter: &Arc<Waiter>) -> bool {
        let mut queue = self.waiters();
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let target = if current == UNLOCKED {
                owner_word(waiter.key())
            } else {
                current | QUEUED
            };
            match self
                .state
                .compare_exchange_weak(current, target, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) if current == UNLOCKED => return true,
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        queue.push_back(Arc::clone(waiter));
        tracing::trace!(thread = %waiter.key(), position = queue.len(), "lock contended; queued");
        false
    }

    /// Take over a waiter signalled off a condition variable. It joins the
    /// back of the queue and is woken only once it owns the lock.
    pub(crate) fn enqueue_waiter(&self, waiter: Arc<Waiter>) {
        if self.enqueue(&waiter) {
            tracing::trace!(thread = %waiter.key(), "lock handed to signalled waiter");
            waiter.notify();
        }
    }

    /// Hand the lock to the head waiter. Only the owner gets here, with the
    /// queued bit set.
    fn unlock_contended(&self) {
        let next = {
            let mut queue = self.waiters();
            match queue.pop_front() {
                Some(next) => {
                    let flag = if queue.is_empty() { 0 } else { QUEUED };
                    self.state
                        .store(owner_word(next.key()) | flag, Ordering::Release);
                    Some(next)
                }
                None => {
                    self.state.store(UNLOCKED, Ordering::Release);
                    None
                }
            }
        };

        if let Some(next) = next {
            tracing::trace!(thread = %next.key(), "lock handed off");
            next.notify();
        }
    }

    /// Remove a timed-out waiter. Returns false if a handoff already
    /// dequeued it, in which case the caller now owns the lock.
    fn abandon(&self, waiter: &Arc<Waiter>) -> bool {
        let mut queue = self.waiters();
        if !excise(&mut *queue, waiter) {
            return false;
        }
        if queue.is_empty() {
            self.state.fetch_and(!QUEUED, Ordering::Relaxed);
        }
        tracing::trace!(thread = %waiter.key(), "lock wait abandoned");
        true
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("owner", &self.owner())
            .field("spin_limit", &self.spin_limit)
            .finish()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state != UNLOCKED {
            tracing::error!(owner = ?ThreadKey::from_raw(state >> 1), "lock dropped while held");
        }
    }
}

/// Scoped hold on a [`Lock`]. Unlocks when dropped.
#[must_use = "if unused the lock is released immediately"]
pub struct LockGuard<'a> {
    lock: &'a Lock,
    // ownership is per thread; the guard must be dropped where it was made
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    pub fn lock(&self) -> &'a Lock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            tracing::warn!(%err, "lock guard released a lock it no longer held");
        }
    }
}

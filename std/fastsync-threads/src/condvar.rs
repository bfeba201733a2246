//!
//! ConditionVariable Implementation
//!
//! FIFO wait/signal on top of [`Lock`]. The condition variable does not own
//! a lock; the caller hands one to each `wait`.
//!
//! A waiter is appended to the queue *before* the lock is released, and its
//! wakeup flag is sticky, so a `signal` issued any time after the release
//! reaches it even if it has not parked yet.
//!
//! Signalled waiters are not woken directly. `signal` and `broadcast` move
//! them onto the back of their lock's queue, and the lock's FIFO handoff
//! wakes each one already owning the lock. Threads released by one
//! `broadcast` therefore get the lock back in the order they called `wait`.
//!
//! Usage:
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::thread;
//! use fastsync_threads::{ConditionVariable, Lock};
//!
//! let lock = Lock::new();
//! let ready = ConditionVariable::new();
//! let flag = AtomicBool::new(false);
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         lock.synchronize(|| {
//!             flag.store(true, Ordering::Relaxed);
//!             ready.signal();
//!         }).unwrap();
//!     });
//!     lock.synchronize(|| {
//!         while !flag.load(Ordering::Relaxed) {
//!             ready.wait(&lock).unwrap();
//!         }
//!     }).unwrap();
//! });
//! ```
//!

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fastsync_core::{SyncError, SyncResult};
use smallvec::SmallVec;

use crate::lock::{Lock, LockGuard};
use crate::parker::{excise, Waiter, Wakeup};

/// A thread parked in `wait`, and the lock it has to get back.
#[derive(Debug)]
struct Sleeper {
    waiter: Arc<Waiter>,
    lock: NonNull<Lock>,
}

// SAFETY: `lock` comes from the `&Lock` borrowed by `wait_until`, which does
// not return while the sleeper is queued here, nor after a signal has taken
// it off until the lock has been handed to it. The pointer is only followed
// in that window.
unsafe impl Send for Sleeper {}

impl Sleeper {
    /// Move the sleeper onto its lock's queue.
    fn transfer(self) {
        // SAFETY: see the `Send` impl; the sleeping thread cannot leave
        // `wait_until` before this hands it the lock.
        let lock = unsafe { self.lock.as_ref() };
        lock.enqueue_waiter(self.waiter);
    }
}

impl AsRef<Waiter> for Sleeper {
    fn as_ref(&self) -> &Waiter {
        &self.waiter
    }
}

#[derive(Debug, Default)]
pub struct ConditionVariable {
    sleepers: Mutex<VecDeque<Sleeper>>,
}

impl ConditionVariable {
    pub const fn new() -> Self {
        Self {
            sleepers: Mutex::new(VecDeque::new()),
        }
    }

    /// Release `lock`, sleep until signalled, then take `lock` back.
    pub fn wait(&self, lock: &Lock) -> SyncResult<()> {
        self.wait_until(lock, None).map(|_| ())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns
    /// `false` on timeout. The lock is held again either way.
    pub fn wait_timeout(&self, lock: &Lock, timeout: Duration) -> SyncResult<bool> {
        self.wait_until(lock, Some(Instant::now() + timeout))
    }

    pub fn wait_guard(&self, guard: &mut LockGuard<'_>) -> SyncResult<()> {
        self.wait(guard.lock())
    }

    /// Wake the earliest waiter. No-op when nobody is waiting; the signal
    /// is not remembered for a later `wait`.
    pub fn signal(&self) {
        let head = self.sleepers().pop_front();
        if let Some(sleeper) = head {
            tracing::trace!(thread = %sleeper.waiter.key(), "condvar signal");
            sleeper.transfer();
        }
    }

    /// Wake every thread queued at the moment of the call. They re-acquire
    /// the lock in queue order.
    pub fn broadcast(&self) {
        let woken: SmallVec<[Sleeper; 8]> = self.sleepers().drain(..).collect();
        if woken.is_empty() {
            return;
        }
        tracing::trace!(count = woken.len(), "condvar broadcast");
        for sleeper in woken {
            sleeper.transfer();
        }
    }

    pub fn num_waiting(&self) -> usize {
        self.sleepers().len()
    }

    fn sleepers(&self) -> MutexGuard<'_, VecDeque<Sleeper>> {
        self.sleepers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until(&self, lock: &Lock, deadline: Option<Instant>) -> SyncResult<bool> {
        if !lock.is_owned_by_current() {
            return Err(SyncError::NotOwner { operation: "wait on" });
        }

        let waiter = Waiter::new();
        self.sleepers().push_back(Sleeper {
            waiter: Arc::clone(&waiter),
            lock: NonNull::from(lock),
        });
        if let Err(err) = lock.unlock() {
            excise(&mut *self.sleepers(), &waiter);
            return Err(err);
        }

        // a notification means the lock has already been handed to us
        if waiter.suspend(deadline) == Wakeup::TimedOut {
            if excise(&mut *self.sleepers(), &waiter) {
                tracing::trace!(thread = %waiter.key(), "condvar wait timed out");
                lock.lock()?;
                return Ok(false);
            }
            // a signal took us off the queue first; wait for its handoff
            waiter.settle();
        }
        debug_assert!(lock.is_owned_by_current());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use fastsync_core::SyncConfig;

    fn wait_for_waiters(cv: &ConditionVariable, len: usize) {
        while cv.num_waiting() < len {
            thread::yield_now();
        }
    }

    #[test]
    fn test_wait_without_lock_is_not_owner() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        assert!(matches!(
            cv.wait(&lock),
            Err(SyncError::NotOwner { operation: "wait on" })
        ));
        assert_eq!(cv.num_waiting(), 0);
    }

    #[test]
    fn test_wait_on_lock_held_elsewhere_is_not_owner() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        lock.lock().unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                assert!(matches!(cv.wait(&lock), Err(SyncError::NotOwner { .. })));
            });
        });
        assert!(lock.is_owned_by_current());
        lock.unlock().unwrap();
    }

    #[test]
    fn test_signal_then_wait_relocks() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        let log = Mutex::new(String::new());
        let ready = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                while !lock.synchronize(|| ready.load(Ordering::SeqCst)).unwrap() {
                    thread::yield_now();
                }
                lock.synchronize(|| log.lock().unwrap().push('b')).unwrap();
                cv.signal();
            });

            lock.synchronize(|| {
                log.lock().unwrap().push('a');
                ready.store(true, Ordering::SeqCst);
                cv.wait(&lock).unwrap();
                assert!(lock.is_owned_by_current());
                log.lock().unwrap().push('c');
            })
            .unwrap();
        });

        assert_eq!(*log.lock().unwrap(), "abc");
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_signal_without_waiters_is_dropped() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        cv.signal();
        cv.broadcast();

        lock.lock().unwrap();
        assert!(!cv.wait_timeout(&lock, Duration::from_millis(10)).unwrap());
        assert!(lock.is_owned_by_current());
        lock.unlock().unwrap();
    }

    #[test]
    fn test_timed_out_waiter_leaves_queue() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();

        lock.lock().unwrap();
        assert!(!cv.wait_timeout(&lock, Duration::from_millis(5)).unwrap());
        assert_eq!(cv.num_waiting(), 0);
        lock.unlock().unwrap();
    }

    #[test]
    fn test_timed_out_waiter_does_not_absorb_signal() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        let woke = AtomicUsize::new(0);

        thread::scope(|s| {
            let quitter = s.spawn(|| {
                lock.synchronize(|| cv.wait_timeout(&lock, Duration::from_millis(20)).unwrap())
                    .unwrap()
            });
            wait_for_waiters(&cv, 1);
            s.spawn(|| {
                lock.synchronize(|| {
                    cv.wait(&lock).unwrap();
                    woke.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            });
            assert!(!quitter.join().unwrap());
            wait_for_waiters(&cv, 1);
            cv.signal();
        });

        assert_eq!(woke.load(Ordering::SeqCst), 1);
        assert_eq!(cv.num_waiting(), 0);
    }

    #[test]
    fn test_broadcast_wakes_current_waiters_only() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        let woke = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    lock.synchronize(|| cv.wait(&lock).unwrap()).unwrap();
                    woke.fetch_add(1, Ordering::SeqCst);
                });
            }
            wait_for_waiters(&cv, 4);
            cv.broadcast();
            assert_eq!(cv.num_waiting(), 0);
        });
        assert_eq!(woke.load(Ordering::SeqCst), 4);

        lock.lock().unwrap();
        assert!(!cv.wait_timeout(&lock, Duration::from_millis(5)).unwrap());
        lock.unlock().unwrap();
    }

    #[test]
    fn test_broadcast_reacquires_in_wait_order() {
        let lock = Lock::with_config(&SyncConfig::default().with_spin_limit(0));
        let cv = ConditionVariable::new();

        for _ in 0..20 {
            let order = Mutex::new(Vec::new());
            thread::scope(|s| {
                for i in 0..6 {
                    let (lock, cv, order) = (&lock, &cv, &order);
                    s.spawn(move || {
                        lock.synchronize(|| {
                            cv.wait(lock).unwrap();
                            order.lock().unwrap().push(i);
                        })
                        .unwrap();
                    });
                    wait_for_waiters(cv, i + 1);
                }

                lock.lock().unwrap();
                cv.broadcast();
                assert_eq!(cv.num_waiting(), 0);
                assert_eq!(lock.num_waiting(), 6);
                lock.unlock().unwrap();
            });
            assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_signal_queues_earliest_waiter_behind_contenders() {
        let lock = Lock::with_config(&SyncConfig::default().with_spin_limit(0));
        let cv = ConditionVariable::new();
        let order = Mutex::new(Vec::new());

        thread::scope(|s| {
            for i in 0..3 {
                let (lock, cv, order) = (&lock, &cv, &order);
                s.spawn(move || {
                    lock.synchronize(|| {
                        cv.wait(lock).unwrap();
                        order.lock().unwrap().push(i);
                    })
                    .unwrap();
                });
                wait_for_waiters(cv, i + 1);
            }

            lock.lock().unwrap();
            s.spawn(|| {
                lock.synchronize(|| order.lock().unwrap().push(100)).unwrap();
            });
            while lock.num_waiting() < 1 {
                thread::yield_now();
            }

            cv.signal();
            cv.signal();
            assert_eq!(cv.num_waiting(), 1);
            assert_eq!(lock.num_waiting(), 3);
            lock.unlock().unwrap();

            while order.lock().unwrap().len() < 3 {
                thread::yield_now();
            }
            cv.signal();
        });

        assert_eq!(*order.lock().unwrap(), vec![100, 0, 1, 2]);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_wait_guard() {
        let lock = Lock::new();
        let cv = ConditionVariable::new();
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                wait_for_waiters(&cv, 1);
                lock.synchronize(|| done.store(true, Ordering::SeqCst)).unwrap();
                cv.signal();
            });

            let mut guard = lock.acquire().unwrap();
            while !done.load(Ordering::SeqCst) {
                cv.wait_guard(&mut guard).unwrap();
            }
        });
        assert!(!lock.is_locked());
    }
}

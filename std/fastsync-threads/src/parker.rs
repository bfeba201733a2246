//!
//! Host Suspend/Resume
//!
//! A `Waiter` is the record a blocked thread leaves in a lock or condition
//! variable queue. The notifier flips its one-shot flag and unparks the
//! thread; the sleeper parks until it sees the flag. The flag is sticky, so
//! a notification that lands before the sleeper actually parks is still
//! observed.
//!
//! A waiter that gives up (deadline passed) must excise itself from its
//! queue. If excision finds it already gone, a notifier dequeued it first
//! and the waiter has to take that notification: `settle` parks until the
//! flag arrives.
//!
//! A condition variable waiter is notified exactly once, by the lock handoff
//! that follows its signal, never by the signal itself.
//!

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Instant;

use fastsync_core::ThreadKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wakeup {
    Notified,
    TimedOut,
}

#[derive(Debug)]
pub(crate) struct Waiter {
    key: ThreadKey,
    thread: Thread,
    notified: AtomicBool,
}

impl Waiter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            key: ThreadKey::current(),
            thread: thread::current(),
            notified: AtomicBool::new(false),
        })
    }

    pub(crate) fn key(&self) -> ThreadKey {
        self.key
    }

    pub(crate) fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    pub(crate) fn notify(&self) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Park until notified or until `deadline` passes.
    pub(crate) fn suspend(&self, deadline: Option<Instant>) -> Wakeup {
        while !self.is_notified() {
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wakeup::TimedOut;
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        }
        Wakeup::Notified
    }

    /// Accept a notification already in flight.
    pub(crate) fn settle(&self) {
        self.suspend(None);
    }
}

pub(crate) type WaitList = VecDeque<Arc<Waiter>>;

/// Excise `waiter` from `queue`. Returns false if it was no longer queued.
pub(crate) fn excise<E: AsRef<Waiter>>(queue: &mut VecDeque<E>, waiter: &Waiter) -> bool {
    match queue
        .iter()
        .position(|queued| std::ptr::eq(queued.as_ref(), waiter))
    {
        Some(index) => {
            // order of the remaining waiters is preserved
            queue.remove(index);
            true
        }
        None => false,
    }
}

//!
//! fastsync-threads - Thread-Coordination Primitives
//!
//! Drop-in replacements for the three classic blocking primitives, with the
//! bookkeeping on lock/unlock/wait/signal kept as small as possible.
//!
//! ## Lock
//!
//! Non-reentrant mutual exclusion with owner tracking:
//! - `lock()` / `unlock()` - blocking acquire, owner-checked release
//! - `try_lock()` / `try_lock_for(timeout)` - non-blocking and timed acquire
//! - `synchronize(body)` / `acquire()` - scoped hold, released on every exit
//! - `exclusive_unlock(body)` - run `body` as the last act of a hold, then release
//! - `is_locked()` - racy snapshot
//!
//! An uncontended acquire or release is a single CAS. Contended waiters are
//! granted the lock in the order they blocked; a releasing owner hands the
//! lock straight to the head waiter so nobody can cut in.
//!
//! ## ConditionVariable
//!
//! - `wait(&lock)` - release, sleep, re-acquire
//! - `signal()` - wake the earliest waiter (no-op when none)
//! - `broadcast()` - wake every current waiter, in order
//!
//! Signalled waiters are moved onto the lock's queue rather than woken, so
//! they take the lock back in the order they started waiting.
//!
//! ## Queue
//!
//! Blocking FIFO channel, bounded or unbounded:
//! - `push(item)` - append (blocks while a bounded queue is full)
//! - `shift()` / `pop()` - remove the head (blocks while empty)
//! - `len()` / `is_empty()` / `capacity()` / `is_closed()` / `num_waiting()` - snapshots
//! - `close()` - release every blocked thread
//!
//! ## Host Scheduler
//!
//! Threads are suspended and resumed with the host's native thread parking.
//! Nothing here creates threads.
//!

mod parker;

pub mod condvar;
pub mod lock;
pub mod queue;

pub use condvar::*;
pub use lock::*;
pub use queue::*;

pub use fastsync_core::{SyncConfig, SyncError, SyncResult, ThreadKey};

//!
//! Thread Identity
//!
//! Each thread gets a `ThreadKey` the first time it asks for one. Keys come
//! from a global counter and are never reused, so a stale owner word can
//! never be mistaken for a live thread that happens to share an OS id.
//!

use std::cell::Cell;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keys are shifted left by one in lock words; the top bit must stay clear.
const MAX_KEY: u64 = u64::MAX >> 1;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_KEY: Cell<u64> = const { Cell::new(0) };
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey(NonZeroU64);

impl ThreadKey {
    /// Identity of the calling thread.
    ///
    /// A thread whose locals are already torn down (a guard dropped from
    /// another thread-local's destructor) has no stored key. Each such call
    /// gets a freshly minted key that owns nothing, so an unlock from there
    /// reports `NotOwner` instead of panicking inside a destructor.
    pub fn current() -> Self {
        CURRENT_KEY
            .try_with(|slot| match Self::from_raw(slot.get()) {
                Some(key) => key,
                None => {
                    let key = Self::mint();
                    slot.set(key.get());
                    key
                }
            })
            .unwrap_or_else(|_| Self::mint())
    }

    fn mint() -> Self {
        let raw = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        match Self::from_raw(raw) {
            Some(key) => key,
            None => panic!("thread key space exhausted after {MAX_KEY} keys"),
        }
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw > MAX_KEY {
            return None;
        }
        NonZeroU64::new(raw).map(ThreadKey)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadKey({})", self.0)
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

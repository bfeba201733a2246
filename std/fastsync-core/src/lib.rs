//!
//! fastsync-core - Foundation Types
//!
//! Shared by every fastsync primitive crate.
//!
//! ## Errors
//!
//! `SyncError` covers the programming errors the primitives report:
//! - `NotOwner` - unlock or wait by a thread that does not hold the lock
//! - `Reentrancy` - lock by the thread that already holds it
//! - `Closed` - push onto, or drained shift from, a closed queue
//!
//! ## Thread Identity
//!
//! `ThreadKey` is a non-zero 64-bit identity assigned once per thread.
//! Locks store it as their owner word, so claiming a lock is one CAS.
//!
//! ## Configuration
//!
//! `SyncConfig` holds spin and capacity tunables, parsed from TOML.
//!

pub mod config;
pub mod error;
pub mod thread_key;

pub use config::*;
pub use error::*;
pub use thread_key::*;

//! `rill-cache`
//!
//! Per-resource block cache for streamed playback.
//!
//! A [`RemoteStream`] turns a remote HTTP resource into a bounded,
//! block-addressable local cache: the downloader inserts fixed-size blocks,
//! the playback side reads arbitrary byte ranges at its `read_head` and
//! blocks until they are cached. Waiters are woken by a condvar notified on
//! every insert and on every status-flag write, and re-check their
//! conditions at least every 20 ms so an external abort predicate
//! (interrupt, shutdown) is never observed late.
//!
//! Status flags form a monotone lattice: once `ready`, `faulted`,
//! `quit_requested`, `live_ended` or `live_private` is set it stays set.
//! Only `suspended` is togglable.

#![forbid(unsafe_code)]

mod layout;
mod stream;

pub use layout::CacheLayout;
pub use stream::{RemoteStream, WaitError, WaitOutcome};

/// Upper bound on how long a waiter sleeps before re-checking its abort
/// predicate. Notifications from `insert` and flag writes wake it earlier.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

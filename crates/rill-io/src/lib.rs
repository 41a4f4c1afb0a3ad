//! `rill-io`
//!
//! Sync I/O bridge from a [`RemoteStream`] cache to a demuxer.
//!
//! [`StreamReader`] satisfies the `std::io::Read + Seek` contract a pull
//! demuxer expects, blocking until the downloader has cached the requested
//! range. It is the single suspension point between demuxer I/O and
//! downloader progress.
//!
//! ## EOF semantics (normative)
//!
//! `read()` returns `Ok(0)` **only** for terminal conditions: the position is
//! at/past the stream length, the stream faulted or was quit, or the
//! consumer-side interrupt fired (in which case the shared `need_reinit`
//! flag is raised first). When data is merely not cached yet, the reader
//! blocks — no false EOFs.
//!
//! ## Blocking
//!
//! Waits ride the cache condvar and re-check the interrupt at least every
//! 20 ms. Do not call this from an async executor thread; drive the demuxer
//! from a dedicated thread.

#![forbid(unsafe_code)]

mod bridge;
mod flags;
mod reserve;

pub use bridge::StreamReader;
pub use flags::InterruptFlags;
pub use reserve::{CpuReserve, NoopReserve};

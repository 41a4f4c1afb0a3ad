//! `rill-fetch`
//!
//! Background fetch scheduler for rill stream caches.
//!
//! One [`Downloader`] serves any number of [`RemoteStream`]s from a single
//! background task: each iteration it picks the most urgent stream, performs
//! exactly one HTTP operation for it, and updates the stream's cache and
//! status flags. Streams whose length is still unknown always win; among the
//! rest the one whose first missing block is closest to its playhead
//! (smallest margin) is served first.
//!
//! Network errors are terminal at this layer: the stream is tombstoned via
//! its `faulted` flag and never retried. The layer above decides whether to
//! recreate the stream.
//!
//! [`RemoteStream`]: rill_cache::RemoteStream

#![forbid(unsafe_code)]

mod downloader;
mod parse;

pub use downloader::Downloader;

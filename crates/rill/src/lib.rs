//! # rill
//!
//! Streamed media playback core for resource-constrained devices: a
//! block-cache range downloader feeding a demux/decode driver through a
//! blocking I/O bridge.
//!
//! The member crates do the work; this facade re-exports their surfaces and
//! offers [`PlayerConfig`] to assemble a playback session:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rill::{Downloader, InterruptFlags, MediaSession, PlayerConfig, ReqwestNet};
//! use tokio_util::sync::CancellationToken;
//!
//! # fn backend() -> Arc<dyn rill::CodecBackend> { unimplemented!() }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlayerConfig::separate(
//!     "https://cdn.example.com/video.mp4",
//!     "https://cdn.example.com/audio.mp4",
//! )?;
//!
//! let net = Arc::new(ReqwestNet::new(config.net.clone())?);
//! let downloader = Downloader::new(net, CancellationToken::new());
//! let source = config.session_source();
//! for stream in source.streams() {
//!     downloader.register(&stream);
//! }
//!
//! let flags = Arc::new(InterruptFlags::new());
//! let session = MediaSession::open(backend(), source, flags)?;
//! # let _ = session;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod config;

pub use config::{MediaLocation, PlayerConfig};
pub use rill_cache::{CacheLayout, RemoteStream, WaitError, WaitOutcome};
pub use rill_fetch::Downloader;
pub use rill_io::{CpuReserve, InterruptFlags, NoopReserve, StreamReader};
pub use rill_media::{
    AudioChunk, AudioInfo, CodecBackend, DecodeDriver, DecodeKind, FrameView, InitStage,
    MediaError, MediaResult, MediaSession, SessionSource, VideoInfo, VideoStep,
};
pub use rill_net::{Net, NetError, NetOptions, ReqwestNet};

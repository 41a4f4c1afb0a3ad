//! `rill-media`
//!
//! Demux/decode driver over rill stream caches.
//!
//! The codec surface (demuxer, decoders, resampler, hardware video core) is
//! a set of object-safe traits behind a [`CodecBackend`] factory, so the
//! driver logic — packet interleaving, the software/hardware video paths
//! with their bounded frame rings, and the two-phase seek — is exercised the
//! same way against a production backend or the scripted one in
//! [`mock`].
//!
//! A [`MediaSession`] owns the demuxer(s) and codecs for one piece of
//! content; the [`DecodeDriver`] pumps packets out of the installed session
//! and decoded frames into its rings.

#![forbid(unsafe_code)]

mod annexb;
mod backend;
mod driver;
mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod packet;
mod pts_queue;
mod ring;
mod session;

pub use annexb::{ParameterSets, rewrite_length_prefixed};
pub use backend::{
    AudioDecoder, CodecBackend, Demuxer, HwStatus, HwVideo, MediaIo, Resampler, SeekTarget,
    VideoDecoder,
};
pub use driver::{AudioChunk, DecodeDriver, DecodeKind, FrameView, VideoStep, FRAME_RING_SLOTS};
pub use error::{InitStage, MediaError, MediaResult};
pub use packet::{
    AudioFrame, AudioInfo, AudioParams, DemuxedPacket, SampleFormat, TimeBase, TrackInfo,
    TrackKind, VideoFrame, VideoInfo, VideoParams,
};
pub use pts_queue::PtsQueue;
pub use ring::FixedRing;
pub use session::{MediaSession, SessionSource};

use std::io::{Read, Seek};

use crate::{
    error::MediaResult,
    packet::{AudioFrame, AudioParams, DemuxedPacket, TrackInfo, VideoFrame, VideoParams},
};

/// Byte source handed to a demuxer: blocking reads, seeking, and the total
/// length once known.
pub trait MediaIo: Read + Seek + Send {
    fn byte_len(&self) -> Option<u64>;
}

impl MediaIo for rill_io::StreamReader {
    fn byte_len(&self) -> Option<u64> {
        rill_io::StreamReader::byte_len(self)
    }
}

/// Seek request for a demuxer: land as close to `target_us` as the container
/// allows, never outside `[min_us, max_us]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekTarget {
    pub target_us: i64,
    pub min_us: i64,
    pub max_us: i64,
}

impl SeekTarget {
    /// A window of `slack_us` on both sides of the target.
    #[must_use]
    pub fn windowed(target_us: i64, slack_us: i64) -> Self {
        Self {
            target_us,
            min_us: target_us - slack_us,
            max_us: target_us + slack_us,
        }
    }

    /// Land exactly on `target_us` (used to pin audio to a landed video
    /// position).
    #[must_use]
    pub fn exact(target_us: i64) -> Self {
        Self {
            target_us,
            min_us: target_us,
            max_us: target_us,
        }
    }
}

/// A container demuxer over one [`MediaIo`].
pub trait Demuxer: Send {
    fn tracks(&self) -> &[TrackInfo];

    /// Container duration in seconds, when the index declares one.
    fn duration_secs(&self) -> Option<f64>;

    /// Pull the next packet in container order; `None` at end of stream.
    fn read_packet(&mut self) -> MediaResult<Option<DemuxedPacket>>;

    fn seek(&mut self, target: SeekTarget) -> MediaResult<()>;
}

/// Software video decoder: one packet in, one frame out.
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &DemuxedPacket) -> MediaResult<VideoFrame>;

    /// Drop internal reference frames after a seek.
    fn flush(&mut self);
}

/// Audio decoder: one packet in, one frame out.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &DemuxedPacket) -> MediaResult<AudioFrame>;

    fn flush(&mut self);
}

/// Converts decoded audio to interleaved signed 16-bit PCM at the source
/// rate and channel layout.
pub trait Resampler: Send {
    /// Returns the number of samples per channel written into `out`.
    fn convert(&mut self, frame: &AudioFrame, out: &mut [u8]) -> MediaResult<usize>;
}

/// Result of pushing one NAL buffer into the hardware decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwStatus {
    /// A decoded frame is ready to render.
    FrameReady,
    /// Input consumed, no frame yet.
    Accepted,
    /// The unit was rejected with a platform status code; recoverable, the
    /// packet is simply dropped.
    Rejected(i32),
}

impl HwStatus {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// The platform hardware H.264 core. Decode is asynchronous with respect to
/// packet identity: frames come out in decode order with no link back to the
/// packet that produced them.
pub trait HwVideo: Send {
    /// Feed one Annex-B NAL buffer.
    fn submit(&mut self, annexb: &[u8]) -> MediaResult<HwStatus>;

    /// Blit the completed frame into `out` (NV12-sized: `width * height * 2`
    /// as configured at creation).
    fn render(&mut self, out: &mut [u8]) -> MediaResult<()>;
}

/// Factory for the codec seams of one session.
///
/// Implementations tag their initialization failures with the appropriate
/// [`InitStage`](crate::InitStage) so callers can tell a probe failure from
/// a codec-open failure.
pub trait CodecBackend: Send + Sync {
    fn open_demuxer(&self, io: Box<dyn MediaIo>) -> MediaResult<Box<dyn Demuxer>>;

    fn open_video_decoder(&self, params: &VideoParams) -> MediaResult<Box<dyn VideoDecoder>>;

    fn open_audio_decoder(&self, params: &AudioParams) -> MediaResult<Box<dyn AudioDecoder>>;

    fn open_resampler(&self, params: &AudioParams) -> MediaResult<Box<dyn Resampler>>;

    /// Open the hardware decode core for frames of the given (16-aligned)
    /// output dimensions.
    fn open_hw_video(&self, width: u32, height: u32) -> MediaResult<Box<dyn HwVideo>>;
}

use std::{collections::VecDeque, sync::Arc};

use rill_io::InterruptFlags;
use tracing::{debug, warn};

use crate::{
    annexb::{self, ParameterSets},
    backend::{CodecBackend, HwStatus, HwVideo, SeekTarget},
    error::{MediaError, MediaResult},
    packet::{AudioInfo, DemuxedPacket, TimeBase, TrackKind, VideoFrame, VideoInfo},
    pts_queue::PtsQueue,
    ring::FixedRing,
    session::MediaSession,
};

/// Decoded-frame ring depth on both video paths.
pub const FRAME_RING_SLOTS: usize = 11;

/// Seek slack on the windowed (first-phase) demuxer seek.
const SEEK_WINDOW_US: i64 = 1_000_000;

/// Which track the interleave policy wants decoded next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeKind {
    Video,
    Audio,
    Eof,
}

/// Outcome of one video decode step.
#[derive(Clone, Debug, PartialEq)]
pub enum VideoStep {
    Decoded {
        width: u32,
        height: u32,
        pts: f64,
        keyframe: bool,
    },
    /// The frame ring is full; pop a frame first and retry.
    RingFull,
}

/// One decoded and resampled audio packet.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    /// Interleaved signed 16-bit PCM, `samples * 2 * channels` bytes.
    pub data: Vec<u8>,
    /// Converted payload size accounted as `samples * 2`.
    pub byte_len: usize,
    /// Presentation position in seconds (timestamp offset applied).
    pub pts: f64,
}

/// Borrowed view of a delivered video frame; valid until the next delivery.
#[derive(Debug)]
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pts: f64,
}

#[derive(Default)]
struct SwSlot {
    frame: VideoFrame,
    pts: f64,
}

struct SwPath {
    ring: FixedRing<SwSlot>,
    /// Packed YUV420 output buffer the delivered frame is assembled into.
    scratch: Vec<u8>,
    width: u32,
    height: u32,
}

struct HwPath {
    core: Box<dyn HwVideo>,
    ring: FixedRing<Vec<u8>>,
    pts: PtsQueue,
    /// Device-visible landing buffer the core renders into.
    linear: Vec<u8>,
    /// Annex-B rewrite buffer, reused across packets.
    submit: Vec<u8>,
    /// First decode of this session: parameter sets still to emit, first
    /// output frame still to discard.
    first: bool,
    width: u32,
    height: u32,
}

enum VideoPath {
    Software(SwPath),
    Hardware(HwPath),
}

fn queue_index(kind: TrackKind) -> usize {
    match kind {
        TrackKind::Video => 0,
        TrackKind::Audio => 1,
    }
}

fn align16(v: u32) -> u32 {
    v.div_ceil(16) * 16
}

/// The decode pump: pulls demuxed packets out of the installed
/// [`MediaSession`], interleaves the two tracks by decode timestamp, and
/// pushes decoded frames into bounded rings for the renderer.
pub struct DecodeDriver {
    backend: Arc<dyn CodecBackend>,
    flags: Arc<InterruptFlags>,
    hw_requested: bool,
    session: Option<MediaSession>,
    video: Option<VideoPath>,
    queues: [VecDeque<DemuxedPacket>; 2],
    timestamp_offset: f64,
}

impl DecodeDriver {
    #[must_use]
    pub fn new(backend: Arc<dyn CodecBackend>, flags: Arc<InterruptFlags>, hw_decode: bool) -> Self {
        Self {
            backend,
            flags,
            hw_requested: hw_decode,
            session: None,
            video: None,
            queues: [VecDeque::new(), VecDeque::new()],
            timestamp_offset: 0.0,
        }
    }

    /// Install a prepared session and start decoding it at `timestamp_offset`
    /// seconds. Clears any pending interrupt.
    pub fn install(&mut self, session: MediaSession, timestamp_offset: f64) -> MediaResult<()> {
        self.flags.clear();
        self.queues = [VecDeque::new(), VecDeque::new()];

        self.video = match session.video_track().and_then(|t| t.video.clone()) {
            Some(params) => {
                let width = align16(params.width);
                let height = align16(params.height);
                Some(if self.hw_requested {
                    let frame_bytes = (width * height * 2) as usize;
                    VideoPath::Hardware(HwPath {
                        core: self.backend.open_hw_video(width, height)?,
                        ring: FixedRing::new(
                            (0..FRAME_RING_SLOTS).map(|_| vec![0u8; frame_bytes]).collect(),
                        ),
                        pts: PtsQueue::new(),
                        linear: vec![0u8; frame_bytes],
                        submit: Vec::new(),
                        first: true,
                        width,
                        height,
                    })
                } else {
                    VideoPath::Software(SwPath {
                        ring: FixedRing::with_capacity(FRAME_RING_SLOTS),
                        scratch: vec![0u8; (width * height) as usize * 3 / 2],
                        width,
                        height,
                    })
                })
            }
            None => None,
        };

        self.session = Some(session);
        self.timestamp_offset = timestamp_offset;
        Ok(())
    }

    #[must_use]
    pub fn session(&self) -> Option<&MediaSession> {
        self.session.as_ref()
    }

    /// Abort the next blocking read of every non-exempt stream.
    pub fn interrupt(&self) {
        self.flags.interrupt();
    }

    /// Set after an interrupted read; cleared by [`reinit`](Self::reinit).
    #[must_use]
    pub fn needs_reinit(&self) -> bool {
        self.flags.needs_reinit()
    }

    /// Rebuild the session after an interrupt-driven abort. Buffers are
    /// dropped; the video path (including the hardware core) survives.
    pub fn reinit(&mut self) -> MediaResult<()> {
        let session = self.session.as_mut().ok_or(MediaError::NoSession)?;
        session.reinit()?;
        self.flags.clear();
        self.clear_buffers();
        Ok(())
    }

    /// Drop the session and everything buffered from it.
    pub fn deinit(&mut self) {
        self.session = None;
        self.video = None;
        self.queues = [VecDeque::new(), VecDeque::new()];
        self.flags.clear();
        self.timestamp_offset = 0.0;
    }

    /// Clear both packet queues, the frame ring and the pts queue.
    pub fn clear_buffers(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        match &mut self.video {
            Some(VideoPath::Software(sw)) => sw.ring.clear(),
            Some(VideoPath::Hardware(hw)) => {
                hw.ring.clear();
                hw.pts.clear();
            }
            None => {}
        }
    }

    // -- packet pump --------------------------------------------------------

    /// Read one packet from the demuxer serving `kind` and append it to the
    /// queue it belongs to. `Ok(false)` is end of stream.
    fn pump(
        session: &mut MediaSession,
        queues: &mut [VecDeque<DemuxedPacket>; 2],
        kind: TrackKind,
    ) -> MediaResult<bool> {
        let separate = session.is_separate();
        let Some(packet) = session.demuxer_for(kind).read_packet()? else {
            return Ok(false);
        };
        let routed = if separate {
            kind
        } else {
            session.route_combined(&packet)
        };
        queues[queue_index(routed)].push_back(packet);
        Ok(true)
    }

    /// Refill `kind`'s queue after a decode consumed its head. Errors and
    /// EOF just leave the queue empty.
    fn refill(
        session: &mut MediaSession,
        queues: &mut [VecDeque<DemuxedPacket>; 2],
        kind: TrackKind,
    ) {
        while queues[queue_index(kind)].is_empty() {
            match Self::pump(session, queues, kind) {
                Ok(true) => {}
                Ok(false) | Err(_) => break,
            }
        }
    }

    /// Which track to decode next.
    ///
    /// Both queues are topped up first; with both non-empty the earlier head
    /// decode timestamp (in seconds) wins and ties go to video.
    pub fn next_decode_type(&mut self) -> MediaResult<DecodeKind> {
        let session = self.session.as_mut().ok_or(MediaError::NoSession)?;
        let queues = &mut self.queues;

        if session.is_separate() {
            for kind in [TrackKind::Video, TrackKind::Audio] {
                if queues[queue_index(kind)].is_empty() {
                    let _ = Self::pump(session, queues, kind);
                }
            }
        } else {
            let need_video = !session.audio_only();
            while (need_video && queues[0].is_empty()) || queues[1].is_empty() {
                match Self::pump(session, queues, TrackKind::Audio) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => break,
                }
            }
        }

        Ok(match (self.queues[0].front(), self.queues[1].front()) {
            (None, None) => DecodeKind::Eof,
            (Some(_), None) => DecodeKind::Video,
            (None, Some(_)) => DecodeKind::Audio,
            (Some(video), Some(audio)) => {
                let video_dts = session
                    .video_time_base()
                    .unwrap_or(TimeBase::MICROSECONDS)
                    .seconds(video.order_ticks());
                let audio_dts = session.audio_time_base().seconds(audio.order_ticks());
                if video_dts <= audio_dts {
                    DecodeKind::Video
                } else {
                    DecodeKind::Audio
                }
            }
        })
    }

    // -- video --------------------------------------------------------------

    /// Decode the head video packet into the frame ring.
    ///
    /// A decode failure consumes the packet and surfaces the error; the
    /// caller moves on to the next packet.
    pub fn decode_video(&mut self) -> MediaResult<VideoStep> {
        let session = self.session.as_mut().ok_or(MediaError::NoSession)?;
        let path = self
            .video
            .as_mut()
            .ok_or_else(|| MediaError::Decode("no video in this session".into()))?;

        let ring_full = match path {
            VideoPath::Software(sw) => sw.ring.is_full(),
            VideoPath::Hardware(hw) => hw.ring.is_full(),
        };
        if ring_full {
            return Ok(VideoStep::RingFull);
        }

        let queues = &mut self.queues;
        let Some(packet) = queues[0].pop_front() else {
            return Err(MediaError::Decode("no buffered video packet".into()));
        };
        let time_base = session.video_time_base().unwrap_or(TimeBase::MICROSECONDS);

        let result = match path {
            VideoPath::Software(sw) => {
                Self::decode_video_sw(session, sw, &packet, time_base, self.timestamp_offset)
            }
            VideoPath::Hardware(hw) => {
                Self::decode_video_hw(session, hw, &packet, time_base, self.timestamp_offset)
            }
        };

        Self::refill(session, queues, TrackKind::Video);
        result
    }

    fn decode_video_sw(
        session: &mut MediaSession,
        sw: &mut SwPath,
        packet: &DemuxedPacket,
        time_base: TimeBase,
        offset: f64,
    ) -> MediaResult<VideoStep> {
        let decoder = session
            .video_decoder_mut()
            .ok_or_else(|| MediaError::Decode("no video decoder".into()))?;
        let frame = decoder.decode(packet)?;

        let pts_ticks = frame.pts.or(packet.dts).unwrap_or(0);
        let pts = time_base.seconds(pts_ticks) + offset;
        let width = frame.width;
        let height = frame.height;

        let Some(slot) = sw.ring.write_slot() else {
            // fullness was checked before the packet was consumed
            return Ok(VideoStep::RingFull);
        };
        *slot = SwSlot { frame, pts };
        sw.ring.publish();

        Ok(VideoStep::Decoded {
            width,
            height,
            pts,
            keyframe: packet.keyframe,
        })
    }

    fn decode_video_hw(
        session: &mut MediaSession,
        hw: &mut HwPath,
        packet: &DemuxedPacket,
        time_base: TimeBase,
        offset: f64,
    ) -> MediaResult<VideoStep> {
        if hw.first {
            let extradata = session
                .video_track()
                .and_then(|t| t.video.as_ref())
                .and_then(|v| v.extradata.as_ref())
                .ok_or_else(|| MediaError::Hardware("missing codec extradata".into()))?;
            let sets = ParameterSets::from_avcc(extradata)
                .ok_or_else(|| MediaError::Hardware("malformed avcC extradata".into()))?;
            for unit in [sets.sps_unit(), sets.pps_unit()] {
                if let HwStatus::Rejected(code) = hw.core.submit(&unit)? {
                    warn!(code, "parameter set rejected by hardware");
                }
            }
        }

        hw.submit.clear();
        annexb::rewrite_length_prefixed(&packet.data, &mut hw.submit);

        let mut status = hw.core.submit(&hw.submit)?;
        if hw.first {
            // The core ignores the first payload after a session change
            // unless it is pushed twice. Unclear whether that is a platform
            // requirement or a workaround; kept as observed.
            status = hw.core.submit(&hw.submit)?;
            if let HwStatus::Rejected(code) = status {
                warn!(code, "first-frame resubmission rejected");
            }
        }

        let pts = time_base.seconds(packet.position_ticks().unwrap_or(0)) + offset;
        if status.is_accepted() {
            hw.pts.insert(pts);
        }

        match status {
            HwStatus::FrameReady => {
                hw.core.render(&mut hw.linear)?;
                if hw.first {
                    // the frame belongs to the previous session; drop it
                    debug!("discarding stale first hardware frame");
                } else if let Some(slot) = hw.ring.write_slot() {
                    let copy_len = hw.linear.len() / 32 * 32;
                    slot[..copy_len].copy_from_slice(&hw.linear[..copy_len]);
                    hw.ring.publish();
                }
            }
            HwStatus::Accepted => {}
            HwStatus::Rejected(code) => warn!(code, "hardware rejected video packet"),
        }
        hw.first = false;

        Ok(VideoStep::Decoded {
            width: hw.width,
            height: hw.height,
            pts,
            keyframe: packet.keyframe,
        })
    }

    /// Hand out the next decoded frame, or `None` when the ring is empty
    /// (more input needed). The view stays valid until the next call.
    pub fn next_frame(&mut self) -> MediaResult<Option<FrameView<'_>>> {
        let path = self
            .video
            .as_mut()
            .ok_or_else(|| MediaError::Decode("no video in this session".into()))?;

        match path {
            VideoPath::Hardware(hw) => {
                if hw.ring.is_empty() {
                    return Ok(None);
                }
                let width = hw.width;
                let height = hw.height;
                let pts = hw.pts.pop_min().unwrap_or_else(|| {
                    warn!("pts queue empty on frame delivery");
                    0.0
                });
                let Some(data) = hw.ring.pop_ref() else {
                    return Ok(None);
                };
                Ok(Some(FrameView {
                    data,
                    width,
                    height,
                    pts,
                }))
            }
            VideoPath::Software(sw) => {
                let Some(slot) = sw.ring.pop_take() else {
                    return Ok(None);
                };
                let luma = (sw.width * sw.height) as usize;
                let chroma = luma / 4;
                let copy_luma = luma - luma % 32;
                let copy_chroma = chroma - chroma % 32;

                for (plane, (offset, len)) in slot.frame.planes.iter().zip([
                    (0usize, copy_luma),
                    (luma, copy_chroma),
                    (luma + chroma, copy_chroma),
                ]) {
                    let n = len.min(plane.len());
                    sw.scratch[offset..offset + n].copy_from_slice(&plane[..n]);
                }

                Ok(Some(FrameView {
                    data: &sw.scratch,
                    width: sw.width,
                    height: sw.height,
                    pts: slot.pts,
                }))
            }
        }
    }

    // -- audio --------------------------------------------------------------

    /// Decode and resample the head audio packet.
    pub fn decode_audio(&mut self) -> MediaResult<AudioChunk> {
        let session = self.session.as_mut().ok_or(MediaError::NoSession)?;
        let queues = &mut self.queues;
        let Some(packet) = queues[1].pop_front() else {
            return Err(MediaError::Decode("no buffered audio packet".into()));
        };

        let pts = session
            .audio_time_base()
            .seconds(packet.position_ticks().unwrap_or(0))
            + self.timestamp_offset;

        let result: MediaResult<AudioChunk> = (|| {
            let frame = session.audio_decoder_mut().decode(&packet)?;
            let channels = usize::from(frame.channels.max(1));
            let mut data = vec![0u8; frame.samples * 2 * channels];
            let samples = session.resampler_mut().convert(&frame, &mut data)?;
            Ok(AudioChunk {
                data,
                byte_len: samples * 2,
                pts,
            })
        })();

        Self::refill(session, queues, TrackKind::Audio);
        result
    }

    // -- seek ---------------------------------------------------------------

    /// Reposition playback to `microseconds`.
    ///
    /// Separate mode seeks video inside a ±1 s window, pins the landed
    /// position by reading one packet, then seeks audio exactly there.
    /// Buffers are cleared up front; a demuxer failure surfaces as
    /// [`MediaError::SeekFailed`] without partially advancing.
    pub fn seek(&mut self, microseconds: i64) -> MediaResult<()> {
        if self.session.is_none() {
            return Err(MediaError::NoSession);
        }
        self.clear_buffers();

        let session = self.session.as_mut().ok_or(MediaError::NoSession)?;
        let queues = &mut self.queues;

        if session.is_separate() {
            session
                .demuxer_for(TrackKind::Video)
                .seek(SeekTarget::windowed(microseconds, SEEK_WINDOW_US))
                .map_err(seek_err)?;
            if let Some(decoder) = session.video_decoder_mut() {
                decoder.flush();
            }
            if !Self::pump(session, queues, TrackKind::Video).map_err(seek_err)? {
                return Err(MediaError::SeekFailed(
                    "end of stream while repositioning video".into(),
                ));
            }
            let Some(head) = queues[0].front() else {
                return Err(MediaError::SeekFailed("video queue empty after seek".into()));
            };

            // pin audio to wherever video actually landed
            let landed_us = session
                .video_time_base()
                .unwrap_or(TimeBase::MICROSECONDS)
                .micros(head.position_ticks().unwrap_or(0));
            session
                .demuxer_for(TrackKind::Audio)
                .seek(SeekTarget::exact(landed_us))
                .map_err(seek_err)?;
            session.audio_decoder_mut().flush();
            if !Self::pump(session, queues, TrackKind::Audio).map_err(seek_err)? {
                return Err(MediaError::SeekFailed(
                    "end of stream while repositioning audio".into(),
                ));
            }
        } else {
            session
                .demuxer_for(TrackKind::Audio)
                .seek(SeekTarget::windowed(microseconds, SEEK_WINDOW_US))
                .map_err(seek_err)?;
            if let Some(decoder) = session.video_decoder_mut() {
                decoder.flush();
            }
            session.audio_decoder_mut().flush();

            let need_video = !session.audio_only();
            while (need_video && queues[0].is_empty()) || queues[1].is_empty() {
                if !Self::pump(session, queues, TrackKind::Audio).map_err(seek_err)? {
                    return Err(MediaError::SeekFailed(
                        "end of stream while refilling queues".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    // -- consumer info ------------------------------------------------------

    pub fn video_info(&self) -> MediaResult<VideoInfo> {
        let session = self.session.as_ref().ok_or(MediaError::NoSession)?;
        Ok(match session.video_track().and_then(|t| t.video.as_ref()) {
            None => VideoInfo {
                width: 0,
                height: 0,
                frame_rate: 0.0,
                codec_name: "N/A".into(),
                duration_secs: 0.0,
            },
            Some(params) => VideoInfo {
                width: params.width,
                height: params.height,
                frame_rate: params.frame_rate,
                codec_name: params.codec_name.clone(),
                duration_secs: session.video_duration(),
            },
        })
    }

    pub fn audio_info(&self) -> MediaResult<AudioInfo> {
        let session = self.session.as_ref().ok_or(MediaError::NoSession)?;
        let params = session
            .audio_track()
            .audio
            .as_ref()
            .ok_or_else(|| MediaError::Decode("audio track without parameters".into()))?;
        Ok(AudioInfo {
            bit_rate: params.bit_rate,
            sample_rate: params.sample_rate,
            channels: params.channels,
            codec_name: params.codec_name.clone(),
            duration_secs: session.audio_duration(),
        })
    }

    /// Per-stream buffering state for progress bars: the fraction of the
    /// resource behind the playhead, plus per-segment cache coverage.
    pub fn buffering_progress(&self, bar_len: usize) -> MediaResult<Vec<(f64, Vec<f64>)>> {
        let session = self.session.as_ref().ok_or(MediaError::NoSession)?;
        Ok(session
            .streams()
            .iter()
            .map(|stream| {
                if stream.is_quit_requested() || stream.is_empty() {
                    (0.0, Vec::new())
                } else {
                    (
                        stream.read_head() as f64 / stream.len() as f64,
                        stream.progress_bar(bar_len),
                    )
                }
            })
            .collect())
    }
}

fn seek_err(err: MediaError) -> MediaError {
    match err {
        MediaError::SeekFailed(_) => err,
        other => MediaError::SeekFailed(other.to_string()),
    }
}

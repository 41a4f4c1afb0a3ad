//! Scripted codec backend for driver and session tests.
//!
//! [`MockBackend`] hands out demuxers queued with
//! [`push_demuxer`](MockBackend::push_demuxer) in open order, decoders that
//! synthesize deterministic frames from the packets they are fed, and a
//! hardware core whose submit statuses can be scripted per call.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    backend::{
        AudioDecoder, CodecBackend, Demuxer, HwStatus, HwVideo, MediaIo, Resampler, SeekTarget,
        VideoDecoder,
    },
    error::{InitStage, MediaError, MediaResult},
    packet::{
        AudioFrame, AudioParams, DemuxedPacket, SampleFormat, TimeBase, TrackInfo, VideoFrame,
        VideoParams,
    },
};

/// Default mock video geometry (multiples of 16 on purpose: the aligned
/// output equals the coded size).
pub const MOCK_WIDTH: u32 = 64;
pub const MOCK_HEIGHT: u32 = 48;

/// Samples per channel every mock audio decode produces.
pub const MOCK_AUDIO_SAMPLES: usize = 960;

/// A minimal valid `avcC` box with one SPS and one PPS.
#[must_use]
pub fn sample_avcc() -> Bytes {
    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9];
    const PPS: &[u8] = &[0x68, 0xeb, 0xe3, 0xcb];

    let mut avcc = vec![0x01, 0x64, 0x00, 0x1f, 0xff, 0xe1, 0x00, SPS.len() as u8];
    avcc.extend_from_slice(SPS);
    avcc.push(0x01);
    avcc.push(0x00);
    avcc.push(PPS.len() as u8);
    avcc.extend_from_slice(PPS);
    Bytes::from(avcc)
}

/// A 100 Hz video track with mock geometry and sample extradata.
#[must_use]
pub fn video_track(index: usize) -> TrackInfo {
    TrackInfo::video(
        index,
        TimeBase::new(1, 100),
        VideoParams {
            codec_name: "h264".into(),
            width: MOCK_WIDTH,
            height: MOCK_HEIGHT,
            frame_rate: 30.0,
            extradata: Some(sample_avcc()),
        },
    )
}

/// A 100 Hz stereo audio track.
#[must_use]
pub fn audio_track(index: usize) -> TrackInfo {
    TrackInfo::audio(
        index,
        TimeBase::new(1, 100),
        AudioParams {
            codec_name: "aac".into(),
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::F32,
            bit_rate: 128_000,
        },
    )
}

/// A keyframe packet whose payload is one length-prefixed NAL unit carrying
/// `fill` bytes.
#[must_use]
pub fn video_packet(index: usize, ticks: i64, keyframe: bool, fill: u8) -> DemuxedPacket {
    let nal = [fill; 8];
    let mut data = Vec::with_capacity(4 + nal.len());
    data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
    data.extend_from_slice(&nal);
    DemuxedPacket {
        stream_index: index,
        pts: Some(ticks),
        dts: Some(ticks),
        keyframe,
        data: Bytes::from(data),
    }
}

#[must_use]
pub fn audio_packet(index: usize, ticks: i64) -> DemuxedPacket {
    DemuxedPacket {
        stream_index: index,
        pts: Some(ticks),
        dts: Some(ticks),
        keyframe: true,
        data: Bytes::from_static(&[0xAA; 16]),
    }
}

/// Scripted demuxer over a fixed packet timeline.
pub struct MockDemuxer {
    tracks: Vec<TrackInfo>,
    timeline: Vec<DemuxedPacket>,
    cursor: usize,
    duration: Option<f64>,
    seek_log: Arc<Mutex<Vec<SeekTarget>>>,
    seek_failures: Mutex<VecDeque<String>>,
}

#[must_use]
pub fn demuxer_with_tracks(tracks: Vec<TrackInfo>) -> MockDemuxer {
    MockDemuxer::new(tracks, Vec::new())
}

impl MockDemuxer {
    #[must_use]
    pub fn new(tracks: Vec<TrackInfo>, timeline: Vec<DemuxedPacket>) -> Self {
        Self {
            tracks,
            timeline,
            cursor: 0,
            duration: None,
            seek_log: Arc::new(Mutex::new(Vec::new())),
            seek_failures: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    /// Shared log of every seek target this demuxer received.
    #[must_use]
    pub fn seek_log(&self) -> Arc<Mutex<Vec<SeekTarget>>> {
        Arc::clone(&self.seek_log)
    }

    /// Make the next `seek` call fail with a demux error.
    pub fn fail_next_seek(&self, detail: impl Into<String>) {
        self.seek_failures.lock().push_back(detail.into());
    }

    fn packet_micros(&self, packet: &DemuxedPacket) -> i64 {
        let time_base = self
            .tracks
            .iter()
            .find(|t| t.index == packet.stream_index)
            .map_or(TimeBase::MICROSECONDS, |t| t.time_base);
        time_base.micros(packet.position_ticks().unwrap_or(0))
    }
}

impl Demuxer for MockDemuxer {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn duration_secs(&self) -> Option<f64> {
        self.duration
    }

    fn read_packet(&mut self) -> MediaResult<Option<DemuxedPacket>> {
        let Some(packet) = self.timeline.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(packet.clone()))
    }

    /// Land on the last keyframe at or before the target (every packet
    /// counts when the timeline has no keyframes at all).
    fn seek(&mut self, target: SeekTarget) -> MediaResult<()> {
        self.seek_log.lock().push(target);
        if let Some(detail) = self.seek_failures.lock().pop_front() {
            return Err(MediaError::Demux(detail));
        }

        let any_keyframe = self.timeline.iter().any(|p| p.keyframe);
        let mut landing = 0;
        for (i, packet) in self.timeline.iter().enumerate() {
            let eligible = packet.keyframe || !any_keyframe;
            if eligible && self.packet_micros(packet) <= target.target_us {
                landing = i;
            }
        }
        self.cursor = landing;
        Ok(())
    }
}

struct MockVideoDecoder {
    params: VideoParams,
    flushes: Arc<AtomicUsize>,
}

impl VideoDecoder for MockVideoDecoder {
    fn decode(&mut self, packet: &DemuxedPacket) -> MediaResult<VideoFrame> {
        // plane bytes derive from the payload so tests can trace a frame
        // back to the packet that produced it
        let fill = packet.data.last().copied().unwrap_or(0);
        let luma = (self.params.width * self.params.height) as usize;
        Ok(VideoFrame {
            width: self.params.width,
            height: self.params.height,
            planes: [
                vec![fill; luma],
                vec![fill.wrapping_add(1); luma / 4],
                vec![fill.wrapping_add(2); luma / 4],
            ],
            pts: packet.pts,
        })
    }

    fn flush(&mut self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockAudioDecoder {
    params: AudioParams,
    flushes: Arc<AtomicUsize>,
}

impl AudioDecoder for MockAudioDecoder {
    fn decode(&mut self, packet: &DemuxedPacket) -> MediaResult<AudioFrame> {
        let channels = self.params.channels;
        Ok(AudioFrame {
            samples: MOCK_AUDIO_SAMPLES,
            channels,
            sample_rate: self.params.sample_rate,
            data: vec![vec![0u8; MOCK_AUDIO_SAMPLES * 4]; usize::from(channels)],
            pts: packet.pts,
        })
    }

    fn flush(&mut self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockResampler;

impl Resampler for MockResampler {
    fn convert(&mut self, frame: &AudioFrame, out: &mut [u8]) -> MediaResult<usize> {
        out.fill(0x5A);
        Ok(frame.samples)
    }
}

struct MockHwVideo {
    statuses: Arc<Mutex<VecDeque<HwStatus>>>,
    submissions: Arc<Mutex<Vec<Vec<u8>>>>,
    rendered: u8,
}

impl HwVideo for MockHwVideo {
    fn submit(&mut self, annexb: &[u8]) -> MediaResult<HwStatus> {
        self.submissions.lock().push(annexb.to_vec());
        Ok(self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or(HwStatus::FrameReady))
    }

    fn render(&mut self, out: &mut [u8]) -> MediaResult<()> {
        self.rendered = self.rendered.wrapping_add(1);
        out.fill(self.rendered);
        Ok(())
    }
}

/// Scripted [`CodecBackend`].
#[derive(Default)]
pub struct MockBackend {
    demuxers: Mutex<VecDeque<MockDemuxer>>,
    hw_statuses: Arc<Mutex<VecDeque<HwStatus>>>,
    hw_submissions: Arc<Mutex<Vec<Vec<u8>>>>,
    video_flushes: Arc<AtomicUsize>,
    audio_flushes: Arc<AtomicUsize>,
    fail_stage: Mutex<Option<InitStage>>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a demuxer; `open_demuxer` hands them out in this order.
    pub fn push_demuxer(&self, demuxer: MockDemuxer) {
        self.demuxers.lock().push_back(demuxer);
    }

    /// Script the statuses of upcoming hardware submits; once exhausted,
    /// every submit reports `FrameReady`.
    pub fn script_hw_statuses(&self, statuses: impl IntoIterator<Item = HwStatus>) {
        self.hw_statuses.lock().extend(statuses);
    }

    /// Every Annex-B buffer pushed into the hardware core, in order.
    #[must_use]
    pub fn hw_submissions(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.hw_submissions)
    }

    #[must_use]
    pub fn video_flushes(&self) -> usize {
        self.video_flushes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn audio_flushes(&self) -> usize {
        self.audio_flushes.load(Ordering::SeqCst)
    }

    /// Make initialization fail at the given stage.
    pub fn fail_at(&self, stage: InitStage) {
        *self.fail_stage.lock() = Some(stage);
    }

    fn check_stage(&self, stage: InitStage) -> MediaResult<()> {
        if *self.fail_stage.lock() == Some(stage) {
            return Err(MediaError::init(stage, "scripted failure"));
        }
        Ok(())
    }
}

impl CodecBackend for MockBackend {
    fn open_demuxer(&self, _io: Box<dyn MediaIo>) -> MediaResult<Box<dyn Demuxer>> {
        self.check_stage(InitStage::OpenInput)?;
        self.check_stage(InitStage::StreamInfo)?;
        let demuxer = self
            .demuxers
            .lock()
            .pop_front()
            .ok_or_else(|| MediaError::init(InitStage::OpenInput, "no scripted demuxer left"))?;
        Ok(Box::new(demuxer))
    }

    fn open_video_decoder(&self, params: &VideoParams) -> MediaResult<Box<dyn VideoDecoder>> {
        self.check_stage(InitStage::CodecLookup)?;
        self.check_stage(InitStage::CodecOpen)?;
        Ok(Box::new(MockVideoDecoder {
            params: params.clone(),
            flushes: Arc::clone(&self.video_flushes),
        }))
    }

    fn open_audio_decoder(&self, params: &AudioParams) -> MediaResult<Box<dyn AudioDecoder>> {
        self.check_stage(InitStage::CodecLookup)?;
        self.check_stage(InitStage::CodecOpen)?;
        Ok(Box::new(MockAudioDecoder {
            params: params.clone(),
            flushes: Arc::clone(&self.audio_flushes),
        }))
    }

    fn open_resampler(&self, _params: &AudioParams) -> MediaResult<Box<dyn Resampler>> {
        self.check_stage(InitStage::Resampler)?;
        Ok(Box::new(MockResampler))
    }

    fn open_hw_video(&self, _width: u32, _height: u32) -> MediaResult<Box<dyn HwVideo>> {
        Ok(Box::new(MockHwVideo {
            statuses: Arc::clone(&self.hw_statuses),
            submissions: Arc::clone(&self.hw_submissions),
            rendered: 0,
        }))
    }
}

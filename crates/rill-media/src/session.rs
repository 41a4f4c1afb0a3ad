use std::sync::Arc;

use rill_cache::RemoteStream;
use rill_io::{CpuReserve, InterruptFlags, NoopReserve, StreamReader};
use tracing::debug;

use crate::{
    backend::{AudioDecoder, CodecBackend, Demuxer, Resampler, VideoDecoder},
    error::{InitStage, MediaError, MediaResult},
    packet::{DemuxedPacket, TimeBase, TrackInfo, TrackKind},
};

/// Where a session's content comes from.
#[derive(Clone, Debug)]
pub enum SessionSource {
    /// One stream carrying multiplexed video+audio (or audio alone).
    Combined(RemoteStream),
    /// Two streams, one elementary stream each.
    Separate {
        video: RemoteStream,
        audio: RemoteStream,
    },
}

impl SessionSource {
    /// The backing streams, video first.
    #[must_use]
    pub fn streams(&self) -> Vec<RemoteStream> {
        match self {
            Self::Combined(stream) => vec![stream.clone()],
            Self::Separate { video, audio } => vec![video.clone(), audio.clone()],
        }
    }
}

enum Demux {
    Combined {
        demuxer: Box<dyn Demuxer>,
        video_index: Option<usize>,
        audio_index: usize,
    },
    Separate {
        video: Box<dyn Demuxer>,
        audio: Box<dyn Demuxer>,
    },
}

struct Codecs {
    video_decoder: Option<Box<dyn VideoDecoder>>,
    audio_decoder: Box<dyn AudioDecoder>,
    resampler: Box<dyn Resampler>,
    video_track: Option<TrackInfo>,
    audio_track: TrackInfo,
}

/// Demuxer(s) plus decoders for one piece of content.
///
/// The underlying [`RemoteStream`]s stay alive across
/// [`reinit`](Self::reinit); only demuxer and codec state is rebuilt, with
/// every read head reset to the start.
pub struct MediaSession {
    backend: Arc<dyn CodecBackend>,
    flags: Arc<InterruptFlags>,
    reserve: Arc<dyn CpuReserve>,
    source: SessionSource,
    set: Demux,
    codecs: Codecs,
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl MediaSession {
    pub fn open(
        backend: Arc<dyn CodecBackend>,
        source: SessionSource,
        flags: Arc<InterruptFlags>,
    ) -> MediaResult<Self> {
        Self::open_with_reserve(backend, source, flags, Arc::new(NoopReserve))
    }

    pub fn open_with_reserve(
        backend: Arc<dyn CodecBackend>,
        source: SessionSource,
        flags: Arc<InterruptFlags>,
        reserve: Arc<dyn CpuReserve>,
    ) -> MediaResult<Self> {
        let (set, codecs) = Self::build(&*backend, &source, &flags, &reserve)?;
        Ok(Self {
            backend,
            flags,
            reserve,
            source,
            set,
            codecs,
        })
    }

    /// Tear down demuxer and codec state and repeat initialization over the
    /// same streams. Used after an interrupt-driven abort.
    pub fn reinit(&mut self) -> MediaResult<()> {
        debug!("reinitializing media session");
        let (set, codecs) = Self::build(&*self.backend, &self.source, &self.flags, &self.reserve)?;
        self.set = set;
        self.codecs = codecs;
        Ok(())
    }

    fn build(
        backend: &dyn CodecBackend,
        source: &SessionSource,
        flags: &Arc<InterruptFlags>,
        reserve: &Arc<dyn CpuReserve>,
    ) -> MediaResult<(Demux, Codecs)> {
        let open_io = |stream: &RemoteStream| {
            stream.set_read_head(0);
            let reader = StreamReader::new(stream.clone(), Arc::clone(flags))
                .with_reserve(Arc::clone(reserve));
            Box::new(reader)
        };

        let (set, video_track, audio_track) = match source {
            SessionSource::Combined(stream) => {
                let demuxer = backend.open_demuxer(open_io(stream))?;

                // scan for the expected media types; the last match wins
                let mut video_index = None;
                let mut audio_index = None;
                for track in demuxer.tracks() {
                    match track.kind {
                        TrackKind::Video => video_index = Some(track.index),
                        TrackKind::Audio => audio_index = Some(track.index),
                    }
                }
                let Some(audio_index) = audio_index else {
                    return Err(MediaError::init(
                        InitStage::StreamInfo,
                        "no audio stream in container",
                    ));
                };

                let find = |index: usize| {
                    demuxer
                        .tracks()
                        .iter()
                        .find(|t| t.index == index)
                        .cloned()
                        .ok_or_else(|| {
                            MediaError::init(InitStage::StreamInfo, "track index vanished")
                        })
                };
                let video_track = video_index.map(find).transpose()?;
                let audio_track = find(audio_index)?;

                (
                    Demux::Combined {
                        demuxer,
                        video_index,
                        audio_index,
                    },
                    video_track,
                    audio_track,
                )
            }
            SessionSource::Separate { video, audio } => {
                let video_demuxer = backend.open_demuxer(open_io(video))?;
                let video_track = Self::expect_single(&*video_demuxer, TrackKind::Video)?;
                let audio_demuxer = backend.open_demuxer(open_io(audio))?;
                let audio_track = Self::expect_single(&*audio_demuxer, TrackKind::Audio)?;
                (
                    Demux::Separate {
                        video: video_demuxer,
                        audio: audio_demuxer,
                    },
                    Some(video_track),
                    audio_track,
                )
            }
        };

        let video_decoder = match &video_track {
            Some(track) => {
                let params = track.video.as_ref().ok_or_else(|| {
                    MediaError::init(InitStage::StreamInfo, "video track without parameters")
                })?;
                Some(backend.open_video_decoder(params)?)
            }
            None => None,
        };

        let audio_params = audio_track.audio.as_ref().ok_or_else(|| {
            MediaError::init(InitStage::StreamInfo, "audio track without parameters")
        })?;
        let audio_decoder = backend.open_audio_decoder(audio_params)?;
        let resampler = backend.open_resampler(audio_params)?;

        Ok((
            set,
            Codecs {
                video_decoder,
                audio_decoder,
                resampler,
                video_track,
                audio_track,
            },
        ))
    }

    fn expect_single(demuxer: &dyn Demuxer, kind: TrackKind) -> MediaResult<TrackInfo> {
        let tracks = demuxer.tracks();
        if tracks.len() != 1 {
            return Err(MediaError::init(
                InitStage::StreamInfo,
                format!("expected one elementary stream, found {}", tracks.len()),
            ));
        }
        if tracks[0].kind != kind {
            return Err(MediaError::init(
                InitStage::StreamInfo,
                "elementary stream has the wrong media type",
            ));
        }
        Ok(tracks[0].clone())
    }

    // -- introspection ------------------------------------------------------

    #[must_use]
    pub fn is_separate(&self) -> bool {
        matches!(self.set, Demux::Separate { .. })
    }

    /// True when the combined container carried no video stream.
    #[must_use]
    pub fn audio_only(&self) -> bool {
        self.codecs.video_track.is_none()
    }

    #[must_use]
    pub fn video_track(&self) -> Option<&TrackInfo> {
        self.codecs.video_track.as_ref()
    }

    #[must_use]
    pub fn audio_track(&self) -> &TrackInfo {
        &self.codecs.audio_track
    }

    #[must_use]
    pub fn video_time_base(&self) -> Option<TimeBase> {
        self.codecs.video_track.as_ref().map(|t| t.time_base)
    }

    #[must_use]
    pub fn audio_time_base(&self) -> TimeBase {
        self.codecs.audio_track.time_base
    }

    /// Content duration in seconds (the audio timeline is authoritative).
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.audio_duration()
    }

    pub(crate) fn video_duration(&self) -> f64 {
        let demuxer = match &self.set {
            Demux::Combined { demuxer, .. } => demuxer,
            Demux::Separate { video, .. } => video,
        };
        demuxer.duration_secs().unwrap_or(0.0)
    }

    pub(crate) fn audio_duration(&self) -> f64 {
        let demuxer = match &self.set {
            Demux::Combined { demuxer, .. } => demuxer,
            Demux::Separate { audio, .. } => audio,
        };
        demuxer.duration_secs().unwrap_or(0.0)
    }

    /// The streams backing this session, video first.
    #[must_use]
    pub fn streams(&self) -> Vec<RemoteStream> {
        self.source.streams()
    }

    /// Tombstone the backing streams so the downloader releases them.
    pub fn quit_streams(&self) {
        for stream in self.streams() {
            stream.request_quit();
        }
    }

    // -- driver plumbing ----------------------------------------------------

    pub(crate) fn demuxer_for(&mut self, kind: TrackKind) -> &mut dyn Demuxer {
        match &mut self.set {
            Demux::Combined { demuxer, .. } => &mut **demuxer,
            Demux::Separate { video, audio } => match kind {
                TrackKind::Video => &mut **video,
                TrackKind::Audio => &mut **audio,
            },
        }
    }

    /// Which queue a combined-mode packet belongs to.
    pub(crate) fn route_combined(&self, packet: &DemuxedPacket) -> TrackKind {
        match &self.set {
            Demux::Combined { video_index, .. } => {
                if *video_index == Some(packet.stream_index) {
                    TrackKind::Video
                } else {
                    TrackKind::Audio
                }
            }
            Demux::Separate { .. } => {
                debug_assert!(false, "route_combined on a separate-mode session");
                TrackKind::Audio
            }
        }
    }

    pub(crate) fn video_decoder_mut(&mut self) -> Option<&mut (dyn VideoDecoder + '_)> {
        self.codecs.video_decoder.as_mut().map(|b| &mut **b as &mut (dyn VideoDecoder + '_))
    }

    pub(crate) fn audio_decoder_mut(&mut self) -> &mut dyn AudioDecoder {
        &mut *self.codecs.audio_decoder
    }

    pub(crate) fn resampler_mut(&mut self) -> &mut dyn Resampler {
        &mut *self.codecs.resampler
    }
}

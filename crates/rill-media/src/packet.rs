use bytes::Bytes;

/// Media track classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Rational time base of a track: one tick is `num / den` seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const MICROSECONDS: Self = Self {
        num: 1,
        den: 1_000_000,
    };

    #[must_use]
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Tick count as seconds.
    #[must_use]
    pub fn seconds(&self, ticks: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        ticks as f64 * f64::from(self.num) / f64::from(self.den)
    }

    /// Tick count as whole microseconds.
    #[must_use]
    pub fn micros(&self, ticks: i64) -> i64 {
        (self.seconds(ticks) * 1_000_000.0) as i64
    }
}

/// One packet pulled from a demuxer, still compressed.
#[derive(Clone, Debug)]
pub struct DemuxedPacket {
    /// Index of the elementary stream the packet belongs to.
    pub stream_index: usize,
    /// Presentation timestamp in the track's time base.
    pub pts: Option<i64>,
    /// Decode timestamp in the track's time base.
    pub dts: Option<i64>,
    pub keyframe: bool,
    pub data: Bytes,
}

impl DemuxedPacket {
    /// Presentation position, falling back to the decode timestamp.
    #[must_use]
    pub fn position_ticks(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }

    /// Ordering timestamp: the decode timestamp, falling back to pts.
    #[must_use]
    pub fn order_ticks(&self) -> i64 {
        self.dts.or(self.pts).unwrap_or(0)
    }
}

/// Pixel-independent audio sample formats crossing the resampler seam.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    S32,
    F32,
}

/// Static parameters of a video track.
#[derive(Clone, Debug)]
pub struct VideoParams {
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Codec private data (AVCC box for H.264).
    pub extradata: Option<Bytes>,
}

/// Static parameters of an audio track.
#[derive(Clone, Debug)]
pub struct AudioParams {
    pub codec_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub bit_rate: u64,
}

/// One elementary stream as discovered by a demuxer.
#[derive(Clone, Debug)]
pub struct TrackInfo {
    pub index: usize,
    pub kind: TrackKind,
    pub time_base: TimeBase,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
}

impl TrackInfo {
    #[must_use]
    pub fn video(index: usize, time_base: TimeBase, params: VideoParams) -> Self {
        Self {
            index,
            kind: TrackKind::Video,
            time_base,
            video: Some(params),
            audio: None,
        }
    }

    #[must_use]
    pub fn audio(index: usize, time_base: TimeBase, params: AudioParams) -> Self {
        Self {
            index,
            kind: TrackKind::Audio,
            time_base,
            video: None,
            audio: Some(params),
        }
    }
}

/// One decoded video frame (planar YUV420).
#[derive(Clone, Debug, Default)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Y, U, V planes; stride equals the plane width.
    pub planes: [Vec<u8>; 3],
    /// Presentation timestamp in the track's time base.
    pub pts: Option<i64>,
}

/// One decoded audio frame, still in the decoder's native format.
#[derive(Clone, Debug, Default)]
pub struct AudioFrame {
    /// Samples per channel.
    pub samples: usize,
    pub channels: u16,
    pub sample_rate: u32,
    /// One buffer per plane (a single interleaved buffer for packed formats).
    pub data: Vec<Vec<u8>>,
    pub pts: Option<i64>,
}

/// Consumer-facing video description.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub codec_name: String,
    pub duration_secs: f64,
}

/// Consumer-facing audio description.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioInfo {
    pub bit_rate: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub codec_name: String,
    pub duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ninety_khz(TimeBase::new(1, 90_000), 90_000, 1.0)]
    #[case::milliseconds(TimeBase::new(1, 1_000), 500, 0.5)]
    #[case::degenerate(TimeBase::new(1, 0), 123, 0.0)]
    fn time_base_seconds(#[case] tb: TimeBase, #[case] ticks: i64, #[case] expected: f64) {
        assert!((tb.seconds(ticks) - expected).abs() < 1e-12);
    }

    #[test]
    fn time_base_micros() {
        assert_eq!(TimeBase::new(1, 1_000).micros(1_500), 1_500_000);
    }

    #[test]
    fn packet_timestamp_fallbacks() {
        let mut packet = DemuxedPacket {
            stream_index: 0,
            pts: None,
            dts: Some(40),
            keyframe: false,
            data: Bytes::new(),
        };
        assert_eq!(packet.position_ticks(), Some(40));
        assert_eq!(packet.order_ticks(), 40);

        packet.pts = Some(42);
        assert_eq!(packet.position_ticks(), Some(42));
        assert_eq!(packet.order_ticks(), 40);
    }
}

use rill_cache::{CacheLayout, RemoteStream};
use rill_media::SessionSource;
use rill_net::NetOptions;
use url::Url;

/// Where the media lives remotely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaLocation {
    /// One multiplexed resource.
    Combined(Url),
    /// Elementary video and audio resources.
    Separate { video: Url, audio: Url },
    /// A livestream segment fetched whole in one GET.
    Livestream(Url),
}

/// Everything needed to assemble a playback session.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub location: MediaLocation,
    pub layout: CacheLayout,
    pub net: NetOptions,
    /// Prefer the hardware video decode path.
    pub hw_decode: bool,
}

impl PlayerConfig {
    pub fn combined(url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        Ok(Self::new(MediaLocation::Combined(url.as_ref().parse()?)))
    }

    pub fn separate(
        video: impl AsRef<str>,
        audio: impl AsRef<str>,
    ) -> Result<Self, url::ParseError> {
        Ok(Self::new(MediaLocation::Separate {
            video: video.as_ref().parse()?,
            audio: audio.as_ref().parse()?,
        }))
    }

    pub fn livestream(url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        Ok(Self::new(MediaLocation::Livestream(url.as_ref().parse()?)))
    }

    fn new(location: MediaLocation) -> Self {
        Self {
            location,
            layout: CacheLayout::default(),
            net: NetOptions::default(),
            hw_decode: false,
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: CacheLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    #[must_use]
    pub fn with_hw_decode(mut self, hw_decode: bool) -> Self {
        self.hw_decode = hw_decode;
        self
    }

    /// Create the stream(s) for this configuration. Register them with a
    /// [`Downloader`](rill_fetch::Downloader) before opening the session.
    #[must_use]
    pub fn session_source(&self) -> SessionSource {
        match &self.location {
            MediaLocation::Combined(url) => {
                SessionSource::Combined(RemoteStream::new(url.clone(), false, self.layout))
            }
            MediaLocation::Livestream(url) => {
                SessionSource::Combined(RemoteStream::new(url.clone(), true, self.layout))
            }
            MediaLocation::Separate { video, audio } => SessionSource::Separate {
                video: RemoteStream::new(video.clone(), false, self.layout),
                audio: RemoteStream::new(audio.clone(), false, self.layout),
            },
        }
    }
}

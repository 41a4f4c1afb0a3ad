use std::fmt;

use thiserror::Error;

/// Which stage of session initialization failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStage {
    OpenInput,
    StreamInfo,
    CodecLookup,
    CodecOpen,
    Resampler,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenInput => "open input",
            Self::StreamInfo => "stream info",
            Self::CodecLookup => "codec lookup",
            Self::CodecOpen => "codec open",
            Self::Resampler => "resampler init",
        };
        f.write_str(name)
    }
}

/// Errors produced by the media layer.
///
/// Backpressure is deliberately *not* here: ring-full and ring-empty are
/// ordinary return values of the driver, not failures.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{stage} failed: {detail}")]
    Init { stage: InitStage, detail: String },

    #[error("demux error: {0}")]
    Demux(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("hardware decode error: {0}")]
    Hardware(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("seek failed: {0}")]
    SeekFailed(String),

    #[error("no media session installed")]
    NoSession,
}

impl MediaError {
    pub fn init(stage: InitStage, detail: impl Into<String>) -> Self {
        Self::Init {
            stage,
            detail: detail.into(),
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;

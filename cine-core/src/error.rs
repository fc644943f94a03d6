//! Error types shared by the demuxer, codec adapters and playback controller.

use thiserror::Error;

/// Per-frame codec failure.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Decoder init failed: {0}")]
    Init(String),
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("Unsupported picture layout: {0}")]
    UnsupportedLayout(String),
    #[error("Output buffer too small: need {needed} samples, have {capacity}")]
    OutputTooSmall { needed: usize, capacity: usize },
}

/// Everything that can go wrong while opening or playing a container.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Failed to open container: {0}")]
    ContainerOpen(String),
    #[error("Container has no video track")]
    NoVideoTrack,
    #[error("Unsupported video codec: {0}")]
    UnsupportedVideoCodec(String),
    #[error("Unsupported audio codec: {0}")]
    UnsupportedAudioCodec(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Reader I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("{0} session thread panicked")]
    SessionLost(String),
}

impl PlayerError {
    /// Integer code reported across the host boundary. Zero is never used.
    pub fn code(&self) -> i32 {
        match self {
            Self::ContainerOpen(_) => 1,
            Self::NoVideoTrack => 2,
            Self::UnsupportedVideoCodec(_) => 3,
            Self::UnsupportedAudioCodec(_) => 4,
            Self::Decode(_) => 5,
            Self::Io(_) => 6,
            Self::Config(_) => 7,
            Self::SessionLost(_) => 8,
        }
    }

    /// Whether playback can still go ahead after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnsupportedAudioCodec(_))
    }
}

pub type Result<T, E = PlayerError> = std::result::Result<T, E>;

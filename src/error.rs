use crate::audio::Codec;
use thiserror::Error;

/// Main error type for the remuxer
#[derive(Error, Debug)]
pub enum RemuxError {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lost transport stream sync: no packet boundary found in {scanned} bytes")]
    Desync { scanned: usize },

    #[error("{codec} frame of {declared} bytes exceeds the {limit} byte access unit limit")]
    FrameTooLarge {
        codec: Codec,
        declared: usize,
        limit: usize,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Output buffer too small: need {needed} bytes, capacity {capacity}")]
    OutputTooSmall { needed: usize, capacity: usize },

    #[error("Audio codec changed mid-stream: locked to {locked}, found {found}")]
    CodecMismatch { locked: Codec, found: Codec },

    #[error("Invalid session handle")]
    InvalidHandle,

    #[error("Invalid pointer")]
    InvalidPointer,

    #[error("Internal panic")]
    Panic,
}

impl RemuxError {
    /// Stable negative return code used across the C boundary.
    pub fn code(&self) -> i32 {
        match self {
            RemuxError::InvalidHandle | RemuxError::InvalidPointer => -1,
            RemuxError::OutputTooSmall { .. } => -2,
            RemuxError::Config(_) => -3,
            RemuxError::Desync { .. } => -4,
            RemuxError::FrameTooLarge { .. } => -5,
            RemuxError::Decode(_) => -6,
            RemuxError::Encode(_) => -7,
            RemuxError::CodecMismatch { .. } => -8,
            RemuxError::Ffmpeg(_) => -9,
            RemuxError::Panic => -10,
        }
    }

    /// Errors that are recorded and then skipped without failing the call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RemuxError::Decode(_))
    }
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to find decoder: codec_id={0}")]
    DecoderNotFound(String),

    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    #[error("Failed to find encoder: codec_id={0}")]
    EncoderNotFound(String),

    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RemuxError>;

use thiserror::Error;

/// Main error type for the packager
#[derive(Error, Debug)]
pub enum PackagerError {
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MP4 error: {0}")]
    Mp4(#[from] mp4::Error),

    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Unknown representation: adaptation_set={adaptation_set_id}, representation={representation_id}")]
    UnknownRepresentation {
        adaptation_set_id: u32,
        representation_id: u32,
    },

    #[error("Segment out of order for {adaptation_set_id}/{representation_id}: expected {expected}, got {got}")]
    SegmentOrder {
        adaptation_set_id: u32,
        representation_id: u32,
        expected: u32,
        got: u32,
    },

    #[error("Timed out after {0} ms waiting for the next packet")]
    ReadTimeout(u64),

    #[error("No keyframe within {elapsed_ms} ms of the last cut (ceiling {ceiling_ms} ms)")]
    KeyframeStarvation { elapsed_ms: i64, ceiling_ms: i64 },

    #[error("Engine already finalized")]
    EngineFinalized,

    #[error("Invalid duration: {0}")]
    InvalidDuration(f64),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised while assigning input streams to the manifest
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("No video or audio stream among {0} input stream(s)")]
    NoMediaStreams(usize),

    #[error("Stream {stream}: no codec identifier rule for tag '{tag}'")]
    UnsupportedCodec { stream: String, tag: String },

    #[error("Stream {stream}: {source}")]
    CodecParameters {
        stream: String,
        #[source]
        source: CodecRuleError,
    },
}

/// Failures of an individual codec identifier rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecRuleError {
    #[error("missing decoder configuration for '{0}'")]
    MissingExtradata(String),

    #[error("decoder configuration too short: {len} bytes, need {need}")]
    TruncatedExtradata { len: usize, need: usize },

    #[error("malformed decoder configuration: {0}")]
    Malformed(String),
}

/// FFmpeg-specific errors
#[cfg(feature = "ffmpeg")]
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    #[error("Failed to read packet: {0}")]
    ReadPacket(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PackagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_converts() {
        let err: PackagerError = ClassificationError::NoMediaStreams(3).into();
        assert!(matches!(err, PackagerError::Classification(_)));
        assert!(err.to_string().contains("3 input stream"));
    }

    #[test]
    fn test_unknown_representation_message() {
        let err = PackagerError::UnknownRepresentation {
            adaptation_set_id: 1,
            representation_id: 7,
        };
        assert_eq!(
            err.to_string(),
            "Unknown representation: adaptation_set=1, representation=7"
        );
    }
}

use std::path::PathBuf;

/// Fatal pipeline conditions that abort a stage.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Cannot read video {path}: {reason}")]
    VideoUnreadable { path: PathBuf, reason: String },

    #[error("Frame extraction failed for {path} at {timestamp:.2}s")]
    FrameExtraction { path: PathBuf, timestamp: f64 },

    #[error("Expected {expected} files, but found {found}")]
    FileCountMismatch { expected: usize, found: usize },

    #[error("Expected metadata columns {expected:?} not found in {path}")]
    MissingMetadataColumns { path: PathBuf, expected: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No Whisper backend found. Install whisper.cpp or openai-whisper")]
    NoBackend,
}

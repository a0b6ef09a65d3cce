pub mod batch;
pub mod whisper;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub use batch::{load_transcripts, TranscriptRecord, Transcriber, TranscriptionSummary};
pub use whisper::{WhisperBackend, WhisperCli};

/// Speech-to-text engine producing one concatenated transcript per file
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

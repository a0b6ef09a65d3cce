use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::SpeechToText;
use crate::config::TranscriptionConfig;
use crate::state::Ledger;

/// Counters reported after a batch run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionSummary {
    pub processed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// One transcript file loaded back from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub file_name: String,
    pub transcription: String,
}

/// Resumable batch transcriber over a folder of audio files
pub struct Transcriber {
    engine: Box<dyn SpeechToText>,
    audio_extensions: Vec<String>,
    ledger_file: PathBuf,
}

impl Transcriber {
    pub fn new(engine: Box<dyn SpeechToText>, config: &TranscriptionConfig) -> Self {
        Self {
            engine,
            audio_extensions: config
                .audio_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            ledger_file: config.ledger_file.clone(),
        }
    }

    /// Ledger location; relative paths resolve against the working directory
    pub fn ledger_path(&self) -> &Path {
        &self.ledger_file
    }

    /// Whether `file_name` in `folder` is this transcriber's own ledger
    async fn is_ledger(&self, folder: &Path, file_name: &str) -> bool {
        if self.ledger_file.file_name() != Some(std::ffi::OsStr::new(file_name)) {
            return false;
        }
        let ledger_dir = match self.ledger_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match (
            tokio::fs::canonicalize(folder).await,
            tokio::fs::canonicalize(ledger_dir).await,
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn is_audio_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| self.audio_extensions.contains(&ext.to_lowercase()))
    }

    /// Transcribe every audio file not yet on the ledger.
    ///
    /// A failing file is logged and counted but does not stop the batch; it
    /// stays off the ledger and is retried on the next run.
    pub async fn process_folder(&self, folder: &Path) -> Result<TranscriptionSummary> {
        let start_time = Instant::now();
        let mut ledger = Ledger::open(self.ledger_path()).await?;
        let mut summary = TranscriptionSummary::default();

        if !folder.is_dir() {
            return Err(anyhow!("Audio folder not found: {}", folder.display()));
        }

        let mut audio_files = Vec::new();
        let mut entries = tokio::fs::read_dir(folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && self.is_audio_file(&path) {
                audio_files.push(path);
            }
        }
        audio_files.sort();

        for audio_path in audio_files {
            let file_name = match audio_path.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => continue,
            };

            if ledger.contains(&file_name) {
                summary.skipped += 1;
                continue;
            }

            info!("🎵 Processing: {}", file_name);

            match self.transcribe_one(&audio_path).await {
                Ok(text_path) => {
                    ledger.record(&file_name).await?;
                    summary.processed += 1;
                    info!("✓ Saved: {}", text_path.display());
                }
                Err(e) => {
                    summary.errors += 1;
                    error!("✗ Error transcribing {}: {:#}", file_name, e);
                }
            }
        }

        summary.elapsed = start_time.elapsed();
        info!(
            "🎉 Transcription batch done: {} processed, {} errors, {} already done, {:.2}s",
            summary.processed,
            summary.errors,
            summary.skipped,
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }

    /// Transcripts in `folder`, leaving out this transcriber's own ledger
    pub async fn transcripts(&self, folder: &Path) -> Result<Vec<TranscriptRecord>> {
        let mut records = Vec::new();
        for record in load_transcripts(folder).await? {
            if !self.is_ledger(folder, &record.file_name).await {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn transcribe_one(&self, audio_path: &Path) -> Result<PathBuf> {
        let transcript = self.engine.transcribe(audio_path).await?;
        let text_path = audio_path.with_extension("txt");
        tokio::fs::write(&text_path, transcript).await?;
        Ok(text_path)
    }
}

/// Load every `*.txt` transcript in `folder`, sorted by file name
pub async fn load_transcripts(folder: &Path) -> Result<Vec<TranscriptRecord>> {
    let mut records = Vec::new();
    let mut entries = tokio::fs::read_dir(folder).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_txt = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("txt"));
        if !is_txt || !path.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        match tokio::fs::read_to_string(&path).await {
            Ok(transcription) => records.push(TranscriptRecord {
                file_name,
                transcription,
            }),
            Err(e) => warn!("Skipping unreadable transcript {}: {}", path.display(), e),
        }
    }

    records.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(records)
}

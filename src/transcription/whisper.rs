use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::SpeechToText;
use crate::config::TranscriptionConfig;
use crate::error::PipelineError;

/// Whisper command line backends in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhisperBackend {
    /// whisper.cpp, installed as `whisper-cli` or `whisper-cpp`
    Cpp(&'static str),
    /// OpenAI Whisper Python package
    Python,
}

impl WhisperBackend {
    fn command(&self) -> &'static str {
        match self {
            WhisperBackend::Cpp(cmd) => *cmd,
            WhisperBackend::Python => "whisper",
        }
    }
}

/// Speech-to-text through a locally installed Whisper command
#[derive(Debug, Clone)]
pub struct WhisperCli {
    config: TranscriptionConfig,
}

impl WhisperCli {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }

    /// Find the first Whisper backend on PATH
    pub async fn detect_backend() -> Result<WhisperBackend> {
        let backends = [
            WhisperBackend::Cpp("whisper-cli"),
            WhisperBackend::Cpp("whisper-cpp"),
            WhisperBackend::Python,
        ];

        for backend in backends {
            if check_command_available(backend.command()).await {
                debug!("✅ Found {} backend", backend.command());
                return Ok(backend);
            }
            debug!("❌ {} not available", backend.command());
        }

        Err(PipelineError::NoBackend.into())
    }

    /// Describe the available backend, for diagnostics
    pub async fn check_availability() -> Result<String> {
        match Self::detect_backend().await? {
            WhisperBackend::Cpp(cmd) => Ok(format!("whisper.cpp available as `{}`", cmd)),
            WhisperBackend::Python => Ok("OpenAI Whisper (Python) available".to_string()),
        }
    }

    fn build_cpp_command(&self, cmd_name: &str, audio_path: &Path, output_stem: &Path) -> Command {
        let mut cmd = Command::new(cmd_name);
        cmd.arg("-f")
            .arg(audio_path)
            .arg("-oj")
            .arg("-of")
            .arg(output_stem)
            .arg("-bs")
            .arg(self.config.beam_size.to_string())
            .arg("-tp")
            .arg("0.0");

        let model_path = PathBuf::from(format!("models/ggml-{}.bin", self.config.model));
        if model_path.exists() {
            cmd.arg("-m").arg(&model_path);
        } else {
            warn!("⚠️  Model file {} not found, using backend default", model_path.display());
        }

        if let Some(language) = &self.config.language {
            cmd.arg("-l").arg(language);
        }

        cmd
    }

    fn build_python_command(&self, audio_path: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new("whisper");
        cmd.arg(audio_path)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_format")
            .arg("json")
            .arg("--verbose")
            .arg("False")
            .arg("--fp16")
            .arg("False")
            .arg("--beam_size")
            .arg(self.config.beam_size.to_string())
            .arg("--temperature")
            .arg("0.0");

        if let Some(language) = &self.config.language {
            cmd.arg("--language").arg(language);
        }

        if !self.config.use_gpu {
            cmd.arg("--device").arg("cpu");
        }

        cmd
    }

    /// whisper.cpp only reads 16 kHz WAV, so other formats go through ffmpeg first
    async fn convert_to_wav(&self, audio_path: &Path, work_dir: &Path) -> Result<PathBuf> {
        let is_wav = audio_path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("wav"));
        if is_wav {
            return Ok(audio_path.to_path_buf());
        }

        let wav_path = work_dir.join("input.wav");
        let status = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(audio_path)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y"])
            .arg(&wav_path)
            .status()
            .await?;

        if !status.success() {
            return Err(anyhow!("Audio conversion failed for {}", audio_path.display()));
        }

        Ok(wav_path)
    }

    async fn execute(&self, mut cmd: Command, backend_name: &str) -> Result<()> {
        let start_time = Instant::now();
        debug!("Executing command: {:?}", cmd);

        let run = cmd.kill_on_drop(true).output();
        let output = if self.config.timeout > 0 {
            let limit = Duration::from_secs(self.config.timeout as u64);
            match tokio::time::timeout(limit, run).await {
                Ok(result) => result?,
                Err(_) => {
                    error!("⏰ {} timed out after {}s", backend_name, self.config.timeout);
                    return Err(anyhow!(
                        "{} command timed out after {} seconds",
                        backend_name,
                        self.config.timeout
                    ));
                }
            }
        } else {
            run.await?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("❌ {} failed with exit code: {}", backend_name, output.status);
            return Err(anyhow!(
                "{} transcription failed ({}): {}",
                backend_name,
                output.status,
                stderr.lines().last().unwrap_or_default()
            ));
        }

        debug!(
            "{} finished in {:.1}s",
            backend_name,
            start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

#[async_trait]
impl SpeechToText for WhisperCli {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let backend = Self::detect_backend().await?;
        let work_dir = tempfile::Builder::new().prefix("whisper_").tempdir()?;

        let base_name = audio_path
            .file_stem()
            .ok_or_else(|| anyhow!("Invalid audio filename: {}", audio_path.display()))?
            .to_string_lossy()
            .to_string();

        info!(
            "🎤 Transcribing {} with {} ({} model)",
            audio_path.display(),
            backend.command(),
            self.config.model
        );

        match backend {
            WhisperBackend::Cpp(cmd_name) => {
                let input = self.convert_to_wav(audio_path, work_dir.path()).await?;
                let output_stem = work_dir.path().join(&base_name);
                let cmd = self.build_cpp_command(cmd_name, &input, &output_stem);
                self.execute(cmd, "whisper.cpp").await?;
            }
            WhisperBackend::Python => {
                let cmd = self.build_python_command(audio_path, work_dir.path());
                self.execute(cmd, "Python Whisper").await?;
            }
        }

        let json_path = find_json_output(work_dir.path())
            .await?
            .ok_or_else(|| anyhow!("No Whisper JSON output found for {}", audio_path.display()))?;

        let json_content = tokio::fs::read_to_string(&json_path).await?;
        parse_whisper_json(&json_content)
    }
}

async fn check_command_available(cmd_name: &str) -> bool {
    Command::new(cmd_name)
        .arg("--help")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

async fn find_json_output(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Whisper JSON output; whisper.cpp and the Python package disagree on layout
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    text: String,
}

/// Collapse Whisper output to one space-joined transcript
pub fn parse_whisper_json(json_content: &str) -> Result<String> {
    let output: WhisperOutput = serde_json::from_str(json_content)
        .map_err(|e| anyhow!("Failed to parse Whisper JSON output: {}", e))?;

    let segments = if !output.transcription.is_empty() {
        output.transcription
    } else {
        output.segments
    };

    if segments.is_empty() {
        return Ok(output.text.unwrap_or_default().trim().to_string());
    }

    Ok(segments
        .iter()
        .map(|seg| seg.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;
use crate::rubric;

/// Configuration for the frame rating pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frame extraction settings
    pub frames: FrameConfig,

    /// Speech-to-text settings
    pub transcription: TranscriptionConfig,

    /// Remote rating endpoint settings
    pub rating: RatingConfig,

    /// Result extraction settings
    pub results: ResultsConfig,

    /// Aggregation settings
    pub aggregate: AggregateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Seconds between sampled frames
    pub interval_seconds: f64,

    /// Default output directory for extracted frames
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Whisper model name
    pub model: String,

    /// Language hint, auto-detected when absent
    pub language: Option<String>,

    /// Beam size for Whisper search
    pub beam_size: u32,

    /// Audio extensions picked up by the batch transcriber
    pub audio_extensions: Vec<String>,

    /// Ledger of already transcribed audio files, relative to the working directory
    pub ledger_file: PathBuf,

    /// Timeout per Whisper invocation in seconds (0 = none)
    pub timeout: u32,

    /// Enable GPU acceleration for Whisper
    pub use_gpu: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Chat completions endpoint
    pub endpoint: String,

    /// Bearer token for the endpoint
    pub api_key: Option<String>,

    /// Vision-capable model identifier
    pub model: String,

    /// Maximum tokens to generate per frame
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Minimum number of `Label: score` lines for a response to be valid
    pub expected_features: usize,

    /// Retry and pacing policy
    pub retry: RetryConfig,
}

/// Per-frame retry policy.
///
/// Rate-limit waits are bounded by `max_rate_limit_waits` and do not use up
/// `max_attempts`; once that bound is hit, rate-limit errors count as
/// ordinary API errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: f64,
    pub rate_limit_default_wait_secs: f64,
    pub rate_limit_buffer_secs: f64,
    pub max_rate_limit_waits: u32,
    pub inter_frame_delay_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResultsConfig {
    /// Folder holding per-video frame folders (copied from for reprocessing)
    pub frames_source: Option<PathBuf>,

    /// Folder that receives frame folders needing another round
    pub retry_target: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Output shape of the within-round combine
    pub output_format: OutputFormat,

    /// Number of per-round CSVs expected by the combinatorial averaging
    pub number_of_files: usize,

    /// Smallest subset size averaged
    pub min_subset_size: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Keep every frame row
    PerFrame,
    /// Mean of every feature per video
    PerVideo,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per-frame" | "per_frame" => Ok(OutputFormat::PerFrame),
            "per-video" | "per_video" => Ok(OutputFormat::PerVideo),
            other => Err(anyhow!(
                "output format must be 'per-frame' or 'per-video', not '{}'",
                other
            )),
        }
    }
}

/// Seconds as a `Duration`: negative or NaN becomes zero, overflow saturates
pub fn duration_from_secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        duration_from_secs(self.retry_delay_secs)
    }

    pub fn rate_limit_default_wait(&self) -> Duration {
        duration_from_secs(self.rate_limit_default_wait_secs)
    }

    pub fn rate_limit_buffer(&self) -> Duration {
        duration_from_secs(self.rate_limit_buffer_secs)
    }

    pub fn inter_frame_delay(&self) -> Duration {
        duration_from_secs(self.inter_frame_delay_secs)
    }

    fn delays(&self) -> [(&'static str, f64); 4] {
        [
            ("retry_delay_secs", self.retry_delay_secs),
            ("rate_limit_default_wait_secs", self.rate_limit_default_wait_secs),
            ("rate_limit_buffer_secs", self.rate_limit_buffer_secs),
            ("inter_frame_delay_secs", self.inter_frame_delay_secs),
        ]
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_paths = ["frame-rating.toml", "config/frame-rating.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Ok(Self::from_env())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(api_key) =
            std::env::var("FRAME_RATING_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            self.rating.api_key = Some(api_key);
        }

        if let Ok(endpoint) = std::env::var("FRAME_RATING_ENDPOINT") {
            self.rating.endpoint = endpoint;
        }

        if let Ok(model) = std::env::var("FRAME_RATING_MODEL") {
            self.rating.model = model;
        }

        if let Ok(interval) = std::env::var("FRAME_RATING_INTERVAL") {
            match interval.parse() {
                Ok(value) => self.frames.interval_seconds = value,
                Err(_) => tracing::warn!("Ignoring invalid FRAME_RATING_INTERVAL: {}", interval),
            }
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> anyhow::Error { PipelineError::Config(message).into() };

        let interval = self.frames.interval_seconds;
        if !(interval > 0.0) || Duration::try_from_secs_f64(interval).is_err() {
            return Err(invalid(format!(
                "interval_seconds must be a finite number greater than 0, got {}",
                interval
            )));
        }

        for (name, seconds) in self.rating.retry.delays() {
            if !(seconds >= 0.0) || Duration::try_from_secs_f64(seconds).is_err() {
                return Err(invalid(format!(
                    "{} must be a finite number of seconds, not negative, got {}",
                    name, seconds
                )));
            }
        }

        if self.rating.retry.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1".to_string()));
        }

        if self.rating.model.trim().is_empty() {
            return Err(invalid("rating model must not be empty".to_string()));
        }

        url::Url::parse(&self.rating.endpoint).map_err(|e| {
            invalid(format!("invalid rating endpoint '{}': {}", self.rating.endpoint, e))
        })?;

        if self.rating.expected_features > rubric::FEATURE_COUNT {
            return Err(invalid(format!(
                "expected_features ({}) exceeds the rubric size ({})",
                self.rating.expected_features,
                rubric::FEATURE_COUNT
            )));
        }

        if self.aggregate.min_subset_size == 0 {
            return Err(invalid("min_subset_size must be at least 1".to_string()));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Frame Rating Configuration:\n\
            - Frame interval: {:.2}s\n\
            - Whisper model: {}\n\
            - Audio extensions: {}\n\
            - Rating endpoint: {}\n\
            - Rating model: {}\n\
            - API key set: {}\n\
            - Max attempts per frame: {}\n\
            - Output format: {:?}",
            self.frames.interval_seconds,
            self.transcription.model,
            self.transcription.audio_extensions.join(", "),
            self.rating.endpoint,
            self.rating.model,
            self.rating.api_key.is_some(),
            self.rating.retry.max_attempts,
            self.aggregate.output_format,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frames: FrameConfig::default(),
            transcription: TranscriptionConfig::default(),
            rating: RatingConfig::default(),
            results: ResultsConfig::default(),
            aggregate: AggregateConfig::default(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 1.85,
            output_dir: PathBuf::from("frames_output"),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
            language: None,
            beam_size: 5,
            audio_extensions: vec!["mp3".to_string(), "wav".to_string(), "m4a".to_string()],
            ledger_file: PathBuf::from("audio_processed.txt"),
            timeout: 0,
            use_gpu: false,
        }
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4.1".to_string(),
            max_tokens: 8192,
            timeout_seconds: 300,
            expected_features: rubric::FEATURE_COUNT,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5.0,
            rate_limit_default_wait_secs: 10.0,
            rate_limit_buffer_secs: 1.0,
            max_rate_limit_waits: 10,
            inter_frame_delay_secs: 2.0,
        }
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::PerFrame,
            number_of_files: 5,
            min_subset_size: 1,
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_interval(mut self, seconds: f64) -> Self {
        self.config.frames.interval_seconds = seconds;
        self
    }

    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.config.rating.endpoint = endpoint;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.rating.api_key = Some(api_key);
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.config.rating.model = model;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.rating.retry = retry;
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.config.aggregate.output_format = format;
        self
    }

    pub fn with_number_of_files(mut self, files: usize) -> Self {
        self.config.aggregate.number_of_files = files;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.frames.interval_seconds, 1.85);
        assert_eq!(config.rating.max_tokens, 8192);
        assert_eq!(config.rating.retry.max_attempts, 3);
        assert_eq!(config.rating.expected_features, 138);
        assert_eq!(config.aggregate.output_format, OutputFormat::PerFrame);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_interval(2.0)
            .with_model("test-model".to_string())
            .with_output_format(OutputFormat::PerVideo)
            .with_number_of_files(3)
            .build();

        assert_eq!(config.frames.interval_seconds, 2.0);
        assert_eq!(config.rating.model, "test-model");
        assert_eq!(config.aggregate.output_format, OutputFormat::PerVideo);
        assert_eq!(config.aggregate.number_of_files, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let bad_interval = ConfigBuilder::new().with_interval(0.0).build();
        assert!(bad_interval.validate().is_err());

        let bad_endpoint = ConfigBuilder::new()
            .with_endpoint("not a url".to_string())
            .build();
        let err = bad_endpoint.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_validation_rejects_unusable_durations() {
        assert!(ConfigBuilder::new().with_interval(f64::INFINITY).build().validate().is_err());
        assert!(ConfigBuilder::new().with_interval(1e300).build().validate().is_err());

        let negative_delay = ConfigBuilder::new()
            .with_retry(RetryConfig {
                retry_delay_secs: -1.0,
                ..RetryConfig::default()
            })
            .build();
        assert!(negative_delay.validate().is_err());

        let huge_wait = ConfigBuilder::new()
            .with_retry(RetryConfig {
                rate_limit_default_wait_secs: 1e300,
                ..RetryConfig::default()
            })
            .build();
        assert!(huge_wait.validate().is_err());
    }

    #[test]
    fn test_retry_durations_never_panic() {
        let retry = RetryConfig {
            retry_delay_secs: -3.0,
            rate_limit_default_wait_secs: 1e300,
            rate_limit_buffer_secs: f64::NAN,
            inter_frame_delay_secs: 0.25,
            ..RetryConfig::default()
        };
        assert_eq!(retry.retry_delay(), Duration::ZERO);
        assert_eq!(retry.rate_limit_default_wait(), Duration::MAX);
        assert_eq!(retry.rate_limit_buffer(), Duration::ZERO);
        assert_eq!(retry.inter_frame_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [frames]
            interval_seconds = 2.5

            [rating.retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.frames.interval_seconds, 2.5);
        assert_eq!(config.rating.retry.max_attempts, 5);
        assert_eq!(config.rating.retry.retry_delay_secs, 5.0);
        assert_eq!(config.transcription.beam_size, 5);
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("per-video".parse::<OutputFormat>().unwrap(), OutputFormat::PerVideo);
        assert_eq!("per_frame".parse::<OutputFormat>().unwrap(), OutputFormat::PerFrame);
        assert!("weekly".parse::<OutputFormat>().is_err());
    }
}

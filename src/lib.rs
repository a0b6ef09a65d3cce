/// Frame Rating Pipeline - Rust Implementation
///
/// Batch stages turning videos into per-frame rubric ratings: frame
/// extraction, transcription, model rating, result extraction and
/// aggregation across rating rounds.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod frames;
pub mod rating;
pub mod results;
pub mod rubric;
pub mod state;
pub mod table;
pub mod transcription;
pub mod video;

// Re-export main types for easy access
pub use crate::aggregate::{CombinationAverager, Combiner};
pub use crate::config::{Config, OutputFormat};
pub use crate::error::PipelineError;
pub use crate::frames::{FrameExtractor, SampleTimes};
pub use crate::rating::{FrameRater, HttpRatingClient, RatingClient};
pub use crate::results::ResultExtractor;
pub use crate::state::Ledger;
pub use crate::table::FeatureTable;
pub use crate::transcription::{SpeechToText, Transcriber, WhisperCli};
pub use crate::video::{VideoInfo, VideoProcessor};

//! Frame rating against the remote chat-completions endpoint.
//!
//! Every frame of a video is sent with that video's transcripts and the
//! rubric prompt; responses are validated, retried and accumulated into one
//! NDJSON line per video and round.

pub mod client;
pub mod rater;
pub mod retry;
pub mod validation;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::{encode_image, ChatRequest, ContentPart, HttpRatingClient};
pub use rater::{FrameRater, RoundPaths, RoundSummary};
pub use retry::{classify_reply, rate_frame, FrameOutcome, ReplyClass};
pub use validation::{count_feature_lines, validate_response, Validation};

/// Raw HTTP reply; transport failures never get this far
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport to the rating endpoint, one request per call
#[async_trait]
pub trait RatingClient: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<HttpReply>;
}

/// Stored outcome for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_number: u32,
    pub frame_filename: String,
    pub response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

/// All frame results of one video in one round; one NDJSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoResults {
    pub subfolder: String,
    pub frames: Vec<FrameResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl VideoResults {
    pub fn new(subfolder: impl Into<String>) -> Self {
        Self {
            subfolder: subfolder.into(),
            frames: Vec::new(),
            completed_at: None,
        }
    }

    /// Frame numbers stored with a validation error
    pub fn incomplete_frames(&self) -> Vec<u32> {
        self.frames
            .iter()
            .filter(|f| f.validation_error.is_some())
            .map(|f| f.frame_number)
            .collect()
    }
}

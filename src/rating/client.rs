use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::{HttpReply, RatingClient};
use crate::config::RatingConfig;

/// Chat-completions request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatRequest {
    /// One user message: prompt, the frame image, then each transcript
    pub fn for_frame(
        model: &str,
        max_tokens: u32,
        prompt: &str,
        image_data_url: String,
        transcripts: &[String],
    ) -> Self {
        let mut content = Vec::with_capacity(transcripts.len() + 2);
        content.push(ContentPart::Text {
            text: prompt.to_string(),
        });
        content.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image_data_url,
            },
        });
        content.extend(transcripts.iter().map(|text| ContentPart::Text { text: text.clone() }));

        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens,
        }
    }

    /// Number of transcript blocks after the prompt and image
    pub fn transcript_count(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter(|part| matches!(part, ContentPart::Text { .. }))
            .count()
            .saturating_sub(1)
    }
}

/// Read an image and wrap it as a base64 PNG data URL
pub async fn encode_image(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("Failed to read frame {}: {}", path.display(), e))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(bytes)))
}

/// `RatingClient` over HTTPS with bearer auth
pub struct HttpRatingClient {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRatingClient {
    pub fn new(config: &RatingConfig) -> Result<Self> {
        if config.api_key.is_none() {
            warn!("⚠️  No API key configured; requests to {} are unauthenticated", config.endpoint);
        }

        // No idle pooling: every attempt opens a fresh connection
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl RatingClient for HttpRatingClient {
    async fn send(&self, request: &ChatRequest) -> Result<HttpReply> {
        debug!("Sending rating request to {}", self.endpoint);

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body (HTTP {}): {}", status, e))?;

        Ok(HttpReply { status, body })
    }
}

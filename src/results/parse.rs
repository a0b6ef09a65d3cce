use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// One frame's completion text with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRow {
    pub video: String,
    pub frame_number: i64,
    pub frame_filename: String,
    pub content: String,
}

/// Rows read from one round's NDJSON file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundReadout {
    pub rows: Vec<ContentRow>,
    pub videos: usize,
    /// Lines that were not JSON
    pub skipped_lines: usize,
}

/// Outcome of parsing one completion
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContent {
    /// Label/score pairs in first-seen order; repeated labels keep the last score
    Scores(Vec<(String, f64)>),
    Unavailable,
}

const UNKNOWN: &str = "unknown";

/// Read a round's NDJSON output into per-frame content rows.
///
/// Blank lines are ignored and lines that are not JSON are logged and
/// counted. Objects without `subfolder` that look like a bare completion or
/// error become a single row for video `unknown`, frame 0.
pub async fn read_round_results(path: &Path) -> Result<RoundReadout> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Failed to read results {}: {}", path.display(), e))?;

    let mut readout = RoundReadout::default();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                let rows = rows_from_value(&value);
                if value.get("subfolder").is_some() {
                    readout.videos += 1;
                }
                readout.rows.extend(rows);
            }
            Err(e) => {
                warn!("⚠️  Skipping line {} of {}: {}", line_no + 1, path.display(), e);
                readout.skipped_lines += 1;
            }
        }
    }

    debug!(
        "📖 {} rows from {} videos in {}",
        readout.rows.len(),
        readout.videos,
        path.display()
    );
    Ok(readout)
}

/// Content rows for one NDJSON document
pub fn rows_from_value(value: &Value) -> Vec<ContentRow> {
    if let (Some(subfolder), Some(frames)) = (
        value.get("subfolder").and_then(Value::as_str),
        value.get("frames").and_then(Value::as_array),
    ) {
        return frames
            .iter()
            .map(|frame| ContentRow {
                video: subfolder.to_string(),
                frame_number: frame.get("frame_number").and_then(Value::as_i64).unwrap_or(0),
                frame_filename: frame
                    .get("frame_filename")
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN)
                    .to_string(),
                content: response_content(frame.get("response").unwrap_or(&Value::Null)),
            })
            .collect();
    }

    let has_choices = value
        .get("choices")
        .and_then(Value::as_array)
        .map_or(false, |choices| !choices.is_empty());
    if value.get("error").is_some() || has_choices {
        return vec![ContentRow {
            video: UNKNOWN.to_string(),
            frame_number: 0,
            frame_filename: UNKNOWN.to_string(),
            content: response_content(value),
        }];
    }

    Vec::new()
}

/// Error message for error payloads, else the first completion's text
pub fn response_content(response: &Value) -> String {
    if let Some(error) = response.get("error") {
        return error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }

    response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn score_line_regex() -> &'static Regex {
    static SCORE_LINE: OnceLock<Regex> = OnceLock::new();
    SCORE_LINE.get_or_init(|| Regex::new(r"^([^:]+):\s*(\d+)\s*$").expect("valid score line regex"))
}

/// Parse `Label: 42` lines; anything else on a line is ignored
pub fn parse_content(content: &str) -> ParsedContent {
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed.starts_with("{I'm sorry}") {
        return ParsedContent::Unavailable;
    }

    let regex = score_line_regex();
    let mut scores: Vec<(String, f64)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        let Some(captures) = regex.captures(line) else {
            continue;
        };
        let label = captures[1].trim().to_string();
        let Ok(score) = captures[2].parse::<f64>() else {
            continue;
        };

        match scores.iter_mut().find(|(existing, _)| *existing == label) {
            Some(entry) => entry.1 = score,
            None => scores.push((label, score)),
        }
    }

    let line_count = content.lines().count();
    if scores.is_empty() {
        if line_count > 5 {
            warn!(
                "⚠️  No features parsed from {} lines, first line: {:?}",
                line_count,
                content.lines().next().unwrap_or_default().chars().take(100).collect::<String>()
            );
        }
        return ParsedContent::Unavailable;
    }

    ParsedContent::Scores(scores)
}

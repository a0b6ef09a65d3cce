use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::client::{encode_image, ChatRequest};
use super::retry::{rate_frame, FrameOutcome};
use super::{FrameResult, RatingClient, VideoResults};
use crate::config::RatingConfig;
use crate::rubric;
use crate::state::{append_line, read_committed, read_name_list, Ledger};

/// Files belonging to one round in one output directory
#[derive(Debug, Clone, PartialEq)]
pub struct RoundPaths {
    pub output_dir: PathBuf,
    /// NDJSON, one `VideoResults` per line
    pub results_file: PathBuf,
    /// Subfolders already rated this round
    pub ledger_file: PathBuf,
    /// Transcript file names never sent this round
    pub exclusion_file: PathBuf,
}

impl RoundPaths {
    pub fn new(output_dir: impl Into<PathBuf>, round: u32, extra_round: u32) -> Self {
        let output_dir = output_dir.into();
        Self {
            results_file: output_dir.join(format!("output_{}_{}.json", round, extra_round)),
            ledger_file: output_dir.join(format!("output_{}_{}.txt", round, extra_round)),
            exclusion_file: output_dir.join(format!("output_audio_{}.txt", round)),
            output_dir,
        }
    }
}

/// `<output_base>_<round>`
pub fn round_output_dir(output_base: &Path, round: u32) -> PathBuf {
    let mut dir = OsString::from(output_base.as_os_str());
    dir.push(format!("_{}", round));
    PathBuf::from(dir)
}

/// Counters for one round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundSummary {
    pub round: u32,
    pub videos_processed: usize,
    pub videos_skipped: usize,
    pub frames_attempted: usize,
    pub frames_rated: usize,
    pub frames_invalid: usize,
    pub frames_abandoned: usize,
    pub elapsed: Duration,
}

/// Rates every frame folder under a root, one round at a time
pub struct FrameRater {
    client: Box<dyn RatingClient>,
    config: RatingConfig,
    prompt: String,
    extra_round: u32,
}

impl FrameRater {
    pub fn new(client: Box<dyn RatingClient>, config: RatingConfig) -> Self {
        Self {
            client,
            config,
            prompt: rubric::build_prompt(),
            extra_round: 0,
        }
    }

    /// Suffix distinguishing repeated passes of the same round number
    pub fn with_extra_round(mut self, extra_round: u32) -> Self {
        self.extra_round = extra_round;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Run rounds `first..=last`, each into `<output_base>_<round>`
    pub async fn run_rounds(
        &self,
        frames_dir: &Path,
        output_base: &Path,
        first: u32,
        last: u32,
    ) -> Result<Vec<RoundSummary>> {
        if first > last {
            return Err(anyhow!("First round {} is after last round {}", first, last));
        }

        let mut summaries = Vec::new();
        for round in first..=last {
            info!("🚀 Starting round {}", round);
            let output_dir = round_output_dir(output_base, round);
            let summary = self.run_round(frames_dir, &output_dir, round).await?;
            info!("🏁 Round {} completed", round);
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Rate every subfolder of `frames_dir` that is not yet on this round's ledger
    pub async fn run_round(&self, frames_dir: &Path, output_dir: &Path, round: u32) -> Result<RoundSummary> {
        let start_time = Instant::now();
        let paths = RoundPaths::new(output_dir, round, self.extra_round);
        tokio::fs::create_dir_all(&paths.output_dir).await?;

        let mut ledger = Ledger::open(&paths.ledger_file).await?;
        reconcile_ledger(&paths.results_file, &mut ledger).await?;
        let exclusions = read_name_list(&paths.exclusion_file).await?;

        let mut summary = RoundSummary {
            round,
            ..RoundSummary::default()
        };

        for subfolder_path in list_subfolders(frames_dir).await? {
            let subfolder = match subfolder_path.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => continue,
            };

            if ledger.contains(&subfolder) {
                summary.videos_skipped += 1;
                continue;
            }

            let (images, transcripts) = collect_inputs(&subfolder_path, &exclusions).await?;
            if images.is_empty() {
                debug!("No frames in {}, skipping", subfolder);
                continue;
            }

            let video_start = Instant::now();
            info!("🎬 Processing {} ({} frames, {} transcripts)", subfolder, images.len(), transcripts.len());

            let results = self.rate_video(&subfolder, &images, &transcripts, &mut summary).await;

            let incomplete = results.incomplete_frames();
            info!(
                "📊 {}: {} frames attempted, {} with responses, {} incomplete",
                subfolder,
                images.len(),
                results.frames.len(),
                incomplete.len()
            );
            if !incomplete.is_empty() {
                warn!("⚠️  Frames with incomplete data in {}: {:?}", subfolder, incomplete);
            }

            append_line(&paths.results_file, &serde_json::to_string(&results)?).await?;
            ledger.record(&subfolder).await?;
            summary.videos_processed += 1;

            info!(
                "✅ Finished {} ({} videos this run), {:.2}s for this video, {:.2}s total",
                subfolder,
                summary.videos_processed,
                video_start.elapsed().as_secs_f64(),
                start_time.elapsed().as_secs_f64()
            );
        }

        summary.elapsed = start_time.elapsed();
        info!(
            "🎉 Round {}: {} videos rated, {} already done, {}/{} frames valid, {} kept invalid, {} abandoned, {:.2}s",
            round,
            summary.videos_processed,
            summary.videos_skipped,
            summary.frames_rated,
            summary.frames_attempted,
            summary.frames_invalid,
            summary.frames_abandoned,
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }

    async fn rate_video(
        &self,
        subfolder: &str,
        images: &[PathBuf],
        transcripts: &[String],
        summary: &mut RoundSummary,
    ) -> VideoResults {
        let mut results = VideoResults::new(subfolder);
        let total = images.len();

        for (index, image_path) in images.iter().enumerate() {
            let frame_number = index + 1;
            let frame_filename = image_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let frame_label = format!("{}/{}", subfolder, frame_filename);
            summary.frames_attempted += 1;

            debug!("🖼️  Frame {}/{}: {}", frame_number, total, frame_filename);

            let image_url = match encode_image(image_path).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("⚠️  Skipping {}: {:#}", frame_label, e);
                    summary.frames_abandoned += 1;
                    continue;
                }
            };

            let request = ChatRequest::for_frame(
                &self.config.model,
                self.config.max_tokens,
                &self.prompt,
                image_url,
                transcripts,
            );

            let outcome = rate_frame(
                self.client.as_ref(),
                &request,
                self.config.expected_features,
                &self.config.retry,
                &frame_label,
            )
            .await;

            match outcome {
                FrameOutcome::Accepted { response, .. } => {
                    results.frames.push(FrameResult {
                        frame_number: frame_number as u32,
                        frame_filename,
                        response,
                        validation_error: None,
                    });
                    summary.frames_rated += 1;

                    if frame_number < total {
                        tokio::time::sleep(self.config.retry.inter_frame_delay()).await;
                    }
                }
                FrameOutcome::Invalid { response, reason } => {
                    results.frames.push(FrameResult {
                        frame_number: frame_number as u32,
                        frame_filename,
                        response,
                        validation_error: Some(reason),
                    });
                    summary.frames_invalid += 1;
                }
                FrameOutcome::Abandoned { reason } => {
                    debug!("No result stored for {}: {}", frame_label, reason);
                    summary.frames_abandoned += 1;
                }
            }
        }

        results.completed_at = Some(Utc::now());
        results
    }
}

/// Record on the ledger every subfolder whose results already reached the
/// NDJSON output, covering a crash between the two appends.
async fn reconcile_ledger(results_file: &Path, ledger: &mut Ledger) -> Result<()> {
    let content = match read_committed(results_file).await? {
        Some(content) => content,
        None => return Ok(()),
    };

    for line in String::from_utf8_lossy(&content).lines() {
        if line.trim().is_empty() {
            continue;
        }
        let subfolder = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|value| value.get("subfolder")?.as_str().map(str::to_string));

        if let Some(subfolder) = subfolder {
            if ledger.record(&subfolder).await? {
                warn!("🩹 Recovered {} onto ledger {}", subfolder, ledger.path().display());
            }
        }
    }

    Ok(())
}

async fn list_subfolders(frames_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(frames_dir)
        .await
        .map_err(|e| anyhow!("Failed to read frames folder {}: {}", frames_dir.display(), e))?;

    let mut subfolders = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            subfolders.push(entry.path());
        }
    }
    subfolders.sort();
    Ok(subfolders)
}

/// Sorted frame images and transcript texts of one video folder
async fn collect_inputs(folder: &Path, exclusions: &HashSet<String>) -> Result<(Vec<PathBuf>, Vec<String>)> {
    let mut images = Vec::new();
    let mut transcript_paths = Vec::new();

    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().to_string();
        let lower = file_name.to_lowercase();

        if lower.ends_with(".png") {
            images.push(path);
        } else if lower.ends_with(".txt") && !exclusions.contains(&file_name) {
            transcript_paths.push(path);
        }
    }

    images.sort();
    transcript_paths.sort();

    let mut transcripts = Vec::with_capacity(transcript_paths.len());
    for path in transcript_paths {
        transcripts.push(tokio::fs::read_to_string(&path).await?);
    }

    Ok((images, transcripts))
}

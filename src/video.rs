use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Video information extracted from file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub filename: String,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Thin wrapper over the `ffprobe` and `ffmpeg` command line tools
#[derive(Debug, Clone, Default)]
pub struct VideoProcessor;

impl VideoProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Probe duration and geometry with ffprobe.
    ///
    /// Anything that prevents reading a positive duration from a video
    /// stream is reported as [`PipelineError::VideoUnreadable`].
    pub async fn get_video_info(&self, video_path: &Path) -> Result<VideoInfo> {
        let unreadable = |reason: String| PipelineError::VideoUnreadable {
            path: video_path.to_path_buf(),
            reason,
        };

        if !video_path.is_file() {
            return Err(unreadable("file not found".to_string()).into());
        }

        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video_path)
            .output()
            .await
            .map_err(|e| unreadable(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(unreadable(format!("ffprobe exited with {}", output.status)).into());
        }

        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| unreadable(format!("unparsable ffprobe output: {}", e)))?;

        let video_info = parse_probe_output(video_path, &ffprobe_data).map_err(unreadable)?;

        info!(
            "📹 Analyzed video: {} ({}x{}, {:.1}fps, {:.2}s)",
            video_info.filename,
            video_info.width,
            video_info.height,
            video_info.fps,
            video_info.duration.as_secs_f64()
        );

        Ok(video_info)
    }

    /// Decode the frame nearest to `timestamp` and write it as an image.
    pub async fn extract_frame(
        &self,
        video_path: &Path,
        timestamp: f64,
        output_path: &Path,
    ) -> Result<()> {
        let timestamp_str = format!("{:.3}", timestamp);

        debug!("Extracting frame at {}s to {}", timestamp_str, output_path.display());

        let status = tokio::process::Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &timestamp_str, "-i"])
            .arg(video_path)
            .args(["-frames:v", "1", "-y"])
            .arg(output_path)
            .status()
            .await?;

        if !status.success() {
            return Err(PipelineError::FrameExtraction {
                path: video_path.to_path_buf(),
                timestamp,
            }
            .into());
        }

        Ok(())
    }

    /// Check that both ffmpeg and ffprobe can be executed
    pub async fn check_availability() -> bool {
        for tool in ["ffmpeg", "ffprobe"] {
            let available = tokio::process::Command::new(tool)
                .arg("-version")
                .output()
                .await
                .map(|output| output.status.success())
                .unwrap_or(false);
            if !available {
                return false;
            }
        }
        true
    }
}

fn parse_probe_output(
    video_path: &Path,
    ffprobe_data: &serde_json::Value,
) -> std::result::Result<VideoInfo, String> {
    let format = &ffprobe_data["format"];
    let streams = ffprobe_data["streams"]
        .as_array()
        .ok_or_else(|| "no streams reported".to_string())?;

    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .ok_or_else(|| "no video stream found".to_string())?;

    let duration_seconds: f64 = format["duration"]
        .as_str()
        .or_else(|| video_stream["duration"].as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let duration = match Duration::try_from_secs_f64(duration_seconds) {
        Ok(duration) if duration_seconds > 0.0 => duration,
        _ => return Err(format!("invalid duration {}", duration_seconds)),
    };

    let fps = video_stream["r_frame_rate"]
        .as_str()
        .and_then(|s| match s.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().ok()?;
                let den: f64 = den.parse().ok()?;
                (den != 0.0).then(|| num / den)
            }
            None => s.parse().ok(),
        })
        .unwrap_or(0.0);

    Ok(VideoInfo {
        path: video_path.to_path_buf(),
        filename: video_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        duration,
        width: video_stream["width"].as_u64().unwrap_or(0) as u32,
        height: video_stream["height"].as_u64().unwrap_or(0) as u32,
        fps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_probe_output() {
        let data = json!({
            "format": {"duration": "10.000000"},
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 1280, "height": 720, "r_frame_rate": "30000/1001"}
            ]
        });

        let info = parse_probe_output(Path::new("/tmp/clip.mp4"), &data).unwrap();
        assert_eq!(info.filename, "clip.mp4");
        assert_eq!(info.duration, Duration::from_secs(10));
        assert_eq!((info.width, info.height), (1280, 720));
        assert!((info.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_probe_without_video_stream_is_rejected() {
        let data = json!({
            "format": {"duration": "10.0"},
            "streams": [{"codec_type": "audio"}]
        });
        assert!(parse_probe_output(Path::new("a.mp3"), &data).is_err());
    }

    #[test]
    fn test_probe_with_zero_duration_is_rejected() {
        let data = json!({
            "format": {"duration": "0.0"},
            "streams": [{"codec_type": "video"}]
        });
        assert!(parse_probe_output(Path::new("a.mp4"), &data).is_err());
    }

    #[tokio::test]
    async fn test_missing_video_is_unreadable() {
        let processor = VideoProcessor::new();
        let err = processor
            .get_video_info(Path::new("/nonexistent/video.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::VideoUnreadable { .. })
        ));
    }
}

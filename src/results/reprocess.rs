use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

/// What happened to each video queued for another round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReprocessSummary {
    pub copied: Vec<String>,
    pub already_present: Vec<String>,
    pub missing: Vec<String>,
}

/// Copy each video's frame folder from `source_root` into `target_root`.
/// Existing targets are never overwritten.
pub fn copy_for_reprocessing(videos: &[String], source_root: &Path, target_root: &Path) -> Result<ReprocessSummary> {
    std::fs::create_dir_all(target_root)?;
    let mut summary = ReprocessSummary::default();

    for video in videos {
        let source = source_root.join(video);
        let target = target_root.join(video);

        if !source.is_dir() {
            warn!("✗ '{}' not found in {}", video, source_root.display());
            summary.missing.push(video.clone());
        } else if target.exists() {
            warn!("⚠️  '{}' already exists in {}, skipping", video, target_root.display());
            summary.already_present.push(video.clone());
        } else {
            copy_tree(&source, &target)?;
            info!("📁 Copied '{}' to {}", video, target_root.display());
            summary.copied.push(video.clone());
        }
    }

    Ok(summary)
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| anyhow!("Failed to walk {}: {}", source.display(), e))?;
        let relative = entry.path().strip_prefix(source)?;
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

/// One video name per line
pub fn write_reprocess_list(path: &Path, videos: &[String]) -> Result<()> {
    let mut content = String::new();
    for video in videos {
        content.push_str(video);
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(())
}

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::OutputFormat;
use crate::results::dataset_dir;
use crate::table::{format_score, mean, FeatureTable, VIDEO};

/// Mean feature scores per video
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMeans {
    pub features: Vec<String>,
    pub rows: Vec<VideoMeanRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoMeanRow {
    pub video: String,
    pub values: Vec<Option<f64>>,
    pub frame_count: usize,
}

impl VideoMeans {
    /// Average every feature per video, leaving out rows with no scores at all
    pub fn from_table(table: &FeatureTable) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, row) in table.rows().iter().enumerate() {
            if row.all_missing() {
                continue;
            }
            grouped
                .entry(row.video.clone())
                .or_insert_with(|| {
                    order.push(row.video.clone());
                    Vec::new()
                })
                .push(idx);
        }
        order.sort();

        let rows = order
            .into_iter()
            .map(|video| {
                let members = &grouped[&video];
                let values = (0..table.features().len())
                    .map(|feature| mean(members.iter().map(|&r| table.rows()[r].values[feature])))
                    .collect();
                VideoMeanRow {
                    frame_count: members.len(),
                    video,
                    values,
                }
            })
            .collect();

        Self {
            features: table.features().to_vec(),
            rows,
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec![VIDEO.to_string()];
        header.extend(self.features.iter().cloned());
        header.push("frame_count".to_string());
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.video.clone()];
            record.extend(row.values.iter().map(|v| format_score(*v)));
            record.push(row.frame_count.to_string());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Figures logged after combining a round
#[derive(Debug, Clone, PartialEq)]
pub struct CombineReport {
    pub files_loaded: usize,
    pub combined_rows: usize,
    pub duplicates_removed: usize,
    pub missing_values: usize,
    pub unique_videos: usize,
    pub total_frames: usize,
    pub most_frames: Option<(String, usize)>,
    pub least_frames: Option<(String, usize)>,
    pub complete_percentage: f64,
    pub combined_path: PathBuf,
    pub output_path: PathBuf,
}

/// `<data_root>/average/input/final_output_<round>_per_{frame,video}.csv`
pub fn final_output_path(data_root: &Path, round: u32, format: OutputFormat) -> PathBuf {
    let suffix = match format {
        OutputFormat::PerFrame => "per_frame",
        OutputFormat::PerVideo => "per_video",
    };
    data_root
        .join("average")
        .join("input")
        .join(format!("final_output_{}_{}.csv", round, suffix))
}

/// Round CSVs named `output_*.csv`, sorted by name
pub fn list_round_csvs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| anyhow!("Failed to read {}: {}", dir.display(), e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("output_") && name.ends_with(".csv") && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Merges every round CSV of one dataset into the final table
pub struct Combiner {
    format: OutputFormat,
}

impl Combiner {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn combine(&self, data_root: &Path, round: u32) -> Result<CombineReport> {
        let dataset = dataset_dir(data_root, round);
        let files = list_round_csvs(&dataset)?;
        info!("📂 Found {} CSV files in {}", files.len(), dataset.display());

        let mut combined = FeatureTable::new();
        let mut files_loaded = 0;
        for path in &files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if std::fs::metadata(path)?.len() == 0 {
                warn!("⚠️  CSV file {} is empty, skipping", name);
                continue;
            }

            let mut table = FeatureTable::read_csv(path)?;
            if table.is_empty() {
                warn!("⚠️  CSV file {} has no rows, skipping", name);
                continue;
            }

            table.set_source_file(&name);
            info!("✅ Loaded {}: {} frames", name, table.len());
            combined.append(table);
            files_loaded += 1;
        }

        if combined.is_empty() {
            return Err(anyhow!("No data to combine in {}", dataset.display()));
        }
        info!("🔗 Combined {} files into {} frames", files_loaded, combined.len());

        let combined_path = dataset.join(format!("combined_all_rounds_{}.csv", round));
        combined.write_csv(&combined_path)?;
        info!("💾 Combined file saved as {}", combined_path.display());
        let combined_rows = combined.len();

        let duplicates_removed = combined.dedup_frames();
        if duplicates_removed > 0 {
            info!("🧹 Removed {} duplicate frames", duplicates_removed);
        } else {
            info!("✅ No duplicates found");
        }

        let missing_values = combined.missing_values();
        info!("🔍 Missing feature values: {}", missing_values);

        let output_path = final_output_path(data_root, round, self.format);
        match self.format {
            OutputFormat::PerFrame => {
                let mut final_table = combined.clone();
                final_table.sort_by_frame();
                final_table.clear_source_file();
                final_table.write_csv(&output_path)?;
                info!(
                    "📊 Final dataset: {} frames from {} videos",
                    final_table.len(),
                    final_table.videos().len()
                );
            }
            OutputFormat::PerVideo => {
                let means = VideoMeans::from_table(&combined);
                means.write_csv(&output_path)?;
                let average = if means.rows.is_empty() {
                    0.0
                } else {
                    means.rows.iter().map(|r| r.frame_count).sum::<usize>() as f64 / means.rows.len() as f64
                };
                info!(
                    "📊 Final dataset: {} videos, {:.1} frames per video on average",
                    means.rows.len(),
                    average
                );
            }
        }
        info!("💾 Saved: {}", output_path.display());

        let report = summarize(&combined, files_loaded, combined_rows, duplicates_removed, combined_path, output_path);
        log_summary(&report);
        Ok(report)
    }
}

fn summarize(
    table: &FeatureTable,
    files_loaded: usize,
    combined_rows: usize,
    duplicates_removed: usize,
    combined_path: PathBuf,
    output_path: PathBuf,
) -> CombineReport {
    let mut frames_per_video: Vec<(String, usize)> = {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for row in table.rows() {
            *counts.entry(row.video.as_str()).or_default() += 1;
        }
        counts.into_iter().map(|(v, c)| (v.to_string(), c)).collect()
    };
    // Most frames first, ties by name
    frames_per_video.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    CombineReport {
        files_loaded,
        combined_rows,
        duplicates_removed,
        missing_values: table.missing_values(),
        unique_videos: frames_per_video.len(),
        total_frames: table.len(),
        most_frames: frames_per_video.first().cloned(),
        least_frames: frames_per_video.last().cloned(),
        complete_percentage: table.completeness().complete_percentage(),
        combined_path,
        output_path,
    }
}

fn log_summary(report: &CombineReport) {
    info!("📈 Summary statistics");
    info!("   Total unique videos: {}", report.unique_videos);
    info!("   Total frames analyzed: {}", report.total_frames);
    if report.unique_videos > 0 {
        info!(
            "   Average frames per video: {:.1}",
            report.total_frames as f64 / report.unique_videos as f64
        );
    }
    if let Some((video, frames)) = &report.most_frames {
        info!("   Video with most frames: {} ({} frames)", video, frames);
    }
    if let Some((video, frames)) = &report.least_frames {
        info!("   Video with least frames: {} ({} frames)", video, frames);
    }
    info!(
        "   Data completeness: {:.1}% of frames have all features rated",
        report.complete_percentage
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_round(dataset: &Path, name: &str, rows: &[(&str, i64, f64)]) {
        let mut table = FeatureTable::new();
        for (video, frame, score) in rows {
            table.push_scores(video, *frame, &format!("frame_{:04}.png", frame), [("Warm", Some(*score))]);
        }
        table.write_csv(&dataset.join(name)).unwrap();
    }

    #[test]
    fn test_video_means_skip_empty_rows() {
        let mut table = FeatureTable::new();
        table.push_scores("b", 1, "f1", [("Warm", Some(10.0)), ("Kind", Some(1.0))]);
        table.push_scores("b", 2, "f2", [("Warm", Some(20.0))]);
        table.push_scores("b", 3, "f3", Vec::<(&str, Option<f64>)>::new());
        table.push_scores("a", 1, "f1", [("Kind", Some(4.0))]);

        let means = VideoMeans::from_table(&table);
        assert_eq!(means.rows.len(), 2);
        assert_eq!(means.rows[0].video, "a");
        assert_eq!(means.rows[0].values, vec![None, Some(4.0)]);
        assert_eq!(means.rows[1].frame_count, 2);
        assert_eq!(means.rows[1].values, vec![Some(15.0), Some(1.0)]);
    }

    #[test]
    fn test_combine_per_frame_dedups_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let data_root = temp_dir.path();
        let dataset = dataset_dir(data_root, 2);
        std::fs::create_dir_all(&dataset).unwrap();

        write_round(&dataset, "output_2_0.csv", &[("b", 1, 1.0), ("a", 2, 2.0)]);
        write_round(&dataset, "output_2_1.csv", &[("a", 2, 99.0), ("a", 1, 3.0)]);
        std::fs::write(dataset.join("output_2_2.csv"), "").unwrap();
        std::fs::write(dataset.join("notes.csv"), "video\n").unwrap();

        let report = Combiner::new(OutputFormat::PerFrame).combine(data_root, 2).unwrap();
        assert_eq!(report.files_loaded, 2);
        assert_eq!(report.combined_rows, 4);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.unique_videos, 2);
        assert_eq!(report.most_frames, Some(("a".to_string(), 2)));
        assert_eq!(report.least_frames, Some(("b".to_string(), 1)));

        let combined = FeatureTable::read_csv(&dataset.join("combined_all_rounds_2.csv")).unwrap();
        assert_eq!(combined.len(), 4);
        assert_eq!(combined.rows()[2].source_file.as_deref(), Some("output_2_1.csv"));

        let final_table = FeatureTable::read_csv(&final_output_path(data_root, 2, OutputFormat::PerFrame)).unwrap();
        let keys: Vec<(&str, i64, Option<f64>)> = final_table
            .rows()
            .iter()
            .map(|r| (r.video.as_str(), r.frame_number, r.values[0]))
            .collect();
        assert_eq!(keys, vec![("a", 1, Some(3.0)), ("a", 2, Some(2.0)), ("b", 1, Some(1.0))]);
        assert!(final_table.rows().iter().all(|r| r.source_file.is_none()));
    }

    #[test]
    fn test_combine_per_video() {
        let temp_dir = TempDir::new().unwrap();
        let data_root = temp_dir.path();
        let dataset = dataset_dir(data_root, 1);
        std::fs::create_dir_all(&dataset).unwrap();
        write_round(&dataset, "output_1_0.csv", &[("a", 1, 10.0), ("a", 2, 30.0), ("b", 1, 5.0)]);

        let report = Combiner::new(OutputFormat::PerVideo).combine(data_root, 1).unwrap();
        let content = std::fs::read_to_string(&report.output_path).unwrap();
        assert_eq!(content, "video,Warm,frame_count\na,20,2\nb,5,1\n");
    }

    #[test]
    fn test_combine_without_data_fails() {
        let temp_dir = TempDir::new().unwrap();
        let dataset = dataset_dir(temp_dir.path(), 1);
        std::fs::create_dir_all(&dataset).unwrap();
        assert!(Combiner::new(OutputFormat::PerFrame).combine(temp_dir.path(), 1).is_err());
    }
}

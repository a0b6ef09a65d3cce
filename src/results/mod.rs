//! Flattening of a round's rated frames into a feature table.

pub mod parse;
pub mod reprocess;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub use parse::{parse_content, read_round_results, ContentRow, ParsedContent, RoundReadout};
pub use reprocess::{copy_for_reprocessing, write_reprocess_list, ReprocessSummary};

use crate::config::ResultsConfig;
use crate::rubric;
use crate::table::{Completeness, FeatureTable, UNAVAILABLE_COLUMN};

/// `<data_root>/dataset_<round>`
pub fn dataset_dir(data_root: &Path, round: u32) -> PathBuf {
    data_root.join(format!("dataset_{}", round))
}

/// Build the per-frame table. Unparsable rows only get the
/// `Data Unavailable` column, left empty.
pub fn build_table(rows: &[ContentRow]) -> FeatureTable {
    let mut table = FeatureTable::new();
    let mut off_rubric = 0;

    for row in rows {
        match parse_content(&row.content) {
            ParsedContent::Scores(scores) => {
                off_rubric += scores
                    .iter()
                    .filter(|(label, _)| rubric::position(label).is_none())
                    .count();
                table.push_scores(
                    &row.video,
                    row.frame_number,
                    &row.frame_filename,
                    scores.into_iter().map(|(label, score)| (label, Some(score))),
                );
            }
            ParsedContent::Unavailable => {
                table.push_scores(
                    &row.video,
                    row.frame_number,
                    &row.frame_filename,
                    [(UNAVAILABLE_COLUMN, None)],
                );
            }
        }
    }

    if off_rubric > 0 {
        debug!("{} parsed labels are not rubric labels", off_rubric);
    }
    table
}

pub fn log_completeness(report: &Completeness) {
    info!("🔍 Missing data summary");
    info!("   Frames with all features missing: {}", report.rows_all_missing);
    info!("   Frames with some features missing: {}", report.rows_some_missing);
    info!("   Features with some missing values: {}", report.columns_some_missing.len());
    info!("   Features with all values missing: {}", report.columns_all_missing.len());
    for column in report.columns_all_missing.iter().take(10) {
        info!("     - {}", column);
    }
}

/// Everything one extraction produced
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub csv_path: PathBuf,
    pub table: FeatureTable,
    pub completeness: Completeness,
    pub videos_to_reprocess: Vec<String>,
    pub reprocess_list: Option<PathBuf>,
    pub reprocess: Option<ReprocessSummary>,
}

/// Turns `output_<round>_<extra>.json` into `output_<round>_<extra>.csv`
pub struct ResultExtractor {
    config: ResultsConfig,
    extra_round: u32,
}

impl ResultExtractor {
    pub fn new(config: ResultsConfig) -> Self {
        Self {
            config,
            extra_round: 0,
        }
    }

    pub fn with_extra_round(mut self, extra_round: u32) -> Self {
        self.extra_round = extra_round;
        self
    }

    pub async fn extract(&self, data_root: &Path, round: u32) -> Result<ExtractionReport> {
        let start_time = Instant::now();
        let dataset = dataset_dir(data_root, round);
        let stem = format!("output_{}_{}", round, self.extra_round);
        let json_path = dataset.join(format!("{}.json", stem));
        let csv_path = dataset.join(format!("{}.csv", stem));

        let readout = read_round_results(&json_path).await?;
        if readout.skipped_lines > 0 {
            warn!("⚠️  {} unreadable lines in {}", readout.skipped_lines, json_path.display());
        }

        let table = build_table(&readout.rows);
        table.write_csv(&csv_path)?;

        info!("✅ CSV file created: {}", csv_path.display());
        info!("   Total frames processed: {}", table.len());
        info!("   Unique videos: {}", table.videos().len());
        info!("   Feature columns: {}", table.features().len());

        let completeness = table.completeness();
        log_completeness(&completeness);

        let videos_to_reprocess = table.videos_with_empty_rows();
        info!("🔁 Videos with completely missing frames: {}", videos_to_reprocess.len());

        let mut report = ExtractionReport {
            csv_path,
            table,
            completeness,
            videos_to_reprocess,
            reprocess_list: None,
            reprocess: None,
        };

        if report.videos_to_reprocess.is_empty() {
            info!("✅ No videos need reprocessing");
        } else {
            report.reprocess = self.copy_frames(&report.videos_to_reprocess, round)?;

            let list_path = dataset.join(format!("videos_to_reprocess_{}_{}.txt", round, self.extra_round));
            write_reprocess_list(&list_path, &report.videos_to_reprocess)?;
            info!("📝 Videos to reprocess listed in {}", list_path.display());
            report.reprocess_list = Some(list_path);
        }

        debug!("Extraction took {:.2}s", start_time.elapsed().as_secs_f64());
        Ok(report)
    }

    fn copy_frames(&self, videos: &[String], round: u32) -> Result<Option<ReprocessSummary>> {
        let Some(source) = &self.config.frames_source else {
            warn!("⚠️  No frames source configured, not copying frame folders");
            return Ok(None);
        };

        let target = match &self.config.retry_target {
            Some(target) => target.clone(),
            None => {
                let mut name = source.as_os_str().to_os_string();
                name.push(format!("_round_{}_{}", round, self.extra_round));
                PathBuf::from(name)
            }
        };

        copy_for_reprocessing(videos, source, &target).map(Some)
    }
}

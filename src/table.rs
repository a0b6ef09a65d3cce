//! In-memory feature score table shared by result extraction and aggregation.
//!
//! Rows carry fixed metadata (video, frame number, frame file name) plus one
//! optional score per feature column. Columns keep first-appearance order.

use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::PipelineError;

pub const VIDEO: &str = "video";
pub const FRAME_NUMBER: &str = "frame_number";
pub const FRAME_FILENAME: &str = "frame_filename";
pub const SOURCE_FILE: &str = "source_file";
pub const METADATA_COLUMNS: [&str; 3] = [VIDEO, FRAME_NUMBER, FRAME_FILENAME];

/// Sentinel column for rows whose content could not be parsed
pub const UNAVAILABLE_COLUMN: &str = "Data Unavailable";

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub video: String,
    pub frame_number: i64,
    pub frame_filename: String,
    /// Round CSV the row came from, set only while combining
    pub source_file: Option<String>,
    /// Aligned with the table's feature columns
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn all_missing(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn any_missing(&self) -> bool {
        self.values.iter().any(Option::is_none)
    }
}

/// Missing-data diagnostics over feature columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completeness {
    pub total_rows: usize,
    pub rows_all_missing: usize,
    pub rows_some_missing: usize,
    pub columns_some_missing: Vec<String>,
    pub columns_all_missing: Vec<String>,
    pub missing_values: usize,
}

impl Completeness {
    /// Share of rows with every feature present, in percent
    pub fn complete_percentage(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        let complete = self.total_rows - self.rows_some_missing;
        complete as f64 / self.total_rows as f64 * 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    features: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Column index for `name`, appending an all-missing column if new
    pub fn ensure_feature(&mut self, name: &str) -> usize {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.features.len();
        self.features.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        for row in &mut self.rows {
            row.values.push(None);
        }
        idx
    }

    /// Add a row from named scores; unseen names become new columns
    pub fn push_scores<I, S>(&mut self, video: &str, frame_number: i64, frame_filename: &str, scores: I)
    where
        I: IntoIterator<Item = (S, Option<f64>)>,
        S: AsRef<str>,
    {
        let mut values = vec![None; self.features.len()];
        for (name, value) in scores {
            let idx = self.ensure_feature(name.as_ref());
            if idx >= values.len() {
                values.resize(idx + 1, None);
            }
            values[idx] = value;
        }
        self.rows.push(FeatureRow {
            video: video.to_string(),
            frame_number,
            frame_filename: frame_filename.to_string(),
            source_file: None,
            values,
        });
    }

    pub fn value(&self, row: usize, feature: &str) -> Option<f64> {
        let idx = self.feature_index(feature)?;
        self.rows.get(row)?.values.get(idx).copied().flatten()
    }

    pub fn set_source_file(&mut self, source: &str) {
        for row in &mut self.rows {
            row.source_file = Some(source.to_string());
        }
    }

    pub fn clear_source_file(&mut self) {
        for row in &mut self.rows {
            row.source_file = None;
        }
    }

    /// Concatenate `other` below this table, taking the union of columns
    pub fn append(&mut self, other: FeatureTable) {
        let mapping: Vec<usize> = other
            .features
            .iter()
            .map(|name| self.ensure_feature(name))
            .collect();
        let width = self.features.len();

        for row in other.rows {
            let mut values = vec![None; width];
            for (from, to) in mapping.iter().enumerate() {
                values[*to] = row.values.get(from).copied().flatten();
            }
            self.rows.push(FeatureRow { values, ..row });
        }
    }

    /// Drop later rows repeating a (video, frame_number) pair; returns how many
    pub fn dedup_frames(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::new();
        self.rows
            .retain(|row| seen.insert((row.video.clone(), row.frame_number)));
        before - self.rows.len()
    }

    pub fn sort_by_frame(&mut self) {
        self.rows.sort_by(|a, b| {
            a.video
                .cmp(&b.video)
                .then(a.frame_number.cmp(&b.frame_number))
        });
    }

    pub fn retain_rows<F: FnMut(&FeatureRow) -> bool>(&mut self, keep: F) {
        self.rows.retain(keep);
    }

    pub fn missing_values(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.values.iter().filter(|v| v.is_none()).count())
            .sum()
    }

    pub fn completeness(&self) -> Completeness {
        let mut report = Completeness {
            total_rows: self.rows.len(),
            missing_values: self.missing_values(),
            ..Completeness::default()
        };

        for row in &self.rows {
            if row.all_missing() {
                report.rows_all_missing += 1;
            }
            if row.any_missing() {
                report.rows_some_missing += 1;
            }
        }

        for (idx, name) in self.features.iter().enumerate() {
            let missing = self.rows.iter().filter(|row| row.values[idx].is_none()).count();
            if missing > 0 {
                report.columns_some_missing.push(name.clone());
            }
            if missing > 0 && missing == self.rows.len() {
                report.columns_all_missing.push(name.clone());
            }
        }

        report
    }

    /// Distinct videos, sorted
    pub fn videos(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.video.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Videos with at least one row lacking every feature, in first-seen order
    pub fn videos_with_empty_rows(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|row| row.all_missing())
            .filter(|row| seen.insert(row.video.clone()))
            .map(|row| row.video.clone())
            .collect()
    }

    /// Read a table written by [`FeatureTable::write_csv`] or an equivalent tool
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open CSV {}", path.display()))?;
        let headers = reader.headers()?.clone();

        let position = |name: &str| headers.iter().position(|h| h == name);
        let (video_col, frame_col, file_col) = match (
            position(VIDEO),
            position(FRAME_NUMBER),
            position(FRAME_FILENAME),
        ) {
            (Some(v), Some(f), Some(n)) => (v, f, n),
            _ => {
                return Err(PipelineError::MissingMetadataColumns {
                    path: path.to_path_buf(),
                    expected: METADATA_COLUMNS.iter().map(|c| c.to_string()).collect(),
                }
                .into())
            }
        };
        let source_col = position(SOURCE_FILE);

        let mut table = FeatureTable::new();
        let feature_cols: Vec<(usize, usize)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| ![video_col, frame_col, file_col].contains(i) && Some(*i) != source_col)
            .map(|(i, name)| (i, table.ensure_feature(name)))
            .collect();

        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Bad CSV record in {}", path.display()))?;
            let field = |i: usize| record.get(i).unwrap_or_default();

            let frame_number = parse_frame_number(field(frame_col)).ok_or_else(|| {
                anyhow!(
                    "Invalid frame_number {:?} on row {} of {}",
                    field(frame_col),
                    line + 1,
                    path.display()
                )
            })?;

            let mut values = vec![None; table.features.len()];
            for (csv_idx, feature_idx) in &feature_cols {
                values[*feature_idx] = parse_score(field(*csv_idx));
            }

            table.rows.push(FeatureRow {
                video: field(video_col).to_string(),
                frame_number,
                frame_filename: field(file_col).to_string(),
                source_file: source_col.map(|i| field(i).to_string()),
                values,
            });
        }

        debug!(
            "📄 Read {} rows, {} features from {}",
            table.rows.len(),
            table.features.len(),
            path.display()
        );
        Ok(table)
    }

    /// Write metadata then feature columns; missing values are empty fields.
    /// `source_file` is written only when some row carries one.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let with_source = self.rows.iter().any(|row| row.source_file.is_some());
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV {}", path.display()))?;

        let mut header: Vec<&str> = METADATA_COLUMNS.to_vec();
        header.extend(self.features.iter().map(String::as_str));
        if with_source {
            header.push(SOURCE_FILE);
        }
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(header.len());
            record.push(row.video.clone());
            record.push(row.frame_number.to_string());
            record.push(row.frame_filename.clone());
            record.extend(row.values.iter().map(|v| format_score(*v)));
            if with_source {
                record.push(row.source_file.clone().unwrap_or_default());
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn parse_frame_number(field: &str) -> Option<i64> {
    let field = field.trim();
    field.parse::<i64>().ok().or_else(|| {
        field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

/// Empty or non-numeric fields are missing
pub fn parse_score(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

pub fn format_score(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Mean of the present values, `None` if there are none
pub fn mean<I: IntoIterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

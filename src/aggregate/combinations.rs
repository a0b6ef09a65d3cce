use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::AggregateConfig;
use crate::error::PipelineError;
use crate::table::{mean, FeatureTable};

/// k-element index combinations of `0..n` in lexicographic order
#[derive(Debug, Clone)]
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    first: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            first: true,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let k = self.indices.len();
        if k == 0 || k > self.n {
            return None;
        }

        if self.first {
            self.first = false;
            return Some(self.indices.clone());
        }

        // Rightmost index that can still move right
        let mut i = k;
        loop {
            if i == 0 {
                return None;
            }
            i -= 1;
            if self.indices[i] < self.n - k + i {
                break;
            }
        }

        self.indices[i] += 1;
        for j in i + 1..k {
            self.indices[j] = self.indices[j - 1] + 1;
        }
        Some(self.indices.clone())
    }
}

/// `output_average_<k>_files_<i1_i2...>.csv` for 0-based `indices`
pub fn output_file_name(indices: &[usize]) -> String {
    let joined = indices
        .iter()
        .map(|i| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join("_");
    format!("output_average_{}_files_{}.csv", indices.len(), joined)
}

/// Average same-named feature columns across `tables`, row by row.
///
/// Rows align by position and metadata comes from the first table. Missing
/// values are skipped; a table shorter than the first contributes nothing
/// past its end.
pub fn average_tables(tables: &[&FeatureTable]) -> Result<FeatureTable> {
    let first = tables
        .first()
        .ok_or_else(|| anyhow!("Nothing to average"))?;

    let mut result = FeatureTable::new();
    for table in tables {
        for feature in table.features() {
            result.ensure_feature(feature);
        }
    }

    // column index of every result feature in every table
    let lookup: Vec<Vec<Option<usize>>> = tables
        .iter()
        .map(|table| {
            result
                .features()
                .iter()
                .map(|name| table.feature_index(name))
                .collect()
        })
        .collect();

    let features = result.features().to_vec();
    for (row_idx, meta) in first.rows().iter().enumerate() {
        let scores = features
            .iter()
            .enumerate()
            .map(|(feature, name)| {
                let value = mean(tables.iter().zip(&lookup).map(|(table, columns)| {
                    let column = columns[feature]?;
                    table.rows().get(row_idx)?.values.get(column).copied().flatten()
                }));
                (name.as_str(), value)
            })
            .collect::<Vec<_>>();

        result.push_scores(&meta.video, meta.frame_number, &meta.frame_filename, scores);
    }

    Ok(result)
}

/// Outputs written by one averaging run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AveragingSummary {
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

/// Writes the average of every subset of the round CSVs
pub struct CombinationAverager {
    number_of_files: usize,
    min_subset_size: usize,
}

impl CombinationAverager {
    pub fn new(config: &AggregateConfig) -> Self {
        Self {
            number_of_files: config.number_of_files,
            min_subset_size: config.min_subset_size,
        }
    }

    pub fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<AveragingSummary> {
        let inputs = list_csvs(input_dir)?;
        if inputs.len() != self.number_of_files {
            return Err(PipelineError::FileCountMismatch {
                expected: self.number_of_files,
                found: inputs.len(),
            }
            .into());
        }
        if self.min_subset_size == 0 || self.min_subset_size > self.number_of_files {
            return Err(anyhow!(
                "Subset size must be between 1 and {}, got {}",
                self.number_of_files,
                self.min_subset_size
            ));
        }

        std::fs::create_dir_all(output_dir)?;
        info!("🧮 Averaging {} files from {}", inputs.len(), input_dir.display());
        for (i, path) in inputs.iter().enumerate() {
            info!("   [{}] {}", i + 1, path.display());
        }

        let tables = inputs
            .iter()
            .map(|path| FeatureTable::read_csv(path))
            .collect::<Result<Vec<_>>>()?;

        let expected_rows = tables[0].len();
        for (path, table) in inputs.iter().zip(&tables).skip(1) {
            if table.len() != expected_rows {
                warn!(
                    "⚠️  {} has {} rows, first file has {}; rows are aligned by position",
                    path.display(),
                    table.len(),
                    expected_rows
                );
            }
        }

        let mut summary = AveragingSummary {
            inputs: inputs.clone(),
            outputs: Vec::new(),
        };

        for size in self.min_subset_size..=self.number_of_files {
            info!("🔢 Combinations of {} files", size);
            for (count, indices) in Combinations::new(inputs.len(), size).enumerate() {
                let selected: Vec<&FeatureTable> = indices.iter().map(|&i| &tables[i]).collect();
                let averaged = average_tables(&selected)?;

                let output_path = output_dir.join(output_file_name(&indices));
                averaged.write_csv(&output_path)?;
                info!(
                    "   ✅ [{}] files {:?} → {} ({} rows, {} features)",
                    count + 1,
                    indices.iter().map(|i| i + 1).collect::<Vec<_>>(),
                    output_path.display(),
                    averaged.len(),
                    averaged.features().len()
                );
                summary.outputs.push(output_path);
            }
        }

        info!("🎉 Averaging complete, {} files written to {}", summary.outputs.len(), output_dir.display());
        Ok(summary)
    }
}

fn list_csvs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| anyhow!("Failed to read {}: {}", dir.display(), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

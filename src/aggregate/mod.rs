//! Cross-file aggregation: merging a round's CSVs and averaging subsets of rounds.

pub mod combinations;
pub mod combine;

pub use combinations::{average_tables, output_file_name, AveragingSummary, CombinationAverager, Combinations};
pub use combine::{final_output_path, list_round_csvs, CombineReport, Combiner, VideoMeanRow, VideoMeans};

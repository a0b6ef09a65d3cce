use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use frame_rating_pipeline::config::OutputFormat;
use frame_rating_pipeline::{
    CombinationAverager, Combiner, Config, FrameExtractor, FrameRater, HttpRatingClient,
    ResultExtractor, Transcriber, WhisperCli,
};

fn cli() -> Command {
    Command::new("Frame Rating Pipeline")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Extract, transcribe, rate and aggregate video frames against a fixed rubric")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (default: frame-rating.toml)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("extract-frames")
                .about("Sample frames from a video at a fixed interval")
                .arg(Arg::new("video").long("video").value_name("FILE").required(true))
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Where frame_NNNN.png files go"),
                )
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECS")
                        .value_parser(clap::value_parser!(f64)),
                ),
        )
        .subcommand(
            Command::new("transcribe")
                .about("Transcribe every audio file in a folder, resumably")
                .arg(Arg::new("audio-dir").long("audio-dir").value_name("DIR").required(true)),
        )
        .subcommand(
            Command::new("rate")
                .about("Rate every frame folder against the rubric for one or more rounds")
                .arg(Arg::new("frames-dir").long("frames-dir").value_name("DIR").required(true))
                .arg(
                    Arg::new("output-base")
                        .long("output-base")
                        .value_name("PATH")
                        .help("Round N writes into <PATH>_N")
                        .required(true),
                )
                .arg(round_arg("first-round", "1"))
                .arg(round_arg("last-round", "1"))
                .arg(round_arg("extra-round", "0")),
        )
        .subcommand(
            Command::new("extract-results")
                .about("Flatten a round's rated frames into a CSV table")
                .arg(round_arg("round", "1"))
                .arg(round_arg("extra-round", "0"))
                .arg(Arg::new("data-root").long("data-root").value_name("DIR").required(true))
                .arg(Arg::new("frames-source").long("frames-source").value_name("DIR"))
                .arg(Arg::new("retry-target").long("retry-target").value_name("DIR")),
        )
        .subcommand(
            Command::new("combine")
                .about("Merge a dataset's round CSVs into the final per-frame or per-video table")
                .arg(round_arg("round", "1"))
                .arg(Arg::new("data-root").long("data-root").value_name("DIR").required(true))
                .arg(
                    Arg::new("format")
                        .long("format")
                        .value_name("FORMAT")
                        .value_parser(["per-frame", "per-video"]),
                ),
        )
        .subcommand(
            Command::new("average")
                .about("Average every combination of the final round tables")
                .arg(Arg::new("input-dir").long("input-dir").value_name("DIR").required(true))
                .arg(Arg::new("output-dir").long("output-dir").value_name("DIR").required(true))
                .arg(
                    Arg::new("files")
                        .long("files")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("min-size")
                        .long("min-size")
                        .value_name("K")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
}

fn round_arg(name: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("N")
        .default_value(default)
        .value_parser(clap::value_parser!(u32))
}

fn path_arg(matches: &ArgMatches, name: &str) -> Result<PathBuf> {
    matches
        .get_one::<String>(name)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("--{} is required", name))
}

fn round_value(matches: &ArgMatches, name: &str) -> u32 {
    matches.get_one::<u32>(name).copied().unwrap_or_default()
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    match matches.get_one::<String>("config") {
        Some(path) => Config::load_from(&PathBuf::from(path)),
        None => Config::load().or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Ok(Config::default())
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let default_filter = if matches.get_flag("verbose") {
        "frame_rating_pipeline=debug,info"
    } else {
        "frame_rating_pipeline=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("extract-frames", sub)) => {
            if let Some(interval) = sub.get_one::<f64>("interval") {
                config.frames.interval_seconds = *interval;
            }
            if let Some(dir) = sub.get_one::<String>("output-dir") {
                config.frames.output_dir = PathBuf::from(dir);
            }
            config.validate()?;

            let video = path_arg(sub, "video")?;
            let extractor = FrameExtractor::new(&config.frames);
            let summary = extractor.extract(&video, &config.frames.output_dir).await?;

            info!(
                "🎉 Extracted {} frames from {} ({:.1}s of video) in {:.2}s",
                summary.frames.len(),
                summary.video.display(),
                summary.duration.as_secs_f64(),
                summary.elapsed.as_secs_f64()
            );
        }
        Some(("transcribe", sub)) => {
            config.validate()?;
            let audio_dir = path_arg(sub, "audio-dir")?;

            let engine = WhisperCli::new(config.transcription.clone());
            let transcriber = Transcriber::new(Box::new(engine), &config.transcription);
            transcriber.process_folder(&audio_dir).await?;

            let transcripts = transcriber.transcripts(&audio_dir).await?;
            info!("📚 {} transcripts available in {}", transcripts.len(), audio_dir.display());
        }
        Some(("rate", sub)) => {
            config.validate()?;
            let frames_dir = path_arg(sub, "frames-dir")?;
            let output_base = path_arg(sub, "output-base")?;

            info!("🚀 Frame rater starting with model {}", config.rating.model);
            let client = HttpRatingClient::new(&config.rating)?;
            let rater = FrameRater::new(Box::new(client), config.rating.clone())
                .with_extra_round(round_value(sub, "extra-round"));

            let summaries = rater
                .run_rounds(
                    &frames_dir,
                    &output_base,
                    round_value(sub, "first-round"),
                    round_value(sub, "last-round"),
                )
                .await?;

            let videos: usize = summaries.iter().map(|s| s.videos_processed).sum();
            info!("🎉 {} rounds done, {} videos rated", summaries.len(), videos);
        }
        Some(("extract-results", sub)) => {
            if let Some(dir) = sub.get_one::<String>("frames-source") {
                config.results.frames_source = Some(PathBuf::from(dir));
            }
            if let Some(dir) = sub.get_one::<String>("retry-target") {
                config.results.retry_target = Some(PathBuf::from(dir));
            }

            let data_root = path_arg(sub, "data-root")?;
            let extractor = ResultExtractor::new(config.results.clone())
                .with_extra_round(round_value(sub, "extra-round"));
            let report = extractor.extract(&data_root, round_value(sub, "round")).await?;

            info!(
                "🎉 {} rows written to {}, {} videos need reprocessing",
                report.table.len(),
                report.csv_path.display(),
                report.videos_to_reprocess.len()
            );
        }
        Some(("combine", sub)) => {
            if let Some(format) = sub.get_one::<String>("format") {
                config.aggregate.output_format = format.parse::<OutputFormat>()?;
            }

            let data_root = path_arg(sub, "data-root")?;
            let report = Combiner::new(config.aggregate.output_format)
                .combine(&data_root, round_value(sub, "round"))?;
            info!("🎉 Processing complete: {}", report.output_path.display());
        }
        Some(("average", sub)) => {
            if let Some(files) = sub.get_one::<usize>("files") {
                config.aggregate.number_of_files = *files;
            }
            if let Some(min_size) = sub.get_one::<usize>("min-size") {
                config.aggregate.min_subset_size = *min_size;
            }
            config.validate()?;

            let input_dir = path_arg(sub, "input-dir")?;
            let output_dir = path_arg(sub, "output-dir")?;
            CombinationAverager::new(&config.aggregate).run(&input_dir, &output_dir)?;
        }
        _ => return Err(anyhow!("Unknown command, see --help")),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_rate_defaults() {
        let matches = cli()
            .try_get_matches_from(["frame-rating", "rate", "--frames-dir", "f", "--output-base", "out"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "rate");
        assert_eq!(round_value(sub, "first-round"), 1);
        assert_eq!(round_value(sub, "last-round"), 1);
        assert_eq!(round_value(sub, "extra-round"), 0);
    }

    #[test]
    fn test_combine_rejects_unknown_format() {
        let result = cli().try_get_matches_from([
            "frame-rating",
            "combine",
            "--data-root",
            "d",
            "--format",
            "per-second",
        ]);
        assert!(result.is_err());
    }
}

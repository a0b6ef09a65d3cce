use anyhow::Result;
use async_trait::async_trait;
use frame_rating_pipeline::config::{ConfigBuilder, OutputFormat, RetryConfig};
use frame_rating_pipeline::frames::frame_file_name;
use frame_rating_pipeline::rating::{ChatRequest, HttpReply};
use frame_rating_pipeline::results::dataset_dir;
use frame_rating_pipeline::{
    rubric, CombinationAverager, Combiner, FeatureTable, FrameRater, RatingClient, ResultExtractor,
    SampleTimes,
};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;
use tokio_test::{assert_err, assert_ok};

/// Always answers with a complete rubric whose scores depend on the call count
struct RubricClient {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RatingClient for RubricClient {
    async fn send(&self, _request: &ChatRequest) -> Result<HttpReply> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let content = rubric::RUBRIC
            .iter()
            .enumerate()
            .map(|(i, label)| format!("{}: {}", label, (i + call) % 101))
            .collect::<Vec<_>>()
            .join("\n");
        let body = json!({
            "id": format!("chatcmpl-{}", call),
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        });
        Ok(HttpReply::new(200, body.to_string()))
    }
}

async fn write_frames(video_dir: &Path, count: usize) {
    fs::create_dir_all(video_dir).await.unwrap();
    for n in 1..=count {
        fs::write(video_dir.join(frame_file_name(n)), b"png").await.unwrap();
    }
    fs::write(video_dir.join("clip.txt"), "a short transcript").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_ten_second_video_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let frames_root = temp_dir.path().join("stimulus_frames");
    let data_root = temp_dir.path().join("data");

    // 10 s sampled every 2 s
    let times: Vec<f64> = SampleTimes::new(Duration::from_secs(10), Duration::from_secs(2)).collect();
    assert_eq!(times, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    write_frames(&frames_root.join("clip"), times.len()).await;

    let config = ConfigBuilder::new()
        .with_api_key("test-key".to_string())
        .with_output_format(OutputFormat::PerVideo)
        .build();
    assert_ok!(config.validate());

    let calls = Arc::new(AtomicUsize::new(0));
    let rater = FrameRater::new(
        Box::new(RubricClient {
            calls: Arc::clone(&calls),
        }),
        config.rating.clone(),
    );
    let round = rater
        .run_round(&frames_root, &dataset_dir(&data_root, 1), 1)
        .await
        .unwrap();
    assert_eq!(round.frames_rated, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let report = ResultExtractor::new(config.results.clone())
        .extract(&data_root, 1)
        .await
        .unwrap();
    assert_eq!(report.table.len(), 5);
    assert_eq!(report.table.features().len(), rubric::FEATURE_COUNT);
    assert_eq!(report.completeness.missing_values, 0);
    assert!(report.videos_to_reprocess.is_empty());

    let combined = Combiner::new(config.aggregate.output_format)
        .combine(&data_root, 1)
        .unwrap();
    let per_video = fs::read_to_string(&combined.output_path).await.unwrap();
    let lines: Vec<&str> = per_video.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("video,Dominant,"));
    assert!(lines[0].ends_with(",frame_count"));
    assert!(lines[1].starts_with("clip,"));
    assert!(lines[1].ends_with(",5"));
}

#[tokio::test(start_paused = true)]
async fn test_rounds_average_across_identical_tables() {
    let temp_dir = TempDir::new().unwrap();
    let frames_root = temp_dir.path().join("frames");
    let data_root = temp_dir.path().join("data");
    write_frames(&frames_root.join("clip"), 2).await;

    let config = ConfigBuilder::new()
        .with_retry(RetryConfig {
            inter_frame_delay_secs: 0.0,
            ..RetryConfig::default()
        })
        .with_number_of_files(2)
        .build();

    for round in 1..=2 {
        // fresh counter so both rounds produce identical scores
        let rater = FrameRater::new(
            Box::new(RubricClient {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            config.rating.clone(),
        );
        rater
            .run_round(&frames_root, &dataset_dir(&data_root, round), round)
            .await
            .unwrap();
        ResultExtractor::new(config.results.clone())
            .extract(&data_root, round)
            .await
            .unwrap();
        Combiner::new(OutputFormat::PerFrame)
            .combine(&data_root, round)
            .unwrap();
    }

    let input_dir = data_root.join("average").join("input");
    let output_dir = data_root.join("average").join("output");
    let summary = CombinationAverager::new(&config.aggregate)
        .run(&input_dir, &output_dir)
        .unwrap();
    assert_eq!(summary.outputs.len(), 3);

    let single = FeatureTable::read_csv(&input_dir.join("final_output_1_per_frame.csv")).unwrap();
    let both = FeatureTable::read_csv(&output_dir.join("output_average_2_files_1_2.csv")).unwrap();
    assert_eq!(both, single);

    // a third table breaks the expected file count
    fs::copy(
        input_dir.join("final_output_1_per_frame.csv"),
        input_dir.join("final_output_3_per_frame.csv"),
    )
    .await
    .unwrap();
    assert_err!(CombinationAverager::new(&config.aggregate).run(&input_dir, &output_dir));
}

#[tokio::test(start_paused = true)]
async fn test_frames_are_paced_without_trailing_pause() {
    let temp_dir = TempDir::new().unwrap();
    let frames_root = temp_dir.path().join("frames");
    write_frames(&frames_root.join("clip"), 3).await;

    let config = ConfigBuilder::new().build();
    assert_eq!(config.rating.retry.inter_frame_delay(), Duration::from_secs(2));

    let rater = FrameRater::new(
        Box::new(RubricClient {
            calls: Arc::new(AtomicUsize::new(0)),
        }),
        config.rating.clone(),
    );

    let start = tokio::time::Instant::now();
    let round = rater
        .run_round(&frames_root, &dataset_dir(temp_dir.path(), 1), 1)
        .await
        .unwrap();

    // two pauses between three frames, none after the last
    assert_eq!(round.frames_rated, 3);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(4), "paused for {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "paused for {:?}", elapsed);
}

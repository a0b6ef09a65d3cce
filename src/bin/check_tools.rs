use anyhow::Result;
use clap::{Arg, Command};
use frame_rating_pipeline::{rubric, Config, VideoProcessor, WhisperCli};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("frame_rating_pipeline=info,check_tools=info")
        .init();

    let matches = Command::new("check-tools")
        .about("Report which external tools the frame rating pipeline can use")
        .arg(
            Arg::new("write-config")
                .long("write-config")
                .value_name("FILE")
                .help("Write the effective configuration as TOML"),
        )
        .get_matches();

    info!("🔍 Checking pipeline tool availability...");

    if VideoProcessor::check_availability().await {
        info!("✅ ffmpeg and ffprobe available");
    } else {
        info!("❌ ffmpeg or ffprobe not found");
        info!("💡 Frame extraction needs ffmpeg: https://ffmpeg.org/download.html");
    }

    match WhisperCli::check_availability().await {
        Ok(backend_info) => info!("✅ {}", backend_info),
        Err(e) => {
            info!("❌ {}", e);
            info!("💡 Recommendation: Install whisper.cpp for best performance:");
            info!("   git clone https://github.com/ggerganov/whisper.cpp.git");
            info!("   cd whisper.cpp && make -j");
            info!("   # Download models: ./models/download-ggml-model.sh base");
        }
    }

    let config = Config::load()?;
    info!("📋 {}", config.summary());
    match config.validate() {
        Ok(()) => info!("✅ Configuration is valid"),
        Err(e) => info!("❌ Configuration problem: {}", e),
    }

    let prompt = rubric::build_prompt();
    info!(
        "📚 Rubric: {} features, prompt is {} characters",
        rubric::FEATURE_COUNT,
        prompt.len()
    );

    if let Some(path) = matches.get_one::<String>("write-config") {
        config.save(path)?;
    }

    Ok(())
}

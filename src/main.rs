//! streampack entrypoint

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streampack::adapters::{DeliverySink, FfmpegTranscoder, StatusSink, TelegramConfig, TelegramSink};
use streampack::config::Config;
use streampack::core::PipelineOrchestrator;

/// Batch media ingestion pipeline
#[derive(Parser)]
#[command(name = "streampack", version, about)]
struct Args {
    /// Manifest file with one `<title>:<url>` entry per line
    manifest: PathBuf,

    /// Bot token for the delivery channel
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: String,

    /// Chat the videos and archives are delivered to
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    chat_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    let manifest_text = tokio::fs::read_to_string(&args.manifest)
        .await
        .with_context(|| format!("Failed to read manifest: {}", args.manifest.display()))?;

    let telegram = Arc::new(TelegramSink::from_config(TelegramConfig {
        bot_token: args.bot_token,
        chat_id: args.chat_id,
        max_upload_bytes: config.max_upload_bytes,
    }));
    let delivery: Arc<dyn DeliverySink> = telegram.clone();
    let status: Arc<dyn StatusSink> = telegram;
    let transcoder = Arc::new(FfmpegTranscoder::with_binary_path(&config.ffmpeg_path));

    let orchestrator = PipelineOrchestrator::new(config, transcoder, delivery, status);

    // Ctrl-C stops dispatch of new jobs; in-flight work finishes or times
    // out and cleanup still runs.
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested");
            cancel.cancel();
        }
    });

    let summary = orchestrator.run(&manifest_text).await?;

    info!(
        attempted = summary.totals.attempted,
        succeeded = summary.totals.succeeded,
        failed = summary.totals.failed,
        archives_delivered = summary.archives_delivered,
        archives_failed = summary.archives_failed,
        "done"
    );

    Ok(())
}

// soma-streamer: reads camera streams, detects faces in micro-batches and
// publishes cropped faces

use anyhow::Context;
use clap::Parser;
use soma_streamer::{init_tracing, wait_for_shutdown, Cli, Command};
use soma_stream::backends::{OpenCvOpener, YuNetWorker};
use soma_stream::{publisher_from_config, Streamer};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    let config = cli.load_config()?;

    if cli.command() == Command::Check {
        println!("{}", serde_json::to_string_pretty(&config)?);
        info!(streams = config.streams.len(), "Configuration is valid");
        return Ok(());
    }

    info!(
        streams = config.streams.len(),
        batch_size = config.effective_batch_size(),
        batch_wait_ms = config.detector.batch_wait_ms,
        "Starting soma streamer"
    );

    let worker = YuNetWorker::new(&config.detector).context("failed to load face detector")?;
    let publisher = publisher_from_config(&config.publisher);
    let streamer = Streamer::start(&config, Arc::new(OpenCvOpener), worker, publisher)
        .context("failed to start streamer")?;

    wait_for_shutdown().await;

    let started = Instant::now();
    let stats = streamer.scheduler_stats();
    streamer.shutdown().await;
    info!(
        batches = stats.batches,
        frames = stats.frames,
        failed_batches = stats.failed_batches,
        shutdown_ms = started.elapsed().as_millis() as u64,
        "Soma streamer stopped"
    );
    Ok(())
}

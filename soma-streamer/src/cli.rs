//! Command line interface

use anyhow::Context;
use clap::{Parser, Subcommand};
use soma_core::{FrameSize, StreamerConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "soma-streamer")]
#[command(about = "Detect faces in live camera streams", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true, default_value = "soma.yaml")]
    pub config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Override detector.batch_wait_ms
    #[arg(long, global = true)]
    pub batch_wait_ms: Option<u64>,

    /// Override detector.frame_size, as WIDTHxHEIGHT
    #[arg(long, global = true)]
    pub frame_size: Option<FrameSize>,

    /// Override publisher.photo_dir
    #[arg(long, global = true)]
    pub photo_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the streamer until interrupted (default)
    Run,
    /// Validate the configuration and print it
    Check,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    /// Load the configuration file, apply command line overrides and validate.
    pub fn load_config(&self) -> anyhow::Result<StreamerConfig> {
        let mut config = StreamerConfig::from_file(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(wait) = self.batch_wait_ms {
            config.detector.batch_wait_ms = wait;
        }
        if let Some(size) = self.frame_size {
            config.detector.frame_size = size;
        }
        if let Some(dir) = &self.photo_dir {
            config.publisher.photo_dir = Some(dir.clone());
        }
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", self.config.display()))?;
        Ok(config)
    }
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};

/// Command-line arguments for the usage-log worker.
#[derive(Debug, Parser)]
#[command(
    name = "llmgateway-worker",
    version,
    about = "Drains gateway usage records into SQLite"
)]
pub(crate) struct WorkerCliArgs {
    /// Cache/queue settings file (`.json`, otherwise TOML).
    #[arg(long, env = "LLMGATEWAY_CONFIG", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Redis connection URL. Falls back to `REDIS_URL`.
    #[arg(long = "redis", env = "LLMGATEWAY_REDIS_URL", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Overrides `redis_prefix` from the config file.
    #[arg(long, value_name = "PREFIX")]
    pub redis_prefix: Option<String>,

    /// SQLite database holding projects, keys and the usage log.
    #[arg(long = "sqlite", env = "LLMGATEWAY_SQLITE_PATH", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub sqlite_path: PathBuf,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json_logs: bool,

    /// Export spans over OTLP/HTTP.
    #[cfg(feature = "otel")]
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub otel: bool,

    #[cfg(feature = "otel")]
    #[arg(long, value_name = "URL", requires = "otel")]
    pub otel_endpoint: Option<String>,

    #[command(subcommand)]
    pub command: WorkerCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub(crate) enum WorkerCommand {
    /// Check Redis and SQLite connectivity and print a health report.
    Ping,
    /// Move queued usage records into the `log` table.
    Drain(DrainArgs),
}

#[derive(Debug, Args, Clone)]
pub(crate) struct DrainArgs {
    /// Records per batch. Defaults to `drain_batch_size` from the config.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub max: Option<usize>,

    /// Keep polling with this pause between empty batches instead of exiting
    /// once the queue is empty.
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub loop_interval_ms: Option<u64>,
}

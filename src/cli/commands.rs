//! Operator CLI for the interview queue.
//!
//! Every command talks to the log store directly; none of them needs the
//! AI services, so they can run next to a live pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::QueueConfig;
use crate::metrics::{export_metrics, init_metrics};
use crate::monitor::StreamMonitor;
use crate::queue::RequestEnqueuer;
use crate::stream::{GroupStart, LogStore, RedisLogStore};

/// Operate the AI request and response streams.
#[derive(Parser, Debug)]
#[command(name = "interview-queue")]
#[command(about = "Inspect and repair the interview AI queue streams")]
#[command(version)]
#[command(
    long_about = "interview-queue inspects and repairs the Redis streams that carry AI work requests and client responses.\n\nExample usage:\n  interview-queue status\n  interview-queue requeue-pending ai:requests ai-service-group --min-idle-secs 600"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// YAML configuration file; environment variables override it.
    #[arg(short, long, global = true, env = "QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Redis URL, overriding the configuration.
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Print a health snapshot as JSON.
    Status,

    /// Recreate missing consumer groups and sample depths now.
    Check,

    /// Trim both streams by age and retained count.
    Trim,

    /// Acknowledge every pending entry of a group, dropping that work.
    AckPending(GroupArgs),

    /// Destroy and recreate a consumer group.
    ResetGroup(ResetGroupArgs),

    /// Republish pending entries that have been idle for a while.
    RequeuePending(RequeueArgs),

    /// Enqueue an opening-question request (smoke test).
    EnqueueQuestion(EnqueueQuestionArgs),

    /// Run the scheduled monitor duties until Ctrl-C.
    Monitor,

    /// Sample the streams once and print Prometheus metrics.
    Metrics,
}

/// A consumer group on a stream.
#[derive(Parser, Debug)]
pub struct GroupArgs {
    pub stream: String,
    pub group: String,
}

/// Arguments for `interview-queue reset-group`.
#[derive(Parser, Debug)]
pub struct ResetGroupArgs {
    #[command(flatten)]
    pub target: GroupArgs,

    /// Redeliver every retained record instead of skipping the backlog.
    #[arg(long)]
    pub from_beginning: bool,
}

/// Arguments for `interview-queue requeue-pending`.
#[derive(Parser, Debug)]
pub struct RequeueArgs {
    #[command(flatten)]
    pub target: GroupArgs,

    /// Only requeue entries idle for at least this many seconds.
    #[arg(long, default_value = "300")]
    pub min_idle_secs: u64,
}

/// Arguments for `interview-queue enqueue-question`.
#[derive(Parser, Debug)]
pub struct EnqueueQuestionArgs {
    pub session_id: i64,
    pub question_id: i64,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let store: Arc<dyn LogStore> = Arc::new(
        RedisLogStore::connect(&config.redis_url)
            .await
            .with_context(|| format!("Failed to connect to {}", config.redis_url))?,
    );
    let monitor = Arc::new(StreamMonitor::new(Arc::clone(&store), config.clone()));

    match cli.command {
        Commands::Status => {
            let snapshot = monitor.health_snapshot().await?;
            print_json(&snapshot)?;
        }
        Commands::Check => {
            let snapshot = monitor.trigger_manual_check().await?;
            print_json(&snapshot)?;
        }
        Commands::Trim => {
            let reports = monitor.trim_streams().await?;
            print_json(&reports)?;
        }
        Commands::AckPending(args) => {
            let acked = monitor
                .acknowledge_all_pending(&args.stream, &args.group)
                .await?;
            println!("Acknowledged {acked} pending entries on {}/{}", args.stream, args.group);
        }
        Commands::ResetGroup(args) => {
            let start = if args.from_beginning {
                GroupStart::Beginning
            } else {
                GroupStart::Latest
            };
            monitor
                .reset_group(&args.target.stream, &args.target.group, start)
                .await?;
            println!(
                "Reset {}/{} to {}",
                args.target.stream,
                args.target.group,
                start.as_offset()
            );
        }
        Commands::RequeuePending(args) => {
            let report = monitor
                .requeue_stale_pending(
                    &args.target.stream,
                    &args.target.group,
                    Duration::from_secs(args.min_idle_secs),
                )
                .await?;
            print_json(&report)?;
        }
        Commands::EnqueueQuestion(args) => {
            let requests = RequestEnqueuer::new(Arc::clone(&store), &config);
            match requests
                .request_opening_question(args.session_id, args.question_id)
                .await?
            {
                Some(message_id) => println!("Enqueued {message_id}"),
                None => println!("Question generation is disabled, nothing enqueued"),
            }
        }
        Commands::Monitor => run_monitor(monitor).await?,
        Commands::Metrics => {
            init_metrics().context("Failed to register metrics")?;
            monitor.sample_depths().await?;
            print!("{}", export_metrics());
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = QueueConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    if let Some(url) = &cli.redis_url {
        config = config.with_redis_url(url.clone());
    }
    Ok(config)
}

async fn run_monitor(monitor: Arc<StreamMonitor>) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics registration failed");
    }
    monitor.trigger_manual_check().await?;
    monitor.start();
    info!("Monitoring streams, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    monitor.shutdown().await;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reset_group() {
        let cli = Cli::try_parse_from([
            "interview-queue",
            "reset-group",
            "ai:requests",
            "ai-service-group",
            "--from-beginning",
        ])
        .expect("parse");
        match cli.command {
            Commands::ResetGroup(args) => {
                assert_eq!(args.target.stream, "ai:requests");
                assert_eq!(args.target.group, "ai-service-group");
                assert!(args.from_beginning);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_requeue_defaults() {
        let cli = Cli::try_parse_from([
            "interview-queue",
            "requeue-pending",
            "ai:responses",
            "websocket-response-group",
            "--log-level",
            "debug",
        ])
        .expect("parse");
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::RequeuePending(args) => assert_eq!(args.min_idle_secs, 300),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_redis_url_flag_overrides_config() {
        let cli = Cli::try_parse_from([
            "interview-queue",
            "status",
            "--redis-url",
            "redis://cache:6380",
        ])
        .expect("parse");
        let config = load_config(&cli).expect("config");
        assert_eq!(config.redis_url, "redis://cache:6380");
    }

    #[test]
    fn test_enqueue_question_requires_ids() {
        assert!(Cli::try_parse_from(["interview-queue", "enqueue-question", "42"]).is_err());
    }
}

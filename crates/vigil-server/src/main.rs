//! vigil - metrics alerting pipeline
//!
//! Reads `name value timestamp` lines on stdin, evaluates threshold
//! triggers and delivers state change notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_events::{EventStore, LogSender, NotificationQueue};
use vigil_server::{LoggingSection, Pipeline, ServerConfig, init_tracing};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Vigil metrics alerting pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline, reading metric lines from stdin
    Run {
        /// Path to config file
        #[arg(short, long, env = "VIGIL_CONFIG", default_value = "/etc/vigil/vigil.toml")]
        config: PathBuf,

        /// Write the final pipeline counters (Prometheus text) here on exit
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/vigil/vigil.toml")]
        output: PathBuf,
    },

    /// Queue a test notification (server must be stopped)
    #[command(group(ArgGroup::new("target").required(true).args(["subscription", "contact"])))]
    SendTest {
        /// Path to config file
        #[arg(short, long, env = "VIGIL_CONFIG", default_value = "/etc/vigil/vigil.toml")]
        config: PathBuf,

        /// Subscription to test
        #[arg(long)]
        subscription: Option<String>,

        /// Contact to test
        #[arg(long)]
        contact: Option<String>,
    },

    /// Print a trigger's event history, newest first (server must be stopped)
    History {
        /// Path to config file
        #[arg(short, long, env = "VIGIL_CONFIG", default_value = "/etc/vigil/vigil.toml")]
        config: PathBuf,

        /// Trigger id
        #[arg(long)]
        trigger: String,

        /// Offset of the first event
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Number of events
        #[arg(long, default_value_t = 20)]
        size: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, metrics_file } => {
            run(config, metrics_file).await?;
        }

        Commands::InitConfig { output } => {
            init_tracing(&LoggingSection::default())?;
            init_config(&output)?;
        }

        Commands::SendTest {
            config,
            subscription,
            contact,
        } => {
            init_tracing(&LoggingSection::default())?;
            send_test(&config, subscription, contact)?;
        }

        Commands::History {
            config,
            trigger,
            start,
            size,
        } => {
            init_tracing(&LoggingSection::default())?;
            history(&config, &trigger, start, size)?;
        }
    }

    Ok(())
}

async fn run(config_path: PathBuf, metrics_file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = ServerConfig::from_file(&config_path)?;
    init_tracing(&config.logging)?;
    info!(config = %config_path.display(), "starting vigil");

    let pipeline = Pipeline::start(&config, Arc::new(LogSender))?;

    let stop = CancellationToken::new();
    let on_signal = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("interrupt received");
        on_signal.cancel();
    });

    let stats = pipeline.ingest(BufReader::new(tokio::io::stdin()), &stop).await?;
    info!(
        lines = stats.lines,
        matched = stats.matched,
        invalid = stats.invalid,
        "input closed"
    );

    let report = pipeline.shutdown().await?;
    info!(
        delivered = report.delivered,
        pending = report.pending,
        "vigil stopped"
    );

    if let Some(path) = metrics_file {
        std::fs::write(&path, &report.metrics)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "final counters written");
    }
    Ok(())
}

fn open_queue(config_path: &Path) -> anyhow::Result<NotificationQueue> {
    let config = ServerConfig::from_file(config_path)?;
    if config.events.journal_path.is_none() {
        anyhow::bail!("events.journal_path is not set; nothing to open");
    }

    let store = EventStore::open(&config.store_config()).context("failed to open event journal")?;
    Ok(NotificationQueue::with_config(Arc::new(store), config.queue_config()))
}

fn send_test(config_path: &Path, subscription: Option<String>, contact: Option<String>) -> anyhow::Result<()> {
    let queue = open_queue(config_path)?;

    match (subscription, contact) {
        (Some(subscription), _) => {
            queue.send_test_notification(&subscription)?;
            println!("Queued test notification for subscription {subscription}");
        }
        (None, Some(contact)) => {
            queue.send_test_contact_notification(&contact)?;
            println!("Queued test notification for contact {contact}");
        }
        (None, None) => anyhow::bail!("either --subscription or --contact is required"),
    }

    Ok(())
}

fn history(config_path: &Path, trigger: &str, start: usize, size: usize) -> anyhow::Result<()> {
    let queue = open_queue(config_path)?;
    let events = queue.range_by_trigger(trigger, start, size)?;

    if events.is_empty() {
        println!("No events for trigger {trigger}");
        return Ok(());
    }

    for event in events {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    ServerConfig::sample().save(output)?;

    println!("Config written to: {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config to define your triggers");
    println!("  2. Run: some-metrics-source | vigil run --config {}", output.display());
    println!("  3. Check delivery with: vigil send-test --subscription <id> --config {}", output.display());

    Ok(())
}

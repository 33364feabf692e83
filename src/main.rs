// queue-throttle - Main Entry Point
//
// CLI over the throttling library:
// - run: drain one queue at a given rate
// - cron: drain every enabled queue with its configured settings
// - enqueue: append a payload to a queue's spool file
// - units: list the supported time units
//
// Queues are in-memory, loaded from and written back to their spool files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use queue_throttle::config::Config;
use queue_throttle::{
    metrics, CommandWorker, MemoryQueue, Queue, QueueRegistry, QueueThrottleCron, ThrottleRate,
    ThrottledDrainer, TimeUnit,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// queue-throttle: rate-limited work-queue draining
#[derive(Parser, Debug)]
#[command(name = "queue-throttle")]
#[command(version)]
#[command(about = "Drain work queues under a fixed-window rate limit", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/queue-throttle/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics to stdout after the command
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drain a single queue at the given rate
    #[command(alias = "queue-throttle-run")]
    Run {
        /// Name of the queue
        name: String,

        /// Time limit in seconds (0 = until the queue is empty)
        #[arg(long)]
        time_limit: u64,

        /// Items per unit
        #[arg(long, allow_hyphen_values = true)]
        items: i64,

        /// Time unit (see `units`)
        #[arg(long, default_value = "second")]
        unit: String,

        /// Log every dispatched item
        #[arg(long)]
        detailed_logging: bool,
    },
    /// Drain every enabled queue once with its configured settings
    #[command(alias = "queue-throttle-cron")]
    Cron,
    /// Append a JSON payload to a queue's spool file
    Enqueue {
        /// Name of the queue
        name: String,

        /// Payload as JSON
        payload: String,
    },
    /// List supported time units
    Units,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let level = if args.verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    init_tracing(level, &config.logging.format);

    metrics::init().context("Failed to initialize metrics")?;

    let result = execute(args.command, Arc::new(config)).await;

    if args.print_metrics {
        print!("{}", metrics::gather_metrics()?);
    }

    result
}

fn init_tracing(level: Level, format: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
}

async fn execute(command: Commands, config: Arc<Config>) -> Result<()> {
    match command {
        Commands::Run {
            name,
            time_limit,
            items,
            unit,
            detailed_logging,
        } => {
            let rate = ThrottleRate::parse(items, &unit)?;
            let spools = SpoolSet::load(&config).await?;
            let drainer = ThrottledDrainer::new(spools.registry.clone());

            info!("Draining {} at {}", name, rate);
            let result = drainer.drain(&name, time_limit, &rate, detailed_logging).await;
            spools.save(Some(&name)).await?;

            if let Err(e) = &result {
                if e.is_suspended() {
                    warn!(queue = %name, "Remaining items kept in the spool");
                }
            }
            let summary = result?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Cron => {
            let spools = SpoolSet::load(&config).await?;
            let drainer = ThrottledDrainer::new(spools.registry.clone());
            let cron = QueueThrottleCron::new(config.clone(), drainer);

            let report = cron.run().await;
            spools.save(None).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.ran {
                anyhow::bail!("Queue throttle cron is already running");
            }
            let failed: Vec<&str> = report.failures().map(|r| r.queue.as_str()).collect();
            if !failed.is_empty() {
                anyhow::bail!("Queue throttle cron failed for: {}", failed.join(", "));
            }
        }
        Commands::Enqueue { name, payload } => {
            let settings = config
                .queues
                .get(&name)
                .with_context(|| format!("Queue '{}' is not configured", name))?;
            let spool = settings
                .spool
                .as_deref()
                .with_context(|| format!("Queue '{}' has no spool file", name))?;
            let data: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;

            let queue = MemoryQueue::load_jsonl(name.as_str(), spool).await?;
            let id = queue.create_item(data).await?;
            queue.save_jsonl(spool).await?;
            info!(queue = %name, "Queued item {}", id);
            println!("{}", queue.len().await);
        }
        Commands::Units => {
            for unit in TimeUnit::ALL {
                println!("{:<12} {}", unit, unit.seconds());
            }
        }
    }

    Ok(())
}

/// Spool-backed queues built from the configuration
struct SpoolSet {
    registry: Arc<QueueRegistry>,
    spools: Vec<(String, MemoryQueue, PathBuf)>,
}

impl SpoolSet {
    /// Register every configured queue that has a worker command
    async fn load(config: &Config) -> Result<Self> {
        let mut registry = QueueRegistry::new();
        let mut spools = Vec::new();

        for (name, settings) in &config.queues {
            if settings.command.is_empty() {
                debug!(queue = %name, "No worker command configured, skipping");
                continue;
            }

            let worker = CommandWorker::new(&settings.command)
                .with_context(|| format!("Invalid worker command for queue '{}'", name))?;
            let queue = match &settings.spool {
                Some(path) => load_spool(name, path).await?,
                None => MemoryQueue::new(name.as_str()),
            };

            if let Some(path) = &settings.spool {
                spools.push((name.clone(), queue.clone(), path.clone()));
            }
            registry.register(name.as_str(), Arc::new(queue), Arc::new(worker));
        }

        Ok(Self {
            registry: Arc::new(registry),
            spools,
        })
    }

    /// Write remaining items back; `only` limits it to one queue
    async fn save(&self, only: Option<&str>) -> Result<()> {
        for (name, queue, path) in &self.spools {
            if only.is_some_and(|only| only != name) {
                continue;
            }
            queue
                .save_jsonl(path)
                .await
                .with_context(|| format!("Failed to write spool for queue '{}' to {:?}", name, path))?;
        }
        Ok(())
    }
}

async fn load_spool(name: &str, path: &Path) -> Result<MemoryQueue> {
    MemoryQueue::load_jsonl(name, path)
        .await
        .with_context(|| format!("Failed to load spool for queue '{}' from {:?}", name, path))
}

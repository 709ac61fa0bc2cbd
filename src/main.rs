//! kronos - persistent job scheduler demo.
//!
//! Usage:
//!   kronos run [--config FILE]    Run a scheduler with a demo job until Ctrl+C
//!   kronos check-config FILE      Validate a scheduler configuration file

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use kronos::{
    Event, EventBus, EventHandler, Job, JobParams, Periodic, ScheduleRequest, Scheduler,
    SchedulerConfig, Start,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// kronos - persistent job scheduling
#[derive(Parser)]
#[command(name = "kronos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheduler with a demo job until interrupted
    Run {
        /// Path to a scheduler configuration file (default: in-memory store)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Delay before the one-time demo run, in minutes
        #[arg(long, default_value = "1")]
        delay_minutes: u64,
    },

    /// Validate a scheduler configuration file
    CheckConfig {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

/// Demo job that logs its cycle number and params.
struct SayHello;

#[async_trait]
impl Job for SayHello {
    fn name(&self) -> &str {
        "say-hello"
    }

    fn retries(&self) -> u32 {
        1
    }

    async fn execute(&self, cycle_number: u32, params: &JobParams) -> bool {
        let who = params.get("who").unwrap_or("world");
        info!("Hello, {}! (cycle {})", who, cycle_number);
        true
    }

    fn on_fail(&self, cycle_number: u32, _params: &JobParams) {
        warn!("say-hello failed on cycle {}", cycle_number);
    }
}

/// Logs engine events.
struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobCompleted {
                record_id,
                job_name,
                success,
                attempts,
                duration,
                ..
            } => {
                if *success {
                    info!(
                        "Job '{}' completed in {:?} (record: {}, attempts: {})",
                        job_name, duration, record_id, attempts
                    );
                } else {
                    error!(
                        "Job '{}' failed after {} attempt(s) (record: {})",
                        job_name, attempts, record_id
                    );
                }
            }
            Event::JobRescheduled {
                job_name, next_id, ..
            } => {
                info!("Job '{}' rescheduled as {}", job_name, next_id);
            }
            Event::JobOvershot {
                job_name, action, ..
            } => {
                warn!("Job '{}' overshot its deadline ({:?})", job_name, action);
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            delay_minutes,
        } => {
            run_scheduler(config, delay_minutes).await?;
        }
        Commands::CheckConfig { path } => {
            check_config(path)?;
        }
    }

    Ok(())
}

async fn run_scheduler(
    config: Option<PathBuf>,
    delay_minutes: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            SchedulerConfig::from_file(&path)?
        }
        None => SchedulerConfig::default(),
    };

    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let scheduler = Scheduler::new().with_event_bus(event_bus);
    scheduler.init_from_config(config).await?;
    scheduler.register(Arc::new(SayHello))?;

    let once = scheduler
        .schedule(
            ScheduleRequest::new("say-hello")
                .with_start(Start::After(start_delay(delay_minutes)))
                .with_param("who", "once"),
        )
        .await?;
    info!("Scheduled one-time run {}", once);

    let periodic = scheduler
        .schedule_periodic(
            ScheduleRequest::new("say-hello").with_param("who", "every minute"),
            Periodic::every_minute(),
        )
        .await?;
    info!("Scheduled periodic run {}", periodic);

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    scheduler.shutdown().await?;
    Ok(())
}

/// Clamps oversized values instead of wrapping.
fn start_delay(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

fn check_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match SchedulerConfig::from_file(&path) {
        Ok(config) => {
            println!("{}: OK", path.display());
            println!("  Namespace: {}", config.namespace);
            println!("  Poll interval: {:?}", config.poll_interval);
            println!("  Poll mode: {:?}", config.poll_mode);
            println!("  Storage: {:?}", config.storage);
            println!(
                "  Cache: {}",
                if config.cache.enabled {
                    format!("lru ({} entries)", config.cache.capacity)
                } else {
                    "disabled".to_string()
                }
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

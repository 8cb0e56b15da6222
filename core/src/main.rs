use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{check_stores, queue_obliterate, queue_stats, run_demo, run_producer, run_worker};

#[derive(Parser)]
#[command(name = "fenceq")]
#[command(version)]
#[command(about = "Durable job queue with quorum-locked workers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Enqueue a batch of demo jobs at the configured pace.
    Produce {
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        count: Option<u64>,
        /// Obliterate the queue before producing.
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Producer and worker in one process, until the queue drains.
    Demo {
        #[arg(long)]
        config: Option<String>,
        /// How long each job holds the lock, in milliseconds.
        #[arg(long, default_value_t = 5_000)]
        hold_ms: u64,
    },
    #[command(alias = "health")]
    Check {
        #[arg(long)]
        config: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    Run {
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// How long each job holds the lock, in milliseconds.
        #[arg(long, default_value_t = 5_000)]
        hold_ms: u64,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    Stats {
        #[arg(long)]
        config: Option<String>,
    },
    Obliterate {
        #[arg(long)]
        config: Option<String>,
        /// Discard active jobs instead of refusing.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

async fn dispatch_command(command: Commands) -> Result<()> {
    match command {
        Commands::Worker { command } => match command {
            WorkerCommand::Run {
                config,
                concurrency,
                hold_ms,
            } => {
                run_worker(config, concurrency, hold_ms).await?;
            }
        },
        Commands::Produce {
            config,
            count,
            fresh,
        } => {
            run_producer(config, count, fresh).await?;
        }
        Commands::Queue { command } => match command {
            QueueCommand::Stats { config } => {
                queue_stats(config).await?;
            }
            QueueCommand::Obliterate { config, force } => {
                queue_obliterate(config, force).await?;
            }
        },
        Commands::Demo { config, hold_ms } => {
            run_demo(config, hold_ms).await?;
        }
        Commands::Check { config } => {
            check_stores(config).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    fenceq::telemetry::init_tracing();
    let cli = Cli::parse();
    dispatch_command(cli.command).await
}

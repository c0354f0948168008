//! taskgridd: the taskgrid daemon.
//!
//! Assembles the scheduling core around a simulated execution layer:
//! - Profile store (redb) and JSON profile snapshot
//! - Task scheduler with its worker pool
//! - Schedule optimizer loop
//! - Pool scaler driving elastic workers
//!
//! # Usage
//!
//! ```text
//! taskgridd scaffold --cpus 8 --output taskgrid.toml
//! taskgridd run --config taskgrid.toml --tasks 200 --task-ms 50
//! taskgridd profiles --db /var/lib/taskgrid/profiles.redb
//! ```

mod daemon;
mod simulate;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use taskgrid_core::config::{LoggingConfig, TaskgridConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::daemon::Workload;

#[derive(Parser)]
#[command(name = "taskgridd", about = "taskgrid scheduling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until the submitted workload settles.
    Run {
        /// Configuration file.
        #[arg(long, default_value = "taskgrid.toml")]
        config: PathBuf,

        /// Number of tasks to submit, spread over the configured cores.
        #[arg(long, default_value = "0")]
        tasks: usize,

        /// Make every task depend on the previous one.
        #[arg(long)]
        chain: bool,

        /// Simulated execution time of one task, in milliseconds.
        #[arg(long, default_value = "50")]
        task_ms: u64,

        /// Simulated boot time of an elastic worker, in milliseconds.
        #[arg(long, default_value = "500")]
        boot_ms: u64,
    },

    /// Write a starter configuration.
    Scaffold {
        #[arg(long, default_value = "local")]
        worker: String,

        #[arg(long, default_value = "4")]
        cpus: u32,

        #[arg(long, default_value = "taskgrid.toml")]
        output: PathBuf,
    },

    /// Dump the profiles held in a profile database as JSON.
    Profiles {
        #[arg(long)]
        db: PathBuf,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            tasks,
            chain,
            task_ms,
            boot_ms,
        } => {
            let cfg = TaskgridConfig::from_file(&config)?;
            init_tracing(&cfg.logging);
            info!(path = %config.display(), "taskgrid daemon starting");

            let workload = Workload {
                tasks,
                chain,
                task_time: Duration::from_millis(task_ms),
                boot_time: Duration::from_millis(boot_ms),
            };
            let summary = daemon::run(cfg, workload, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("received shutdown signal");
            })
            .await?;
            info!(finished = summary.finished, failed = summary.failed, "taskgrid daemon stopped");
            Ok(())
        }
        Command::Scaffold { worker, cpus, output } => {
            init_tracing(&LoggingConfig::default());
            let cfg = TaskgridConfig::scaffold(&worker, cpus);
            std::fs::write(&output, cfg.to_toml_string()?)?;
            info!(path = %output.display(), "configuration written");
            Ok(())
        }
        Command::Profiles { db } => {
            println!("{}", daemon::export_profiles(&db)?);
            Ok(())
        }
    }
}

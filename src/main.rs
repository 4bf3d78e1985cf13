//! firefleet CLI: run the built-in demo or a scenario loaded from files.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use firefleet::config::SimConfig;
use firefleet::logging::init_logging;
use firefleet::sim;

#[derive(Parser)]
#[command(name = "firefleet")]
#[command(about = "Fire-fighting drone fleet dispatcher simulation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Command {
    /// Built-in scenario with one event per fault kind (default)
    Demo,
    /// Run zones and incidents from CSV files
    Run {
        /// Zone file: header, then `id,(x1;y1),(x2;y2)` rows
        #[arg(long)]
        zones: PathBuf,

        /// Incident file: header, then `time,zone,type,severity[,fault]` rows
        #[arg(long)]
        events: PathBuf,
    },
}

#[derive(Args)]
struct Tuning {
    /// Number of drones in the fleet
    #[arg(long, global = true)]
    drones: Option<u32>,

    /// Wall-clock milliseconds per simulated second
    #[arg(long, global = true)]
    tick_ms: Option<u64>,

    /// Delay between submissions from one incident feed, in milliseconds
    #[arg(long, global = true)]
    pacing_ms: Option<u64>,

    /// Reply timeout before a call is retransmitted, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

impl Tuning {
    fn apply(&self, mut config: SimConfig) -> SimConfig {
        if let Some(drones) = self.drones {
            config = config.with_drones(drones);
        }
        if let Some(ms) = self.tick_ms {
            config = config.with_tick(Duration::from_millis(ms));
        }
        if let Some(ms) = self.pacing_ms {
            config = config.with_producer_pacing(Duration::from_millis(ms));
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_reply_timeout(Duration::from_millis(ms));
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let (title, result) = match cli.command.unwrap_or(Command::Demo) {
        Command::Demo => {
            let config = cli.tuning.apply(SimConfig::demo());
            ("DEMO SUMMARY", sim::run_demo(&config))
        }
        Command::Run { zones, events } => {
            let config = cli.tuning.apply(SimConfig::default());
            ("RUN SUMMARY", sim::run_from_files(&zones, &events, &config))
        }
    };

    match result {
        Ok(summary) => summary.print(title),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

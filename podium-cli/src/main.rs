//! Podium Command Line Interface
//!
//! Usage:
//!   podium submit <player> <score>   - Accept a score for the current day
//!   podium finalize --day <id>       - Request finalization of a day
//!   podium finalize --yesterday      - Finalize the day before today (rollover)
//!   podium worker                    - Run one reconciliation pass
//!   podium status                    - Show commit queue state
//!   podium leaderboard               - Show a day's leaderboard
//!   podium day-info                  - Show ledger state and prize preview
//!
//! Configuration comes from `PODIUM_*` environment variables.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "podium")]
#[command(about = "Podium daily leaderboard anchoring CLI")]
#[command(version)]
pub struct Cli {
    /// sled database directory (overrides PODIUM_DATA_DIR)
    #[arg(long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept a score for the current day
    Submit {
        /// Player address (0x + 40 hex)
        player: String,
        /// Raw score
        score: i64,
        /// Day id (YYYYMMDD) for backfill, defaults to the current day
        #[arg(short, long)]
        day: Option<i64>,
    },

    /// Request finalization of a day
    Finalize {
        /// Day id (YYYYMMDD)
        #[arg(short, long, conflicts_with = "yesterday")]
        day: Option<i64>,
        /// Finalize the day before today
        #[arg(long)]
        yesterday: bool,
    },

    /// Run one reconciliation pass over the commit queue
    Worker {
        /// Wall-clock limit in seconds (defaults to PODIUM_WORKER_DEADLINE)
        #[arg(long)]
        deadline: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show commit queue state
    Status {
        /// Only list commits of this day
        #[arg(short, long)]
        day: Option<i64>,
    },

    /// Show the leaderboard of a day
    Leaderboard {
        /// Day id (YYYYMMDD), defaults to the current day
        #[arg(short, long)]
        day: Option<i64>,
        /// Number of entries
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show ledger state and the prize split of a day
    DayInfo {
        /// Day id (YYYYMMDD), defaults to the current day
        #[arg(short, long)]
        day: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Err(e) = commands::run_command(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

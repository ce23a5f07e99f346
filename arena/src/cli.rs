use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arena", version, about = "Continuous UGI engine tournament")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bootstrap the database schema
    InitDb,

    /// Load engines from the configuration file into the database
    LoadConfig {
        /// Configuration file (default: ENGINES_CONFIG or engines.json)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Update rating and description of engines that already exist
        #[arg(long)]
        replace: bool,
    },

    /// Run the continuous tournament until interrupted
    RunTournament {
        /// Stop after this many match sets
        #[arg(long)]
        rounds: Option<u64>,
        /// Exclude a pair once it has accumulated this many games
        #[arg(long)]
        pairs: Option<i64>,
        /// Concurrent match sets
        #[arg(long)]
        concurrency: Option<usize>,
        /// Time control, "base+increment" in seconds
        #[arg(long)]
        time_control: Option<String>,
    },

    /// Play one game between two engines by id
    PlayGame {
        #[arg(long)]
        engine1: i64,
        #[arg(long)]
        engine2: i64,
        /// Time control, "base+increment" in seconds
        #[arg(long)]
        time_control: Option<String>,
    },

    /// Show the rating table
    Rankings {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Include win/loss/draw breakdowns
        #[arg(long)]
        detailed: bool,
    },

    /// List engines known to the database
    ListEngines,

    /// Check that the database is reachable
    TestDb,
}

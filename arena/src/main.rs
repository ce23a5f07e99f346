mod cli;
mod commands;
mod config;
mod persistence;

use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::InitDb => commands::init_db().await,
        Command::LoadConfig { file, replace } => commands::load_config(file, replace).await,
        Command::RunTournament {
            rounds,
            pairs,
            concurrency,
            time_control,
        } => commands::run_tournament(rounds, pairs, concurrency, time_control).await,
        Command::PlayGame {
            engine1,
            engine2,
            time_control,
        } => commands::play_game(engine1, engine2, time_control).await,
        Command::Rankings { limit, detailed } => commands::rankings(limit, detailed).await,
        Command::ListEngines => commands::list_engines().await,
        Command::TestDb => commands::test_db().await,
    }
}

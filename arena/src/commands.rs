//! Implementations behind the CLI subcommands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use tournament::elo::EloUpdater;
use tournament::runner::{Connector, UgiConnector};
use tournament::scheduler::{Scheduler, SchedulerConfig};
use tournament::store::EngineStore;
use tournament::types::{
    Color, GameOutcome, MatchSetResult, StartingPosition, TimeControl,
};

use crate::config::{self, ArenaConfig};
use crate::persistence::{Database, SqliteStore};

async fn open_store() -> anyhow::Result<(Database, SqliteStore)> {
    let path = config::default_db_path();
    let db = Database::open(&path)
        .await
        .with_context(|| format!("cannot open database {}", path.display()))?;
    let store = SqliteStore::new(db.pool().clone());
    Ok((db, store))
}

pub async fn init_db() -> anyhow::Result<()> {
    let path = config::default_db_path();
    Database::open(&path)
        .await
        .with_context(|| format!("cannot initialize database {}", path.display()))?;
    println!("Database initialized at {}", path.display());
    Ok(())
}

pub async fn test_db() -> anyhow::Result<()> {
    let (_db, store) = open_store().await?;
    let engines = store.list_engines().await?;
    let games = store.game_count().await?;
    println!("Database OK: {} engines, {} games", engines.len(), games);
    Ok(())
}

pub async fn load_config(file: Option<PathBuf>, replace: bool) -> anyhow::Result<()> {
    let config = ArenaConfig::load(file.as_deref())?;
    let (_db, store) = open_store().await?;

    let mut loaded = 0;
    for engine in config.enabled_engines() {
        let id = store
            .add_engine(
                &engine.name,
                engine.initial_rating,
                engine.description.as_deref(),
            )
            .await?;
        if replace {
            store
                .update_engine_meta(
                    &engine.name,
                    engine.initial_rating,
                    engine.description.as_deref(),
                )
                .await?;
        }
        tracing::debug!(engine = %engine.name, id, "Engine loaded");
        loaded += 1;
    }

    let skipped = config.engines.len() - loaded;
    println!("Loaded {} engine(s) ({} disabled, skipped)", loaded, skipped);
    Ok(())
}

pub async fn list_engines() -> anyhow::Result<()> {
    let (_db, store) = open_store().await?;
    let engines = store.list_engines().await?;
    if engines.is_empty() {
        println!("No engines in the database. Run load-config first.");
        return Ok(());
    }

    println!("{:<4} {:<24} {:>6} {:>7}  {}", "ID", "Name", "Elo", "Games", "Description");
    for e in engines {
        println!(
            "{:<4} {:<24} {:>6} {:>7}  {}",
            e.id, e.name, e.rating, e.games_played, e.description
        );
    }
    Ok(())
}

pub async fn rankings(limit: i64, detailed: bool) -> anyhow::Result<()> {
    let (_db, store) = open_store().await?;
    let engines = store.rankings(limit).await?;

    if detailed {
        println!(
            "{:<4} {:<24} {:>6} {:>7} {:>5} {:>5} {:>5}",
            "#", "Name", "Elo", "Games", "W", "L", "D"
        );
        for (rank, e) in engines.iter().enumerate() {
            println!(
                "{:<4} {:<24} {:>6} {:>7} {:>5} {:>5} {:>5}",
                rank + 1,
                e.name,
                e.rating,
                e.games_played,
                e.wins,
                e.losses,
                e.draws
            );
        }
    } else {
        println!("{:<4} {:<24} {:>6}", "#", "Name", "Elo");
        for (rank, e) in engines.iter().enumerate() {
            println!("{:<4} {:<24} {:>6}", rank + 1, e.name, e.rating);
        }
    }
    Ok(())
}

pub async fn play_game(
    engine1: i64,
    engine2: i64,
    time_control: Option<String>,
) -> anyhow::Result<()> {
    anyhow::ensure!(engine1 != engine2, "an engine cannot play itself");

    let config = ArenaConfig::load(None)?;
    let (_db, store) = open_store().await?;

    let detail1 = store
        .engine_by_id(engine1)
        .await?
        .with_context(|| format!("engine {} not found", engine1))?;
    let detail2 = store
        .engine_by_id(engine2)
        .await?
        .with_context(|| format!("engine {} not found", engine2))?;

    let spec_for = |detail: &crate::persistence::EngineDetail| {
        config
            .engines
            .iter()
            .find(|e| e.name == detail.name)
            .map(|entry| entry.spec(detail.id))
            .with_context(|| format!("no launch configuration for engine {:?}", detail.name))
    };
    let spec1 = spec_for(&detail1)?;
    let spec2 = spec_for(&detail2)?;

    let tc = resolve_time_control(time_control.as_deref(), &config)?;

    let connector = UgiConnector::default();
    let session1 = connector.connect(&spec1).await?;
    let session2 = match connector.connect(&spec2).await {
        Ok(session) => session,
        Err(e) => {
            session1.shutdown().await;
            return Err(e.into());
        }
    };

    let driver = tournament::GameDriver::new(tc);
    let position = StartingPosition {
        name: "initial".to_string(),
        ..Default::default()
    };
    let record = driver
        .play(session1, session2, &position, Color::White, "single-game")
        .await;

    // A single game still runs through the transactional update path,
    // as a one-game aggregate.
    let (score1, score2) = record.outcome.scores();
    let outcome = record.outcome;
    let moves = record.moves.len();
    let error = record.error.clone();
    let result = MatchSetResult {
        engine1_id: detail1.id,
        engine2_id: detail2.id,
        match_set: "single-game".to_string(),
        games: vec![record],
        engine1_score: score1,
        engine2_score: score2,
        completed: outcome != GameOutcome::Error,
    };
    let update = EloUpdater::new(store.clone()).record(&result).await?;

    match outcome {
        GameOutcome::Win => println!("{} wins in {} moves", detail1.name, moves),
        GameOutcome::Loss => println!("{} wins in {} moves", detail2.name, moves),
        GameOutcome::Draw => println!("Draw after {} moves", moves),
        GameOutcome::Error => println!(
            "Game failed: {}",
            error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
    println!(
        "{}: {} ({:+}), {}: {} ({:+})",
        detail1.name,
        update.rating1_before + update.engine1_delta,
        update.engine1_delta,
        detail2.name,
        update.rating2_before + update.engine2_delta,
        update.engine2_delta,
    );
    Ok(())
}

pub async fn run_tournament(
    rounds: Option<u64>,
    pairs: Option<i64>,
    concurrency: Option<usize>,
    time_control: Option<String>,
) -> anyhow::Result<()> {
    let config = ArenaConfig::load(None)?;
    let (_db, store) = open_store().await?;

    // Make sure every enabled engine exists in the database, and build the
    // launch map keyed by persistent id.
    let mut specs = HashMap::new();
    for entry in config.enabled_engines() {
        let id = store
            .add_engine(&entry.name, entry.initial_rating, entry.description.as_deref())
            .await?;
        specs.insert(id, entry.spec(id));
    }
    anyhow::ensure!(
        specs.len() >= 2,
        "at least two enabled engines are required (got {})",
        specs.len()
    );

    let match_sets = config.tournament.match_sets.clone();
    for set in &match_sets {
        set.validate().map_err(anyhow::Error::msg)?;
    }

    let scheduler_config = SchedulerConfig {
        concurrency: concurrency
            .or(config.tournament.concurrency)
            .unwrap_or(2)
            .max(1),
        time_control: resolve_time_control(time_control.as_deref(), &config)?,
        k_factor: tournament::DEFAULT_K_FACTOR,
        max_match_sets: rounds.or(config.tournament.rounds),
        pair_games_cap: pairs.or(config.tournament.games_per_pair),
    };

    tracing::info!(
        name = %config.tournament.name,
        engines = specs.len(),
        concurrency = scheduler_config.concurrency,
        time_control = %scheduler_config.time_control,
        "Starting tournament"
    );

    let scheduler = Scheduler::new(
        store,
        Arc::new(UgiConnector::default()),
        specs,
        match_sets,
        config.tournament.default_match_set.clone(),
        scheduler_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    println!("Tournament stopped");
    Ok(())
}

fn resolve_time_control(flag: Option<&str>, config: &ArenaConfig) -> anyhow::Result<TimeControl> {
    let raw = flag.unwrap_or(&config.tournament.time_control);
    let tc: TimeControl = raw.parse()?;
    Ok(tc)
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

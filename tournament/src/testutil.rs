//! Scripted doubles for the engine-port, connector, and storage seams.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ugi::{GameStatus, PlayerReport, UgiError};

use crate::driver::EnginePort;
use crate::runner::Connector;
use crate::store::{
    EngineRow, EngineStore, GameRow, MatchStore, MatchTx, RecentGame, StoreError, WldDelta,
};
use crate::types::{Color, EngineSpec, GameOutcome, GameRecord};

pub fn in_progress(player_to_move: u8) -> GameStatus {
    GameStatus {
        in_progress: true,
        player_to_move,
        reports: [None, None],
    }
}

pub fn ended_status(player1: Option<&str>, player2: Option<&str>) -> GameStatus {
    let report = |r: Option<&str>| {
        r.map(|result| PlayerReport {
            result: result.to_string(),
            score: None,
        })
    };
    GameStatus {
        in_progress: false,
        player_to_move: 1,
        reports: [report(player1), report(player2)],
    }
}

pub fn sample_game(outcome: GameOutcome, engine1_color: Color) -> GameRecord {
    GameRecord {
        outcome,
        moves: vec!["e2e4".to_string(), "e7e5".to_string()],
        duration: Duration::from_millis(1200),
        error: None,
        final_status: None,
        engine1_color,
        starting_position: "initial".to_string(),
        match_set: "test-set".to_string(),
    }
}

/// An [`EnginePort`] that replays a script instead of talking to a process.
#[derive(Default)]
pub struct ScriptedPort {
    moves: VecDeque<String>,
    default_move: Option<String>,
    statuses: VecDeque<GameStatus>,
    fail_setup: bool,
    applied: Arc<Mutex<Vec<String>>>,
    active_gauge: Option<Arc<ActiveGauge>>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_moves(mut self, moves: Vec<&str>) -> Self {
        self.moves = moves.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_default_move(mut self, mv: &str) -> Self {
        self.default_move = Some(mv.to_string());
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<GameStatus>) -> Self {
        self.statuses = statuses.into();
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// One terminal status, both players drawing. The shortest possible game.
    pub fn drawn(self) -> Self {
        self.with_statuses(vec![ended_status(Some("draw"), Some("draw"))])
    }

    pub fn applied_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.applied.clone()
    }

    fn attach_gauge(mut self, gauge: Arc<ActiveGauge>) -> Self {
        gauge.inc();
        self.active_gauge = Some(gauge);
        self
    }
}

impl EnginePort for ScriptedPort {
    async fn set_position(&mut self, fen: &str) -> Result<(), UgiError> {
        if self.fail_setup {
            return Err(UgiError::SetupFailed(format!(
                "no readyok after position command (fen: {})",
                fen
            )));
        }
        Ok(())
    }

    async fn apply_move(&mut self, mv: &str) -> Result<(), UgiError> {
        self.applied.lock().unwrap().push(mv.to_string());
        Ok(())
    }

    async fn request_move(&mut self, _deadline: Duration) -> Result<String, UgiError> {
        if let Some(mv) = self.moves.pop_front() {
            return Ok(mv);
        }
        match &self.default_move {
            Some(mv) => Ok(mv.clone()),
            None => Err(UgiError::Timeout),
        }
    }

    async fn query_status(&mut self, _deadline: Duration) -> Result<GameStatus, UgiError> {
        if self.statuses.len() > 1 {
            return Ok(self.statuses.pop_front().unwrap_or_default());
        }
        Ok(self.statuses.front().cloned().unwrap_or_default())
    }

    async fn shutdown(self) {
        if let Some(gauge) = &self.active_gauge {
            gauge.dec();
        }
    }
}

/// Tracks how many scripted sessions are alive at once, and the high-water
/// mark, for concurrency-cap assertions.
#[derive(Default)]
pub struct ActiveGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveGauge {
    fn inc(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn dec(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Connector that hands out ports from a prepared queue, in connect order.
pub struct MockConnector {
    scripts: Mutex<VecDeque<Result<ScriptedPort, UgiError>>>,
}

impl MockConnector {
    pub fn new(scripts: Vec<Result<ScriptedPort, UgiError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

impl Connector for MockConnector {
    type Port = ScriptedPort;

    async fn connect(&self, spec: &EngineSpec) -> Result<ScriptedPort, UgiError> {
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted port left for {}", spec.name))
    }
}

/// Connector that fabricates an immediately-drawn port for every connect,
/// tracking liveness through an [`ActiveGauge`].
#[derive(Default)]
pub struct DrawingConnector {
    pub gauge: Arc<ActiveGauge>,
}

impl Connector for DrawingConnector {
    type Port = ScriptedPort;

    async fn connect(&self, _spec: &EngineSpec) -> Result<ScriptedPort, UgiError> {
        Ok(ScriptedPort::new().drawn().attach_gauge(self.gauge.clone()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub name: String,
    pub rating: i64,
    pub games_played: i64,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    engines: BTreeMap<i64, EngineSnapshot>,
    games: Vec<GameRow>,
}

/// In-memory storage with real transaction semantics: a transaction stages
/// writes and publishes them atomically on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    fail_insert: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_engine(&self, name: &str, rating: i64) -> i64 {
        self.add_engine(name, rating, None).await.unwrap()
    }

    pub fn fail_next_insert(&self) {
        self.fail_insert.store(true, Ordering::SeqCst);
    }

    pub fn engine_snapshot(&self, id: i64) -> EngineSnapshot {
        self.inner.lock().unwrap().engines[&id].clone()
    }

    pub fn game_count(&self) -> usize {
        self.inner.lock().unwrap().games.len()
    }

    pub fn games_with_error(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .games
            .iter()
            .filter(|g| g.error.is_some())
            .count()
    }
}

impl EngineStore for MemoryStore {
    async fn add_engine(
        &self,
        name: &str,
        rating: i64,
        _description: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner.engines.iter().find(|(_, e)| e.name == name) {
            return Ok(*id);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.engines.insert(
            id,
            EngineSnapshot {
                name: name.to_string(),
                rating,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn engines_for_scheduling(&self) -> Result<Vec<EngineRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .engines
            .iter()
            .map(|(&id, e)| EngineRow {
                id,
                name: e.name.clone(),
                rating: e.rating,
                games_played: e.games_played,
            })
            .collect())
    }

    async fn recent_games(&self, _hours: u32) -> Result<Vec<RecentGame>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut recent: Vec<RecentGame> = inner
            .games
            .iter()
            .map(|g| RecentGame {
                engine1_id: g.engine1_id,
                engine2_id: g.engine2_id,
                engine1_rating_before: g.engine1_rating_before,
                engine2_rating_before: g.engine2_rating_before,
                played_at: g.played_at,
            })
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn pair_game_counts(&self) -> Result<HashMap<(i64, i64), i64>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut counts = HashMap::new();
        for g in &inner.games {
            let key = (g.engine1_id.min(g.engine2_id), g.engine1_id.max(g.engine2_id));
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

pub struct MemoryTx {
    inner: Arc<Mutex<MemoryInner>>,
    fail_insert: Arc<AtomicBool>,
    staged_games: Vec<GameRow>,
    staged_updates: Vec<(i64, i64, i64, WldDelta)>,
}

impl MatchStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx {
            inner: self.inner.clone(),
            fail_insert: self.fail_insert.clone(),
            staged_games: Vec::new(),
            staged_updates: Vec::new(),
        })
    }
}

impl MatchTx for MemoryTx {
    async fn rating_of(&mut self, engine_id: i64) -> Result<i64, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .engines
            .get(&engine_id)
            .map(|e| e.rating)
            .ok_or(StoreError::UnknownEngine(engine_id))
    }

    async fn insert_game(&mut self, row: &GameRow) -> Result<(), StoreError> {
        if self.fail_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected insert failure".to_string()));
        }
        self.staged_games.push(row.clone());
        Ok(())
    }

    async fn update_engine(
        &mut self,
        engine_id: i64,
        new_rating: i64,
        games_delta: i64,
        wld: WldDelta,
    ) -> Result<(), StoreError> {
        self.staged_updates
            .push((engine_id, new_rating, games_delta, wld));
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.games.extend(self.staged_games);
        for (id, rating, games, wld) in self.staged_updates {
            let engine = inner
                .engines
                .get_mut(&id)
                .ok_or(StoreError::UnknownEngine(id))?;
            engine.rating = rating;
            engine.games_played += games;
            engine.wins += wld.wins;
            engine.losses += wld.losses;
            engine.draws += wld.draws;
        }
        Ok(())
    }

    async fn rollback(self) {}
}

//! Storage contract consumed by the scheduler and the Elo updater.
//!
//! The backend is injected: the scheduler reads through [`EngineStore`] and
//! the updater writes through a [`MatchStore`] transaction. Methods return
//! `impl Future + Send` rather than using `async fn` so that the futures
//! are guaranteed `Send` across `tokio::spawn` boundaries.

use std::collections::HashMap;
use std::future::Future;

use crate::types::Color;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("unknown engine id {0}")]
    UnknownEngine(i64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Engine row as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRow {
    pub id: i64,
    pub name: String,
    pub rating: i64,
    pub games_played: i64,
}

/// A recent game, newest first, used for the volatility signal.
#[derive(Debug, Clone)]
pub struct RecentGame {
    pub engine1_id: i64,
    pub engine2_id: i64,
    pub engine1_rating_before: i64,
    pub engine2_rating_before: i64,
    pub played_at: i64,
}

/// One game row ready for insertion. Ratings-before are filled by the
/// updater from values read inside the same transaction.
#[derive(Debug, Clone)]
pub struct GameRow {
    pub engine1_id: i64,
    pub engine2_id: i64,
    pub winner_id: Option<i64>,
    pub is_draw: bool,
    pub engine1_rating_before: i64,
    pub engine2_rating_before: i64,
    /// JSON array of move tokens.
    pub moves: String,
    pub duration_ms: i64,
    pub error: Option<String>,
    /// JSON snapshot of the final status, when one was observed.
    pub final_status: Option<String>,
    pub starting_position: String,
    pub match_set_name: String,
    pub engine1_color: Color,
    pub engine2_color: Color,
    pub played_at: i64,
}

/// Per-engine win/loss/draw counter deltas for one match set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WldDelta {
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
}

/// Read side used for pairing decisions. Reads may be slightly stale with
/// respect to in-flight transactions; pair weights are noisy by design.
pub trait EngineStore: Send + Sync {
    fn add_engine(
        &self,
        name: &str,
        rating: i64,
        description: Option<&str>,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn engines_for_scheduling(
        &self,
    ) -> impl Future<Output = Result<Vec<EngineRow>, StoreError>> + Send;

    fn recent_games(
        &self,
        hours: u32,
    ) -> impl Future<Output = Result<Vec<RecentGame>, StoreError>> + Send;

    /// Cumulative game counts keyed by unordered pair `(min_id, max_id)`.
    fn pair_game_counts(
        &self,
    ) -> impl Future<Output = Result<HashMap<(i64, i64), i64>, StoreError>> + Send;
}

/// Write side. One transaction per match set: game rows and both rating
/// updates become visible together or not at all.
pub trait MatchStore: Send + Sync {
    type Tx: MatchTx;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}

pub trait MatchTx: Send {
    fn rating_of(&mut self, engine_id: i64)
        -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn insert_game(&mut self, row: &GameRow)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_engine(
        &mut self,
        engine_id: i64,
        new_rating: i64,
        games_delta: i64,
        wld: WldDelta,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rollback(self) -> impl Future<Output = ()> + Send;
}

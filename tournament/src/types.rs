//! Value objects shared across the tournament pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ugi::GameStatus;

/// Hard per-move ceiling regardless of the configured time control.
pub const MOVE_DEADLINE_CAP: Duration = Duration::from_secs(30);

/// Side assignment within a game. Player 1 on the wire is always white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid time control {0:?}, expected \"base+increment\" in seconds")]
pub struct TimeControlError(pub String);

/// "base+increment" time control, both components in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeControl {
    pub base: Duration,
    pub increment: Duration,
}

impl TimeControl {
    pub fn new(base_secs: u64, increment_secs: u64) -> Self {
        Self {
            base: Duration::from_secs(base_secs),
            increment: Duration::from_secs(increment_secs),
        }
    }

    /// Fresh per-side clock for one game.
    pub fn clock(&self) -> MoveClock {
        MoveClock {
            remaining: self.base,
            increment: self.increment,
        }
    }
}

impl Default for TimeControl {
    fn default() -> Self {
        Self::new(10, 1)
    }
}

impl FromStr for TimeControl {
    type Err = TimeControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, increment) = s
            .trim()
            .split_once('+')
            .ok_or_else(|| TimeControlError(s.to_string()))?;
        let base: u64 = base.trim().parse().map_err(|_| TimeControlError(s.to_string()))?;
        let increment: u64 = increment
            .trim()
            .parse()
            .map_err(|_| TimeControlError(s.to_string()))?;
        Ok(Self::new(base, increment))
    }
}

impl std::fmt::Display for TimeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.base.as_secs(), self.increment.as_secs())
    }
}

/// One side's clock. The per-move deadline is the remaining budget clamped
/// to [`MOVE_DEADLINE_CAP`]; the increment lands after each reply.
#[derive(Debug, Clone)]
pub struct MoveClock {
    remaining: Duration,
    increment: Duration,
}

impl MoveClock {
    pub fn move_deadline(&self) -> Duration {
        self.remaining.min(MOVE_DEADLINE_CAP)
    }

    pub fn on_reply(&mut self, elapsed: Duration) {
        self.remaining = self.remaining.saturating_sub(elapsed) + self.increment;
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

/// A named starting position: an optional alternative initial state and a
/// move prefix to replay. When both are present the state is applied first
/// and the moves replayed after it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartingPosition {
    pub name: String,
    pub description: Option<String>,
    pub moves: Vec<String>,
    pub fen: Option<String>,
}

/// A scheduled bundle of games for one engine pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSet {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_games_per_position")]
    pub games_per_position: u32,
    pub starting_positions: Vec<StartingPosition>,
}

fn default_games_per_position() -> u32 {
    2
}

impl MatchSet {
    /// Fallback match set: one nameless default position, two games.
    pub fn synthetic() -> Self {
        Self {
            name: "default".to_string(),
            description: None,
            games_per_position: 2,
            starting_positions: vec![StartingPosition {
                name: "initial".to_string(),
                ..Default::default()
            }],
        }
    }

    /// Games per position must be even so colors balance.
    pub fn validate(&self) -> Result<(), String> {
        if self.games_per_position == 0 || self.games_per_position % 2 != 0 {
            return Err(format!(
                "match set {:?}: gamesPerPosition must be a positive even number, got {}",
                self.name, self.games_per_position
            ));
        }
        if self.starting_positions.is_empty() {
            return Err(format!("match set {:?} has no starting positions", self.name));
        }
        Ok(())
    }

    pub fn games_total(&self) -> u32 {
        self.games_per_position * self.starting_positions.len() as u32
    }
}

/// A launchable engine: persistent identity plus process configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineSpec {
    pub id: i64,
    pub name: String,
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub args: Vec<String>,
    pub options: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

/// Outcome of one game from engine1's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Win,
    Loss,
    Draw,
    Error,
}

impl GameOutcome {
    /// Score contribution for (engine1, engine2). Error games score nothing.
    pub fn scores(self) -> (f64, f64) {
        match self {
            GameOutcome::Win => (1.0, 0.0),
            GameOutcome::Loss => (0.0, 1.0),
            GameOutcome::Draw => (0.5, 0.5),
            GameOutcome::Error => (0.0, 0.0),
        }
    }
}

/// Everything the driver learned from one game.
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub outcome: GameOutcome,
    pub moves: Vec<String>,
    pub duration: Duration,
    pub error: Option<String>,
    pub final_status: Option<GameStatus>,
    pub engine1_color: Color,
    pub starting_position: String,
    pub match_set: String,
}

/// Aggregate of one match set between a pair of engines.
#[derive(Debug, Clone)]
pub struct MatchSetResult {
    pub engine1_id: i64,
    pub engine2_id: i64,
    pub match_set: String,
    pub games: Vec<GameRecord>,
    pub engine1_score: f64,
    pub engine2_score: f64,
    pub completed: bool,
}

impl MatchSetResult {
    pub fn total_games(&self) -> usize {
        self.games.len()
    }

    /// Games that count toward the score denominator.
    pub fn scored_games(&self) -> usize {
        self.games
            .iter()
            .filter(|g| g.outcome != GameOutcome::Error)
            .count()
    }
}

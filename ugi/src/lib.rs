pub mod protocol;
pub mod session;

pub use protocol::{parse_ugi_message, ProtocolError, UgiMessage};
pub use session::{EngineSession, SessionConfig};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors surfaced by an engine session.
///
/// All of these are session-scoped: the session never restarts itself, the
/// caller decides whether a failure is fatal for the surrounding game.
#[derive(Debug, thiserror::Error)]
pub enum UgiError {
    #[error("failed to start engine: {0}")]
    StartFailed(String),

    #[error("engine did not complete the UGI handshake in time")]
    HandshakeTimeout,

    #[error("engine rejected the UGI handshake: {0}")]
    HandshakeRejected(String),

    #[error("engine did not respond before the deadline")]
    Timeout,

    #[error("unexpected engine response: {0}")]
    BadResponse(String),

    #[error("engine process exited")]
    EngineExited,

    #[error("failed to set up starting position: {0}")]
    SetupFailed(String),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-player terminal report gathered from `info player <n> result <r>
/// score <s>` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerReport {
    pub result: String,
    pub score: Option<String>,
}

/// Game state as observed from an engine's `status` reply.
///
/// `in_progress` stays true until the engine explicitly reports a state
/// other than `inprogress`; a session that answers nothing at all yields the
/// default and lets the caller's deadline policy decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatus {
    pub in_progress: bool,
    /// Player to move, 1 or 2. Player 1 is the side that moves first.
    pub player_to_move: u8,
    /// Terminal reports indexed by player (slot 0 = player 1).
    pub reports: [Option<PlayerReport>; 2],
}

impl Default for GameStatus {
    fn default() -> Self {
        Self {
            in_progress: true,
            player_to_move: 1,
            reports: [None, None],
        }
    }
}

impl GameStatus {
    /// True once both players have reported a terminal result.
    pub fn is_complete(&self) -> bool {
        self.reports.iter().all(|r| r.is_some())
    }
}

/// Merge static per-engine options with per-game overrides.
///
/// Overrides win on key conflicts. A `BTreeMap` keeps the `setoption` order
/// deterministic across runs.
pub fn merge_options(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

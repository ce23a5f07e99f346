//! Plays exactly one game between two already-handshaked sessions.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use ugi::{EngineSession, GameStatus, UgiError};

use crate::types::{Color, GameOutcome, GameRecord, StartingPosition, TimeControl};

/// Deadline for one `status` round trip.
pub const STATUS_DEADLINE: Duration = Duration::from_secs(5);

/// Hard move cap; exceeding it adjudicates a draw.
pub const DEFAULT_MOVE_CAP: u32 = 500;

/// The session surface the driver needs. [`EngineSession`] is the
/// production implementation; tests script this trait directly.
pub trait EnginePort: Send {
    fn set_position(&mut self, fen: &str) -> impl Future<Output = Result<(), UgiError>> + Send;

    fn apply_move(&mut self, mv: &str) -> impl Future<Output = Result<(), UgiError>> + Send;

    fn request_move(
        &mut self,
        deadline: Duration,
    ) -> impl Future<Output = Result<String, UgiError>> + Send;

    fn query_status(
        &mut self,
        deadline: Duration,
    ) -> impl Future<Output = Result<GameStatus, UgiError>> + Send;

    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

impl EnginePort for EngineSession {
    async fn set_position(&mut self, fen: &str) -> Result<(), UgiError> {
        EngineSession::set_position(self, fen).await
    }

    async fn apply_move(&mut self, mv: &str) -> Result<(), UgiError> {
        EngineSession::apply_move(self, mv).await
    }

    async fn request_move(&mut self, deadline: Duration) -> Result<String, UgiError> {
        EngineSession::request_move(self, deadline).await
    }

    async fn query_status(&mut self, deadline: Duration) -> Result<GameStatus, UgiError> {
        EngineSession::query_status(self, deadline).await
    }

    async fn shutdown(self) {
        EngineSession::shutdown(self).await
    }
}

pub struct GameDriver {
    pub time_control: TimeControl,
    pub move_cap: u32,
    pub status_deadline: Duration,
}

impl GameDriver {
    pub fn new(time_control: TimeControl) -> Self {
        Self {
            time_control,
            move_cap: DEFAULT_MOVE_CAP,
            status_deadline: STATUS_DEADLINE,
        }
    }

    /// Play one game. `session1` belongs to engine1, which plays
    /// `engine1_color`; player 1 on the wire is always the white side.
    /// Both sessions are torn down on every exit path.
    pub async fn play<P: EnginePort>(
        &self,
        mut session1: P,
        mut session2: P,
        position: &StartingPosition,
        engine1_color: Color,
        match_set: &str,
    ) -> GameRecord {
        let started = Instant::now();
        let mut moves = Vec::new();
        let mut final_status = None;

        let played = self
            .play_inner(
                &mut session1,
                &mut session2,
                position,
                engine1_color,
                &mut moves,
                &mut final_status,
            )
            .await;

        tokio::join!(session1.shutdown(), session2.shutdown());

        let (outcome, error) = match played {
            Ok(outcome) => (outcome, None),
            Err(PlayError::MoveCap) => {
                (GameOutcome::Draw, Some(format!("move cap {} reached", self.move_cap)))
            }
            Err(PlayError::BothClaimWin) => (
                GameOutcome::Error,
                Some("protocol violation: both players report win".to_string()),
            ),
            Err(PlayError::Session(e)) => (GameOutcome::Error, Some(e.to_string())),
        };

        tracing::debug!(
            position = %position.name,
            color = %engine1_color,
            ?outcome,
            moves = moves.len(),
            "Game finished"
        );

        GameRecord {
            outcome,
            moves,
            duration: started.elapsed(),
            error,
            final_status,
            engine1_color,
            starting_position: position.name.clone(),
            match_set: match_set.to_string(),
        }
    }

    async fn play_inner<P: EnginePort>(
        &self,
        session1: &mut P,
        session2: &mut P,
        position: &StartingPosition,
        engine1_color: Color,
        moves: &mut Vec<String>,
        final_status: &mut Option<GameStatus>,
    ) -> Result<GameOutcome, PlayError> {
        if let Some(fen) = &position.fen {
            session1.set_position(fen).await?;
            session2.set_position(fen).await?;
        }
        for mv in &position.moves {
            session1.apply_move(mv).await?;
            session2.apply_move(mv).await?;
        }

        let mut white_clock = self.time_control.clock();
        let mut black_clock = self.time_control.clock();

        loop {
            // Session 1 is authoritative for game state.
            let status = session1.query_status(self.status_deadline).await?;
            *final_status = Some(status.clone());
            if !status.in_progress {
                return translate_outcome(&status, engine1_color);
            }
            if moves.len() as u32 >= self.move_cap {
                return Err(PlayError::MoveCap);
            }

            let white_to_move = status.player_to_move == 1;
            let clock = if white_to_move {
                &mut white_clock
            } else {
                &mut black_clock
            };
            let engine1_to_move = white_to_move == (engine1_color == Color::White);

            let asked = Instant::now();
            let mv = if engine1_to_move {
                session1.request_move(clock.move_deadline()).await?
            } else {
                session2.request_move(clock.move_deadline()).await?
            };
            clock.on_reply(asked.elapsed());

            moves.push(mv.clone());
            session1.apply_move(&mv).await?;
            session2.apply_move(&mv).await?;
        }
    }
}

enum PlayError {
    Session(UgiError),
    MoveCap,
    BothClaimWin,
}

impl From<UgiError> for PlayError {
    fn from(e: UgiError) -> Self {
        PlayError::Session(e)
    }
}

/// Map the per-player result tokens to engine1's perspective.
///
/// Ambiguous-but-finished games default to a draw; contradictory reports
/// are a protocol violation.
fn translate_outcome(status: &GameStatus, engine1_color: Color) -> Result<GameOutcome, PlayError> {
    let engine1_slot = match engine1_color {
        Color::White => 0,
        Color::Black => 1,
    };
    let own = status.reports[engine1_slot].as_ref().map(|r| r.result.as_str());
    let other = status.reports[1 - engine1_slot]
        .as_ref()
        .map(|r| r.result.as_str());

    if own == Some("win") && other == Some("win") {
        return Err(PlayError::BothClaimWin);
    }

    Ok(match (own, other) {
        (Some("win"), _) => GameOutcome::Win,
        (Some("loss"), _) => GameOutcome::Loss,
        (Some("draw"), _) => GameOutcome::Draw,
        (None, Some("win")) => GameOutcome::Loss,
        (None, Some("loss")) => GameOutcome::Win,
        _ => GameOutcome::Draw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ended_status, in_progress, ScriptedPort};

    fn driver() -> GameDriver {
        GameDriver::new(TimeControl::new(10, 1))
    }

    #[tokio::test]
    async fn test_plays_to_a_win_for_engine1_as_white() {
        let s1 = ScriptedPort::new()
            .with_statuses(vec![
                in_progress(1),
                in_progress(2),
                ended_status(Some("win"), Some("loss")),
            ])
            .with_moves(vec!["e2e4"]);
        let s2 = ScriptedPort::new().with_moves(vec!["e7e5"]);
        let applied = s1.applied_log();

        let record = driver()
            .play(s1, s2, &StartingPosition::default(), Color::White, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Win);
        assert_eq!(record.moves, vec!["e2e4", "e7e5"]);
        assert!(record.error.is_none());
        // Both moves were relayed to session 1.
        assert_eq!(*applied.lock().unwrap(), vec!["e2e4", "e7e5"]);
    }

    #[tokio::test]
    async fn test_color_mapping_when_engine1_is_black() {
        // Player 1 (white) is session 2's engine; white wins, so engine1
        // (black) lost.
        let s1 = ScriptedPort::new().with_statuses(vec![
            in_progress(1),
            ended_status(Some("win"), Some("loss")),
        ]);
        let s2 = ScriptedPort::new().with_moves(vec!["d2d4"]);

        let record = driver()
            .play(s1, s2, &StartingPosition::default(), Color::Black, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Loss);
        assert_eq!(record.moves, vec!["d2d4"]);
    }

    #[tokio::test]
    async fn test_prefix_moves_replayed_into_both_sessions() {
        let s1 = ScriptedPort::new().with_statuses(vec![ended_status(
            Some("draw"),
            Some("draw"),
        )]);
        let s2 = ScriptedPort::new();
        let log1 = s1.applied_log();
        let log2 = s2.applied_log();

        let position = StartingPosition {
            name: "london".to_string(),
            moves: vec!["d2d4".to_string(), "d7d5".to_string()],
            ..Default::default()
        };
        let record = driver()
            .play(s1, s2, &position, Color::White, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Draw);
        // The prefix is not part of the played move list.
        assert!(record.moves.is_empty());
        assert_eq!(*log1.lock().unwrap(), vec!["d2d4", "d7d5"]);
        assert_eq!(*log2.lock().unwrap(), vec!["d2d4", "d7d5"]);
    }

    #[tokio::test]
    async fn test_both_claiming_win_is_an_error() {
        let s1 = ScriptedPort::new()
            .with_statuses(vec![ended_status(Some("win"), Some("win"))]);
        let s2 = ScriptedPort::new();

        let record = driver()
            .play(s1, s2, &StartingPosition::default(), Color::White, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Error);
        assert!(record.error.as_deref().unwrap().contains("protocol violation"));
    }

    #[tokio::test]
    async fn test_missing_reports_default_to_draw() {
        let s1 = ScriptedPort::new().with_statuses(vec![ended_status(None, None)]);
        let s2 = ScriptedPort::new();

        let record = driver()
            .play(s1, s2, &StartingPosition::default(), Color::White, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Draw);
    }

    #[tokio::test]
    async fn test_move_cap_adjudicates_draw() {
        let mut driver = driver();
        driver.move_cap = 4;

        let s1 = ScriptedPort::new()
            .with_statuses(vec![in_progress(1)])
            .with_default_move("a1a2");
        let s2 = ScriptedPort::new().with_default_move("a7a6");

        let record = driver
            .play(s1, s2, &StartingPosition::default(), Color::White, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Draw);
        assert_eq!(record.moves.len(), 4);
        assert!(record.error.as_deref().unwrap().contains("move cap"));
    }

    #[tokio::test]
    async fn test_move_timeout_is_an_error_game() {
        // Session 2 never produces a move.
        let s1 = ScriptedPort::new().with_statuses(vec![in_progress(2)]);
        let s2 = ScriptedPort::new();

        let record = driver()
            .play(s1, s2, &StartingPosition::default(), Color::White, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Error);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_setup_failure_is_an_error_game() {
        let s1 = ScriptedPort::new().failing_setup();
        let s2 = ScriptedPort::new();

        let position = StartingPosition {
            name: "custom".to_string(),
            fen: Some("8/8/8/8/8/8/8/8 w - - 0 1".to_string()),
            ..Default::default()
        };
        let record = driver()
            .play(s1, s2, &position, Color::White, "set")
            .await;

        assert_eq!(record.outcome, GameOutcome::Error);
        assert!(record.error.as_deref().unwrap().contains("position"));
    }
}

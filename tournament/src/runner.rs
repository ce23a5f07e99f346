//! Plays a full match set for one engine pair: every starting position,
//! both color assignments, strictly sequentially.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ugi::{EngineSession, SessionConfig, UgiError};

use crate::driver::{EnginePort, GameDriver};
use crate::types::{
    Color, EngineSpec, GameOutcome, GameRecord, MatchSet, MatchSetResult, StartingPosition,
    TimeControl,
};

/// Overall deadline for the `ugi`/`setoption*`/`isready` exchange.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Pause between games of one match set; fresh engine processes need a
/// moment before the next pair starts talking.
const GAME_SETTLE: Duration = Duration::from_secs(1);

/// Produces a ready-to-play session for an engine. The production
/// implementation spawns a child process and completes the handshake;
/// tests substitute scripted ports.
pub trait Connector: Send + Sync {
    type Port: EnginePort;

    fn connect(
        &self,
        spec: &EngineSpec,
    ) -> impl Future<Output = Result<Self::Port, UgiError>> + Send;
}

/// Spawns and handshakes real UGI engine processes.
pub struct UgiConnector {
    pub handshake_deadline: Duration,
}

impl Default for UgiConnector {
    fn default() -> Self {
        Self {
            handshake_deadline: HANDSHAKE_DEADLINE,
        }
    }
}

impl Connector for UgiConnector {
    type Port = EngineSession;

    async fn connect(&self, spec: &EngineSpec) -> Result<EngineSession, UgiError> {
        let config = SessionConfig {
            name: spec.name.clone(),
            executable: spec.executable.clone(),
            working_dir: spec.working_dir.clone(),
            args: spec.args.clone(),
            options: spec.options.clone(),
            env: spec.env.clone(),
        };
        let mut session = EngineSession::spawn(&config)?;
        match session
            .handshake(&config, &BTreeMap::new(), self.handshake_deadline)
            .await
        {
            Ok(()) => Ok(session),
            Err(e) => {
                session.shutdown().await;
                Err(e)
            }
        }
    }
}

pub struct MatchRunner<C> {
    connector: Arc<C>,
    driver: GameDriver,
    settle: Duration,
}

impl<C: Connector> MatchRunner<C> {
    pub fn new(connector: Arc<C>, time_control: TimeControl) -> Self {
        Self {
            connector,
            driver: GameDriver::new(time_control),
            settle: GAME_SETTLE,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Play the whole match set. Every scheduled game produces a record;
    /// failed games are recorded as errors and score nothing. The result
    /// is `completed` only if no game errored.
    pub async fn run(
        &self,
        engine1: &EngineSpec,
        engine2: &EngineSpec,
        match_set: &MatchSet,
    ) -> MatchSetResult {
        tracing::info!(
            engine1 = %engine1.name,
            engine2 = %engine2.name,
            match_set = %match_set.name,
            games = match_set.games_total(),
            "Starting match set"
        );

        let mut games = Vec::with_capacity(match_set.games_total() as usize);
        let mut first = true;

        for position in &match_set.starting_positions {
            for _ in 0..match_set.games_per_position / 2 {
                for color in [Color::White, Color::Black] {
                    if !first {
                        tokio::time::sleep(self.settle).await;
                    }
                    first = false;
                    games.push(
                        self.play_one(engine1, engine2, position, color, &match_set.name)
                            .await,
                    );
                }
            }
        }

        let (mut score1, mut score2) = (0.0, 0.0);
        for game in &games {
            let (s1, s2) = game.outcome.scores();
            score1 += s1;
            score2 += s2;
        }
        let completed = games.iter().all(|g| g.outcome != GameOutcome::Error);

        tracing::info!(
            engine1 = %engine1.name,
            engine2 = %engine2.name,
            match_set = %match_set.name,
            score1,
            score2,
            completed,
            "Match set finished"
        );

        MatchSetResult {
            engine1_id: engine1.id,
            engine2_id: engine2.id,
            match_set: match_set.name.clone(),
            games,
            engine1_score: score1,
            engine2_score: score2,
            completed,
        }
    }

    async fn play_one(
        &self,
        engine1: &EngineSpec,
        engine2: &EngineSpec,
        position: &StartingPosition,
        engine1_color: Color,
        match_set: &str,
    ) -> GameRecord {
        // Fresh processes per game; a crash cannot poison the next game.
        let session1 = match self.connector.connect(engine1).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(engine = %engine1.name, "Failed to start engine: {}", e);
                return startup_error(engine1, position, engine1_color, match_set, e);
            }
        };
        let session2 = match self.connector.connect(engine2).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(engine = %engine2.name, "Failed to start engine: {}", e);
                session1.shutdown().await;
                return startup_error(engine2, position, engine1_color, match_set, e);
            }
        };

        self.driver
            .play(session1, session2, position, engine1_color, match_set)
            .await
    }
}

fn startup_error(
    engine: &EngineSpec,
    position: &StartingPosition,
    engine1_color: Color,
    match_set: &str,
    cause: UgiError,
) -> GameRecord {
    GameRecord {
        outcome: GameOutcome::Error,
        moves: Vec::new(),
        duration: Duration::ZERO,
        error: Some(format!("{} failed to start: {}", engine.name, cause)),
        final_status: None,
        engine1_color,
        starting_position: position.name.clone(),
        match_set: match_set.to_string(),
    }
}

//! One child engine process behind a line-oriented request/response API.
//!
//! The session owns three background tasks: a stdout reader that parses
//! every line into a [`UgiMessage`] and forwards it on a typed channel, a
//! stderr reader that logs and discards, and a stdin writer that serializes
//! all outbound commands. Public operations write a command and await the
//! matching event under a deadline; the session never restarts itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};

use crate::protocol::{command, parse_ugi_message, UgiMessage};
use crate::{merge_options, GameStatus, PlayerReport, UgiError};

/// Settling delay after fire-and-forget commands, so a `makemove` cannot
/// interleave with the next request on a slow engine.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Grace period between `quit` and force-kill.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Deadline for the `isready` probe that confirms a position command.
const SETUP_PROBE_DEADLINE: Duration = Duration::from_secs(2);

/// Everything needed to launch and configure one engine process.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub name: String,
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub args: Vec<String>,
    /// Static options sent during the handshake.
    pub options: BTreeMap<String, String>,
    /// Environment overlay on top of the parent process environment.
    pub env: BTreeMap<String, String>,
}

enum SessionEvent {
    Message(UgiMessage),
    Eof,
}

/// A running engine process.
pub struct EngineSession {
    name: String,
    child: Child,
    stdin_tx: mpsc::Sender<String>,
    event_rx: mpsc::Receiver<SessionEvent>,
}

impl EngineSession {
    /// Spawn the engine executable with piped stdio and start the I/O tasks.
    ///
    /// The engine is not spoken to yet; call [`handshake`](Self::handshake)
    /// before anything else.
    pub fn spawn(config: &SessionConfig) -> Result<Self, UgiError> {
        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            UgiError::StartFailed(format!("{}: {}", config.executable.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| UgiError::StartFailed("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UgiError::StartFailed("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| UgiError::StartFailed("no stderr pipe".to_string()))?;

        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(64);

        tokio::spawn(read_stdout(config.name.clone(), stdout, event_tx));
        tokio::spawn(read_stderr(config.name.clone(), stderr));
        tokio::spawn(write_stdin(config.name.clone(), stdin, stdin_rx));

        tracing::debug!(engine = %config.name, "Engine process spawned");
        Ok(Self {
            name: config.name.clone(),
            child,
            stdin_tx,
            event_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the `ugi` / `setoption*` / `isready` exchange.
    ///
    /// `overrides` are per-game options merged over the static option map;
    /// overrides win on conflict. The whole exchange shares one deadline.
    pub async fn handshake(
        &mut self,
        config: &SessionConfig,
        overrides: &BTreeMap<String, String>,
        deadline: Duration,
    ) -> Result<(), UgiError> {
        let until = Instant::now() + deadline;

        self.send(command::UGI).await?;
        self.await_ack(until, |m| matches!(m, UgiMessage::UgiOk))
            .await?;

        for (name, value) in merge_options(&config.options, overrides) {
            self.send(&command::set_option(&name, &value)).await?;
        }

        self.send(command::IS_READY).await?;
        self.await_ack(until, |m| matches!(m, UgiMessage::ReadyOk))
            .await?;

        tracing::debug!(engine = %self.name, "Handshake complete");
        Ok(())
    }

    /// Send `go` and wait for `bestmove`, returning the move token.
    ///
    /// All lines before `bestmove` are informational and discarded.
    pub async fn request_move(&mut self, deadline: Duration) -> Result<String, UgiError> {
        let until = Instant::now() + deadline;
        self.send(command::GO).await?;

        loop {
            let event = match timeout_at(until, self.event_rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(UgiError::EngineExited),
                Err(_) => return Err(UgiError::Timeout),
            };
            match event {
                SessionEvent::Message(UgiMessage::BestMove { mv, .. }) => return Ok(mv),
                SessionEvent::Message(other) => {
                    tracing::trace!(engine = %self.name, ?other, "Discarding pre-bestmove line");
                }
                SessionEvent::Eof => return Err(UgiError::EngineExited),
            }
        }
    }

    /// Apply a move to the engine's internal state. Fire-and-forget with a
    /// short settling delay; no response is expected.
    pub async fn apply_move(&mut self, mv: &str) -> Result<(), UgiError> {
        self.send(&command::make_move(mv)).await?;
        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Install an alternative initial state via `position fen`.
    ///
    /// The engine gives no direct reply; an `isready` probe confirms it is
    /// still responsive afterwards. A silent engine means the position
    /// command is unsupported and setup has failed.
    pub async fn set_position(&mut self, fen: &str) -> Result<(), UgiError> {
        self.send(&command::position_fen(fen)).await?;
        match self.probe_ready(SETUP_PROBE_DEADLINE).await {
            Ok(()) => Ok(()),
            Err(UgiError::Timeout) => Err(UgiError::SetupFailed(format!(
                "no readyok after position command (fen: {})",
                fen
            ))),
            Err(e) => Err(e),
        }
    }

    /// Send `isready` and wait for `readyok`.
    pub async fn probe_ready(&mut self, deadline: Duration) -> Result<(), UgiError> {
        let until = Instant::now() + deadline;
        self.send(command::IS_READY).await?;
        self.await_event(until, |m| matches!(m, UgiMessage::ReadyOk))
            .await
            .map(|_| ())
    }

    /// Send `status` and accumulate the reply.
    ///
    /// Lines are gathered until both players have reported a terminal
    /// result or the deadline elapses; whatever was gathered is returned.
    pub async fn query_status(&mut self, deadline: Duration) -> Result<GameStatus, UgiError> {
        let until = Instant::now() + deadline;
        self.send(command::STATUS).await?;

        let mut status = GameStatus::default();
        let mut saw_state = false;

        loop {
            let event = match timeout_at(until, self.event_rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(UgiError::EngineExited),
                Err(_) => break,
            };
            match event {
                SessionEvent::Message(UgiMessage::Status {
                    state,
                    player_to_move,
                }) => {
                    saw_state = true;
                    status.in_progress = state == "inprogress";
                    if let Some(p) = player_to_move {
                        status.player_to_move = p;
                    }
                }
                SessionEvent::Message(UgiMessage::PlayerResult {
                    player,
                    result,
                    score,
                }) => {
                    if let Some(slot) = status.reports.get_mut(player.saturating_sub(1) as usize) {
                        *slot = Some(PlayerReport { result, score });
                    }
                }
                SessionEvent::Message(other) => {
                    tracing::trace!(engine = %self.name, ?other, "Ignoring line in status reply");
                }
                SessionEvent::Eof => return Err(UgiError::EngineExited),
            }
            if saw_state && (status.in_progress || status.is_complete()) {
                break;
            }
        }

        Ok(status)
    }

    /// Graceful `quit`, then close stdin, then force-kill after the grace
    /// period. Consumes the session; every spawned process is reaped.
    pub async fn shutdown(mut self) {
        let _ = self.stdin_tx.send(format!("{}\n", command::QUIT)).await;
        drop(self.stdin_tx);

        match timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(exit)) => {
                tracing::debug!(engine = %self.name, ?exit, "Engine exited cleanly");
            }
            _ => {
                tracing::warn!(engine = %self.name, "Engine did not quit in time, killing");
                let _ = self.child.kill().await;
            }
        }
    }

    async fn send(&mut self, cmd: &str) -> Result<(), UgiError> {
        self.stdin_tx
            .send(format!("{}\n", cmd))
            .await
            .map_err(|_| UgiError::EngineExited)
    }

    async fn await_ack(
        &mut self,
        until: Instant,
        accept: impl Fn(&UgiMessage) -> bool,
    ) -> Result<UgiMessage, UgiError> {
        match self.await_event(until, accept).await {
            Err(UgiError::Timeout) => Err(UgiError::HandshakeTimeout),
            Err(UgiError::EngineExited) => {
                Err(UgiError::HandshakeRejected("engine closed its pipe".to_string()))
            }
            other => other,
        }
    }

    /// Scan the event stream in arrival order until `accept` matches.
    async fn await_event(
        &mut self,
        until: Instant,
        accept: impl Fn(&UgiMessage) -> bool,
    ) -> Result<UgiMessage, UgiError> {
        loop {
            let event = match timeout_at(until, self.event_rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(UgiError::EngineExited),
                Err(_) => return Err(UgiError::Timeout),
            };
            match event {
                SessionEvent::Message(msg) if accept(&msg) => return Ok(msg),
                SessionEvent::Message(other) => {
                    tracing::trace!(engine = %self.name, ?other, "Skipping line");
                }
                SessionEvent::Eof => return Err(UgiError::EngineExited),
            }
        }
    }
}

async fn read_stdout(
    name: String,
    stdout: tokio::process::ChildStdout,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::debug!(engine = %name, "Engine stdout EOF");
                let _ = event_tx.send(SessionEvent::Eof).await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                tracing::trace!(engine = %name, "UGI << {}", trimmed);
                match parse_ugi_message(trimmed) {
                    Ok(UgiMessage::Comment) => {}
                    Ok(msg) => {
                        if event_tx.send(SessionEvent::Message(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(engine = %name, "Unparseable line treated as chatter: {}", e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(engine = %name, "Error reading engine stdout: {}", e);
                let _ = event_tx.send(SessionEvent::Eof).await;
                break;
            }
        }
    }
}

async fn read_stderr(name: String, stderr: tokio::process::ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                tracing::debug!(engine = %name, "engine stderr: {}", line.trim_end());
            }
        }
    }
}

async fn write_stdin(
    name: String,
    mut stdin: tokio::process::ChildStdin,
    mut stdin_rx: mpsc::Receiver<String>,
) {
    while let Some(cmd) = stdin_rx.recv().await {
        tracing::trace!(engine = %name, "UGI >> {}", cmd.trim_end());
        if let Err(e) = stdin.write_all(cmd.as_bytes()).await {
            tracing::warn!(engine = %name, "Failed to write to engine stdin: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::warn!(engine = %name, "Failed to flush engine stdin: {}", e);
            break;
        }
    }
    // Dropping stdin closes the pipe; a well-behaved engine exits on EOF.
}

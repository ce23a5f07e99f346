/// Incoming message from a UGI engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UgiMessage {
    UgiOk,
    ReadyOk,
    Id {
        field: String,
        value: String,
    },
    BestMove {
        mv: String,
        ponder: Option<String>,
    },
    /// `status <state> playertomove <n>`
    Status {
        state: String,
        player_to_move: Option<u8>,
    },
    /// `info player <n> result <r> score <s>`
    PlayerResult {
        player: u8,
        result: String,
        score: Option<String>,
    },
    /// Any `info` line that does not carry a player result.
    Info(String),
    /// Lines starting with `#`.
    Comment,
    /// Anything else. Unknown lines never fail a session.
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

/// Parse one line from an engine.
///
/// Trailing whitespace is tolerated; only lines that start with a known
/// keyword but are missing required fields produce an error. Everything
/// unrecognized comes back as `Unknown` so callers can log and move on.
pub fn parse_ugi_message(line: &str) -> Result<UgiMessage, ProtocolError> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Ok(UgiMessage::Unknown(String::new()));
    }
    if trimmed.starts_with('#') {
        return Ok(UgiMessage::Comment);
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();

    match tokens[0] {
        "ugiok" => Ok(UgiMessage::UgiOk),
        "readyok" => Ok(UgiMessage::ReadyOk),

        "id" => {
            if tokens.len() < 3 {
                return Err(ProtocolError::MalformedMessage(trimmed.to_string()));
            }
            Ok(UgiMessage::Id {
                field: tokens[1].to_string(),
                value: tokens[2..].join(" "),
            })
        }

        "bestmove" => {
            if tokens.len() < 2 {
                return Err(ProtocolError::MalformedMessage(trimmed.to_string()));
            }
            let ponder = if tokens.len() >= 4 && tokens[2] == "ponder" {
                Some(tokens[3].to_string())
            } else {
                None
            };
            Ok(UgiMessage::BestMove {
                mv: tokens[1].to_string(),
                ponder,
            })
        }

        "status" => {
            if tokens.len() < 2 {
                return Err(ProtocolError::MalformedMessage(trimmed.to_string()));
            }
            let player_to_move = find_value(&tokens, "playertomove").and_then(|s| s.parse().ok());
            Ok(UgiMessage::Status {
                state: tokens[1].to_string(),
                player_to_move,
            })
        }

        "info" => parse_info_line(trimmed, &tokens[1..]),

        _ => Ok(UgiMessage::Unknown(trimmed.to_string())),
    }
}

/// `info player <n> result <r> [score <s>]` carries terminal state; any
/// other `info` line is search chatter.
fn parse_info_line(line: &str, tokens: &[&str]) -> Result<UgiMessage, ProtocolError> {
    if tokens.first() != Some(&"player") {
        return Ok(UgiMessage::Info(line.to_string()));
    }

    let player: u8 = tokens
        .get(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtocolError::MalformedMessage(line.to_string()))?;
    let result = find_value(tokens, "result")
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::MalformedMessage(line.to_string()))?;
    let score = find_value(tokens, "score").map(str::to_string);

    Ok(UgiMessage::PlayerResult {
        player,
        result,
        score,
    })
}

fn find_value<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    tokens
        .iter()
        .position(|&t| t == key)
        .and_then(|i| tokens.get(i + 1))
        .copied()
}

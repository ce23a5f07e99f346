//! JSON configuration: the tournament document and the engine roster.
//!
//! Loader behavior: a missing file yields an empty configuration with one
//! warning; malformed JSON is fatal; unknown keys are ignored.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tournament::types::{EngineSpec, MatchSet};

/// Default configuration path, overridable via `ENGINES_CONFIG`.
const DEFAULT_CONFIG_PATH: &str = "engines.json";

/// Default database path, overridable via `ARENA_DB`.
const DEFAULT_DB_PATH: &str = "arena.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArenaConfig {
    pub tournament: TournamentSection,
    pub engines: Vec<EngineEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TournamentSection {
    pub name: String,
    pub description: Option<String>,
    pub time_control: String,
    pub rounds: Option<u64>,
    pub games_per_pair: Option<i64>,
    pub concurrency: Option<usize>,
    pub default_match_set: Option<String>,
    pub match_sets: Vec<MatchSet>,
}

impl Default for TournamentSection {
    fn default() -> Self {
        Self {
            name: "arena".to_string(),
            description: None,
            time_control: "10+1".to_string(),
            rounds: None,
            games_per_pair: None,
            concurrency: None,
            default_match_set: None,
            match_sets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineEntry {
    pub name: String,
    pub executable: PathBuf,
    pub working_directory: Option<PathBuf>,
    pub arguments: Vec<String>,
    pub initial_rating: i64,
    pub enabled: bool,
    pub description: Option<String>,
    /// Free-form UGI options; string, number, and bool values are all
    /// flattened to strings on the wire.
    pub options: BTreeMap<String, serde_json::Value>,
    pub env: BTreeMap<String, String>,
}

impl Default for EngineEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            executable: PathBuf::new(),
            working_directory: None,
            arguments: Vec::new(),
            initial_rating: 1500,
            enabled: true,
            description: None,
            options: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }
}

impl EngineEntry {
    /// Launch configuration for this engine under its persistent id.
    pub fn spec(&self, id: i64) -> EngineSpec {
        EngineSpec {
            id,
            name: self.name.clone(),
            executable: self.executable.clone(),
            working_dir: self.working_directory.clone(),
            args: self.arguments.clone(),
            options: self
                .options
                .iter()
                .map(|(k, v)| (k.clone(), option_value_to_string(v)))
                .collect(),
            env: self.env.clone(),
        }
    }
}

fn option_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ArenaConfig {
    /// Load from `path`, or from `ENGINES_CONFIG`/the default path when
    /// none is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Config file {} not found, starting with no engines",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io { path, source: e }),
        };

        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse { path, source: e })
    }

    pub fn enabled_engines(&self) -> impl Iterator<Item = &EngineEntry> {
        self.engines.iter().filter(|e| e.enabled)
    }
}

pub fn default_config_path() -> PathBuf {
    match std::env::var("ENGINES_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

pub fn default_db_path() -> PathBuf {
    match std::env::var("ARENA_DB") {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from(DEFAULT_DB_PATH),
    }
}

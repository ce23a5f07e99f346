//! Weighted pairing and the bounded working set of in-flight match sets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::elo::EloUpdater;
use crate::runner::{Connector, MatchRunner};
use crate::store::{EngineRow, EngineStore, MatchStore, RecentGame};
use crate::types::{EngineSpec, MatchSet, TimeControl};

/// Window for the volatility signal.
pub const VOLATILITY_WINDOW_HOURS: u32 = 24;

/// Shortlist size for weighted sampling.
const SHORTLIST: usize = 5;

/// Wait before retrying when no pair is eligible.
const EMPTY_POOL_RETRY: Duration = Duration::from_secs(5);

/// Backoff between attempts to persist a finished match set.
const RECORD_BACKOFF: Duration = Duration::from_secs(5);
const RECORD_ATTEMPTS: u32 = 3;

/// Per-engine volatility terms from recent games, newest first.
///
/// An engine needs at least two recent games; the term is the mean absolute
/// rating movement over its last ten observations, scaled down and capped.
pub fn volatility_terms(recent: &[RecentGame]) -> HashMap<i64, f64> {
    let mut observations: HashMap<i64, Vec<i64>> = HashMap::new();
    for game in recent {
        observations
            .entry(game.engine1_id)
            .or_default()
            .push(game.engine1_rating_before);
        observations
            .entry(game.engine2_id)
            .or_default()
            .push(game.engine2_rating_before);
    }

    let mut terms = HashMap::new();
    for (id, ratings) in observations {
        if ratings.len() < 2 {
            continue;
        }
        let window = &ratings[..ratings.len().min(10)];
        let deltas: Vec<f64> = window
            .windows(2)
            .map(|w| (w[0] - w[1]).abs() as f64)
            .collect();
        let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
        terms.insert(id, (mean / 100.0).min(0.5));
    }
    terms
}

/// §"informative pairing" score for one unordered pair.
///
/// Blend of how uncertain both ratings are, how close they sit, how strong
/// the pair is, and how often it has already been played.
pub fn pair_weight(
    a: &EngineRow,
    b: &EngineRow,
    volatility: &HashMap<i64, f64>,
    games_between: i64,
) -> f64 {
    let uncertainty_of = |e: &EngineRow| {
        let base = (1.0 - e.games_played as f64 / 100.0).max(0.1);
        base + volatility.get(&e.id).copied().unwrap_or(0.0)
    };
    let uncertainty = (uncertainty_of(a) + uncertainty_of(b)) / 2.0;
    let proximity = 1.0 / (1.0 + (a.rating - b.rating).abs() as f64 / 200.0);
    let preference = ((a.rating + b.rating) as f64 / 2.0 / 2000.0).min(1.0);
    let frequency = (1.0 - games_between as f64 / 50.0).max(0.1);

    0.4 * uncertainty + 0.3 * proximity + 0.2 * preference + 0.1 * frequency
}

/// Pick the next pair: rank all unordered pairs by weight, keep the top
/// five, sample one proportionally to weight. Ties keep the lower pair
/// index. Returns `None` when no pair has positive weight.
pub fn select_pair(
    engines: &[EngineRow],
    pair_counts: &HashMap<(i64, i64), i64>,
    volatility: &HashMap<i64, f64>,
    pair_games_cap: Option<i64>,
    rng: &mut impl Rng,
) -> Option<(i64, i64)> {
    let mut candidates: Vec<((i64, i64), f64)> = Vec::new();
    for (i, a) in engines.iter().enumerate() {
        for b in engines.iter().skip(i + 1) {
            let key = (a.id.min(b.id), a.id.max(b.id));
            let between = pair_counts.get(&key).copied().unwrap_or(0);
            if let Some(cap) = pair_games_cap {
                if between >= cap {
                    continue;
                }
            }
            let weight = pair_weight(a, b, volatility, between);
            if weight > 0.0 {
                candidates.push(((a.id, b.id), weight));
            }
        }
    }
    if candidates.is_empty() {
        return None;
    }

    // Stable sort: equal weights keep enumeration (pair-index) order.
    candidates.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(SHORTLIST);

    let total: f64 = candidates.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen::<f64>() * total;
    for (pair, weight) in &candidates {
        roll -= weight;
        if roll <= 0.0 {
            return Some(*pair);
        }
    }
    candidates.last().map(|(pair, _)| *pair)
}

pub struct SchedulerConfig {
    pub concurrency: usize,
    pub time_control: TimeControl,
    pub k_factor: f64,
    /// Stop after launching this many match sets; `None` runs until
    /// shutdown.
    pub max_match_sets: Option<u64>,
    /// Exclude pairs that have accumulated this many games.
    pub pair_games_cap: Option<i64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            time_control: TimeControl::default(),
            k_factor: crate::elo::DEFAULT_K_FACTOR,
            max_match_sets: None,
            pair_games_cap: None,
        }
    }
}

/// Fills a bounded working set of match-set tasks, refilling from fresh
/// engine stats whenever one completes, until told to shut down.
pub struct Scheduler<S, C> {
    store: S,
    connector: Arc<C>,
    specs: HashMap<i64, EngineSpec>,
    match_sets: Vec<MatchSet>,
    default_match_set: Option<String>,
    config: SchedulerConfig,
}

impl<S, C> Scheduler<S, C>
where
    S: EngineStore + MatchStore + Clone + Send + Sync + 'static,
    C: Connector + Send + Sync + 'static,
{
    pub fn new(
        store: S,
        connector: Arc<C>,
        specs: HashMap<i64, EngineSpec>,
        match_sets: Vec<MatchSet>,
        default_match_set: Option<String>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            connector,
            specs,
            match_sets,
            default_match_set,
            config,
        }
    }

    /// Run until the shutdown signal flips, then drain in-flight match
    /// sets without cancelling them.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut launched: u64 = 0;
        let mut draining = *shutdown.borrow();

        loop {
            while !draining
                && in_flight.len() < self.config.concurrency
                && self.budget_left(launched)
            {
                if self.launch_one(&mut in_flight).await {
                    launched += 1;
                } else {
                    break;
                }
            }

            if in_flight.is_empty() {
                if draining || !self.budget_left(launched) {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_POOL_RETRY) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            draining = true;
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    if let Some(Err(e)) = joined {
                        tracing::error!("Match set task failed: {}", e);
                    }
                }
                changed = shutdown.changed(), if !draining => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown requested, draining in-flight match sets");
                        draining = true;
                    }
                }
            }
        }

        tracing::info!(launched, "Scheduler stopped");
    }

    fn budget_left(&self, launched: u64) -> bool {
        self.config
            .max_match_sets
            .map(|max| launched < max)
            .unwrap_or(true)
    }

    /// Pick a pair from fresh stats and spawn its match set. Returns false
    /// when nothing can be launched right now; persistence errors are
    /// logged and treated the same way.
    async fn launch_one(&self, in_flight: &mut JoinSet<()>) -> bool {
        let picked = match self.pick_pair().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Could not read scheduling stats: {}", e);
                None
            }
        };
        let Some((id1, id2)) = picked else {
            return false;
        };
        let (Some(spec1), Some(spec2)) = (self.specs.get(&id1), self.specs.get(&id2)) else {
            return false;
        };

        let spec1 = spec1.clone();
        let spec2 = spec2.clone();
        let match_set = self.choose_match_set();
        let runner = MatchRunner::new(self.connector.clone(), self.config.time_control);
        let updater = EloUpdater::with_k_factor(self.store.clone(), self.config.k_factor);

        tracing::info!(
            engine1 = %spec1.name,
            engine2 = %spec2.name,
            match_set = %match_set.name,
            "Scheduling match set"
        );

        in_flight.spawn(async move {
            let result = runner.run(&spec1, &spec2, &match_set).await;
            for attempt in 1..=RECORD_ATTEMPTS {
                match updater.record(&result).await {
                    Ok(_) => return,
                    Err(e) => {
                        tracing::warn!(attempt, "Failed to record match set: {}", e);
                        if attempt < RECORD_ATTEMPTS {
                            tokio::time::sleep(RECORD_BACKOFF).await;
                        }
                    }
                }
            }
            tracing::error!(
                engine1 = %spec1.name,
                engine2 = %spec2.name,
                "Giving up on recording match set"
            );
        });
        true
    }

    async fn pick_pair(&self) -> Result<Option<(i64, i64)>, crate::store::StoreError> {
        let engines = self.store.engines_for_scheduling().await?;
        // Only engines with launch configuration can play.
        let launchable: Vec<EngineRow> = engines
            .into_iter()
            .filter(|e| self.specs.contains_key(&e.id))
            .collect();
        if launchable.len() < 2 {
            return Ok(None);
        }

        let recent = self.store.recent_games(VOLATILITY_WINDOW_HOURS).await?;
        let counts = self.store.pair_game_counts().await?;
        let volatility = volatility_terms(&recent);

        Ok(select_pair(
            &launchable,
            &counts,
            &volatility,
            self.config.pair_games_cap,
            &mut rand::thread_rng(),
        ))
    }

    fn choose_match_set(&self) -> MatchSet {
        if let Some(name) = &self.default_match_set {
            if let Some(found) = self.match_sets.iter().find(|m| &m.name == name) {
                return found.clone();
            }
        }
        self.match_sets
            .first()
            .cloned()
            .unwrap_or_else(MatchSet::synthetic)
    }
}

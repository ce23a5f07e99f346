//! Aggregate Elo updates, applied once per match set.
//!
//! Updating per match set instead of per game is what makes the balanced
//! color rotation matter: the white-advantage bias cancels inside the
//! aggregate before the rating signal is extracted.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::{GameRow, MatchStore, MatchTx, StoreError, WldDelta};
use crate::types::{GameOutcome, GameRecord, MatchSetResult};

/// Default K-factor: the maximum rating change a single match set can apply.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Expected score of a player rated `r1` against one rated `r2`.
pub fn expected_score(r1: f64, r2: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((r2 - r1) / 400.0))
}

/// Rating deltas for both engines of a match set.
///
/// Rounding is independent per engine, so the pair's total rating is
/// preserved to within one point.
pub fn aggregate_deltas(
    rating1: i64,
    rating2: i64,
    score1: f64,
    score2: f64,
    scored_games: u32,
    k: f64,
) -> (i64, i64) {
    if scored_games == 0 {
        return (0, 0);
    }
    let n = scored_games as f64;
    let e1 = expected_score(rating1 as f64, rating2 as f64);
    let e2 = 1.0 - e1;
    let a1 = score1 / n;
    let a2 = score2 / n;
    ((k * (a1 - e1)).round() as i64, (k * (a2 - e2)).round() as i64)
}

/// Applied rating change, reported back to the scheduler for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingUpdate {
    pub rating1_before: i64,
    pub rating2_before: i64,
    pub engine1_delta: i64,
    pub engine2_delta: i64,
    pub scored_games: u32,
}

/// Transactionally persists a [`MatchSetResult`] and applies the aggregate
/// rating change. One transaction covers the game rows, the rating reads,
/// and both engine updates.
pub struct EloUpdater<S> {
    store: S,
    k_factor: f64,
}

impl<S: MatchStore> EloUpdater<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            k_factor: DEFAULT_K_FACTOR,
        }
    }

    pub fn with_k_factor(store: S, k_factor: f64) -> Self {
        Self { store, k_factor }
    }

    /// Record every game of the match set and update both ratings, or
    /// change nothing at all.
    pub async fn record(&self, result: &MatchSetResult) -> Result<RatingUpdate, StoreError> {
        let mut tx = self.store.begin().await?;
        match Self::record_in_tx(&mut tx, result, self.k_factor).await {
            Ok(update) => {
                tx.commit().await?;
                tracing::info!(
                    engine1 = result.engine1_id,
                    engine2 = result.engine2_id,
                    match_set = %result.match_set,
                    delta1 = update.engine1_delta,
                    delta2 = update.engine2_delta,
                    scored = update.scored_games,
                    "Match set recorded"
                );
                Ok(update)
            }
            Err(e) => {
                tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn record_in_tx<T: MatchTx>(
        tx: &mut T,
        result: &MatchSetResult,
        k: f64,
    ) -> Result<RatingUpdate, StoreError> {
        let rating1 = tx.rating_of(result.engine1_id).await?;
        let rating2 = tx.rating_of(result.engine2_id).await?;
        let played_at = now_timestamp();

        for game in &result.games {
            let row = game_row(game, result, rating1, rating2, played_at)?;
            tx.insert_game(&row).await?;
        }

        let scored = result.scored_games() as u32;
        let (delta1, delta2) = aggregate_deltas(
            rating1,
            rating2,
            result.engine1_score,
            result.engine2_score,
            scored,
            k,
        );

        if scored > 0 {
            let (wld1, wld2) = wld_deltas(&result.games);
            tx.update_engine(result.engine1_id, rating1 + delta1, scored as i64, wld1)
                .await?;
            tx.update_engine(result.engine2_id, rating2 + delta2, scored as i64, wld2)
                .await?;
        }

        Ok(RatingUpdate {
            rating1_before: rating1,
            rating2_before: rating2,
            engine1_delta: delta1,
            engine2_delta: delta2,
            scored_games: scored,
        })
    }
}

fn game_row(
    game: &GameRecord,
    result: &MatchSetResult,
    rating1: i64,
    rating2: i64,
    played_at: i64,
) -> Result<GameRow, StoreError> {
    let winner_id = match game.outcome {
        GameOutcome::Win => Some(result.engine1_id),
        GameOutcome::Loss => Some(result.engine2_id),
        GameOutcome::Draw | GameOutcome::Error => None,
    };
    let final_status = game
        .final_status
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok(GameRow {
        engine1_id: result.engine1_id,
        engine2_id: result.engine2_id,
        winner_id,
        is_draw: game.outcome == GameOutcome::Draw,
        engine1_rating_before: rating1,
        engine2_rating_before: rating2,
        moves: serde_json::to_string(&game.moves)?,
        duration_ms: game.duration.as_millis() as i64,
        error: game.error.clone(),
        final_status,
        starting_position: game.starting_position.clone(),
        match_set_name: game.match_set.clone(),
        engine1_color: game.engine1_color,
        engine2_color: game.engine1_color.opposite(),
        played_at,
    })
}

fn wld_deltas(games: &[GameRecord]) -> (WldDelta, WldDelta) {
    let mut wld1 = WldDelta::default();
    let mut wld2 = WldDelta::default();
    for game in games {
        match game.outcome {
            GameOutcome::Win => {
                wld1.wins += 1;
                wld2.losses += 1;
            }
            GameOutcome::Loss => {
                wld1.losses += 1;
                wld2.wins += 1;
            }
            GameOutcome::Draw => {
                wld1.draws += 1;
                wld2.draws += 1;
            }
            GameOutcome::Error => {}
        }
    }
    (wld1, wld2)
}

fn now_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_game, MemoryStore};
    use crate::types::{Color, GameOutcome};

    fn match_set_result(games: Vec<GameRecord>) -> MatchSetResult {
        let (mut s1, mut s2) = (0.0, 0.0);
        for g in &games {
            let (a, b) = g.outcome.scores();
            s1 += a;
            s2 += b;
        }
        let completed = games.iter().all(|g| g.outcome != GameOutcome::Error);
        MatchSetResult {
            engine1_id: 1,
            engine2_id: 2,
            match_set: "test-set".to_string(),
            games,
            engine1_score: s1,
            engine2_score: s2,
            completed,
        }
    }

    #[test]
    fn test_expected_score_equal_ratings() {
        assert!((expected_score(1500.0, 1500.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_expected_score_sums_to_one() {
        let e1 = expected_score(1400.0, 1600.0);
        let e2 = expected_score(1600.0, 1400.0);
        assert!((e1 + e2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_upset_sweep_deltas() {
        // S2: 1400 beats 1600 twice. E1 ~ 0.240, delta = round(32 * 0.760).
        let (d1, d2) = aggregate_deltas(1400, 1600, 2.0, 0.0, 2, DEFAULT_K_FACTOR);
        assert_eq!(d1, 24);
        assert_eq!(d2, -24);
    }

    #[test]
    fn test_split_result_is_neutral() {
        // S1: equal ratings, one win each.
        let (d1, d2) = aggregate_deltas(1500, 1500, 1.0, 1.0, 2, DEFAULT_K_FACTOR);
        assert_eq!((d1, d2), (0, 0));
    }

    #[test]
    fn test_rating_conservation_within_one_point() {
        for (r1, r2, s1) in [
            (1500, 1503, 1.5),
            (1421, 1688, 0.5),
            (1800, 1300, 3.0),
            (1650, 1649, 2.5),
        ] {
            let n = 4;
            let s2 = n as f64 - s1;
            let (d1, d2) = aggregate_deltas(r1, r2, s1, s2, n, DEFAULT_K_FACTOR);
            assert!((d1 + d2).abs() <= 1, "deltas {} {} for {} vs {}", d1, d2, r1, r2);
        }
    }

    #[test]
    fn test_delta_bounded_by_k() {
        let (d1, d2) = aggregate_deltas(1000, 2400, 6.0, 0.0, 6, DEFAULT_K_FACTOR);
        assert!(d1.abs() <= DEFAULT_K_FACTOR as i64);
        assert!(d2.abs() <= DEFAULT_K_FACTOR as i64);
    }

    #[test]
    fn test_symmetry_under_engine_swap() {
        let (d1, d2) = aggregate_deltas(1450, 1580, 3.5, 2.5, 6, DEFAULT_K_FACTOR);
        let (d2s, d1s) = aggregate_deltas(1580, 1450, 2.5, 3.5, 6, DEFAULT_K_FACTOR);
        assert_eq!((d1, d2), (d1s, d2s));
    }

    #[test]
    fn test_zero_scored_games_no_change() {
        assert_eq!(aggregate_deltas(1500, 1600, 0.0, 0.0, 0, 32.0), (0, 0));
    }

    #[tokio::test]
    async fn test_record_equal_split() {
        // S1: two equal engines trade wins; no rating movement, counters move.
        let store = MemoryStore::new();
        let e1 = store.seed_engine("alpha", 1500).await;
        let e2 = store.seed_engine("beta", 1500).await;

        let mut result = match_set_result(vec![
            sample_game(GameOutcome::Win, Color::White),
            sample_game(GameOutcome::Loss, Color::Black),
        ]);
        result.engine1_id = e1;
        result.engine2_id = e2;

        let update = EloUpdater::new(store.clone()).record(&result).await.unwrap();
        assert_eq!(update.engine1_delta, 0);
        assert_eq!(update.engine2_delta, 0);

        let snap1 = store.engine_snapshot(e1);
        let snap2 = store.engine_snapshot(e2);
        assert_eq!(snap1.rating, 1500);
        assert_eq!(snap1.games_played, 2);
        assert_eq!((snap1.wins, snap1.losses, snap1.draws), (1, 1, 0));
        assert_eq!((snap2.wins, snap2.losses, snap2.draws), (1, 1, 0));
        assert_eq!(store.game_count(), 2);
    }

    #[tokio::test]
    async fn test_record_draw_sweep() {
        // S3: three positions, six games, all drawn.
        let store = MemoryStore::new();
        let e1 = store.seed_engine("alpha", 1500).await;
        let e2 = store.seed_engine("beta", 1500).await;

        let games = (0..6)
            .map(|i| {
                sample_game(
                    GameOutcome::Draw,
                    if i % 2 == 0 { Color::White } else { Color::Black },
                )
            })
            .collect();
        let mut result = match_set_result(games);
        result.engine1_id = e1;
        result.engine2_id = e2;

        let update = EloUpdater::new(store.clone()).record(&result).await.unwrap();
        assert_eq!(update.engine1_delta, 0);
        assert_eq!(update.engine2_delta, 0);

        for id in [e1, e2] {
            let snap = store.engine_snapshot(id);
            assert_eq!(snap.rating, 1500);
            assert_eq!(snap.games_played, 6);
            assert_eq!(snap.draws, 6);
        }
    }

    #[tokio::test]
    async fn test_record_skips_error_games_in_denominator() {
        // S4: win, error, draw, loss over two positions.
        let store = MemoryStore::new();
        let e1 = store.seed_engine("alpha", 1500).await;
        let e2 = store.seed_engine("beta", 1500).await;

        let mut error_game = sample_game(GameOutcome::Error, Color::Black);
        error_game.error = Some("engine crashed".to_string());

        let mut result = match_set_result(vec![
            sample_game(GameOutcome::Win, Color::White),
            error_game,
            sample_game(GameOutcome::Draw, Color::White),
            sample_game(GameOutcome::Loss, Color::Black),
        ]);
        result.engine1_id = e1;
        result.engine2_id = e2;
        assert!(!result.completed);
        assert_eq!(result.scored_games(), 3);
        assert_eq!(result.engine1_score, 1.5);

        let update = EloUpdater::new(store.clone()).record(&result).await.unwrap();
        assert_eq!(update.scored_games, 3);
        // A1 = 0.5 at equal ratings: no movement.
        assert_eq!(update.engine1_delta, 0);

        let snap = store.engine_snapshot(e1);
        assert_eq!(snap.games_played, 3);
        assert_eq!((snap.wins, snap.losses, snap.draws), (1, 1, 1));
        // The error game is still persisted, with its error text.
        assert_eq!(store.game_count(), 4);
        assert_eq!(store.games_with_error(), 1);
    }

    #[tokio::test]
    async fn test_record_all_error_games_commits_without_rating_change() {
        let store = MemoryStore::new();
        let e1 = store.seed_engine("alpha", 1480).await;
        let e2 = store.seed_engine("beta", 1520).await;

        let mut result = match_set_result(vec![
            sample_game(GameOutcome::Error, Color::White),
            sample_game(GameOutcome::Error, Color::Black),
        ]);
        result.engine1_id = e1;
        result.engine2_id = e2;

        let update = EloUpdater::new(store.clone()).record(&result).await.unwrap();
        assert_eq!(update.scored_games, 0);
        assert_eq!(store.game_count(), 2);
        assert_eq!(store.engine_snapshot(e1).rating, 1480);
        assert_eq!(store.engine_snapshot(e1).games_played, 0);
    }

    #[tokio::test]
    async fn test_record_rolls_back_on_insert_failure() {
        let store = MemoryStore::new();
        let e1 = store.seed_engine("alpha", 1400).await;
        let e2 = store.seed_engine("beta", 1600).await;
        store.fail_next_insert();

        let mut result = match_set_result(vec![
            sample_game(GameOutcome::Win, Color::White),
            sample_game(GameOutcome::Win, Color::Black),
        ]);
        result.engine1_id = e1;
        result.engine2_id = e2;

        let err = EloUpdater::new(store.clone()).record(&result).await;
        assert!(err.is_err());
        // Nothing from the aborted transaction is observable.
        assert_eq!(store.game_count(), 0);
        assert_eq!(store.engine_snapshot(e1).rating, 1400);
        assert_eq!(store.engine_snapshot(e2).rating, 1600);
    }
}

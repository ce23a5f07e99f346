//! `tournament` storage traits over SQLite, plus the read-only queries the
//! CLI surfaces (rankings, engine listings).

use std::collections::HashMap;

use sqlx::{Sqlite, SqlitePool, Transaction};

use tournament::store::{
    EngineRow, EngineStore, GameRow, MatchStore, MatchTx, RecentGame, StoreError, WldDelta,
};

use crate::persistence::now_timestamp;

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Full engine row for CLI listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EngineDetail {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub rating: i64,
    pub games_played: i64,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn engine_by_id(&self, id: i64) -> Result<Option<EngineDetail>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT id, name, description, rating, games_played, wins, losses, draws, created_at
            FROM engines
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    pub async fn list_engines(&self) -> Result<Vec<EngineDetail>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT id, name, description, rating, games_played, wins, losses, draws, created_at
            FROM engines
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Engines ordered by rating, strongest first.
    pub async fn rankings(&self, limit: i64) -> Result<Vec<EngineDetail>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT id, name, description, rating, games_played, wins, losses, draws, created_at
            FROM engines
            ORDER BY rating DESC, name
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Reset rating and description for an existing engine, by name.
    /// Returns false when no such engine exists.
    pub async fn update_engine_meta(
        &self,
        name: &str,
        rating: i64,
        description: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE engines SET rating = ?, description = COALESCE(?, description) WHERE name = ?",
        )
        .bind(rating)
        .bind(description)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn game_count(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM games")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }
}

impl EngineStore for SqliteStore {
    async fn add_engine(
        &self,
        name: &str,
        rating: i64,
        description: Option<&str>,
    ) -> Result<i64, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO engines (name, description, rating, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(description.unwrap_or(""))
        .bind(rating)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let row: (i64,) = sqlx::query_as("SELECT id FROM engines WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }

    async fn engines_for_scheduling(&self) -> Result<Vec<EngineRow>, StoreError> {
        let rows: Vec<(i64, String, i64, i64)> =
            sqlx::query_as("SELECT id, name, rating, games_played FROM engines ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, rating, games_played)| EngineRow {
                id,
                name,
                rating,
                games_played,
            })
            .collect())
    }

    async fn recent_games(&self, hours: u32) -> Result<Vec<RecentGame>, StoreError> {
        let cutoff = now_timestamp() - i64::from(hours) * 3600;
        let rows: Vec<(i64, i64, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT engine1_id, engine2_id, engine1_rating_before, engine2_rating_before, played_at
            FROM games
            WHERE played_at >= ?
            ORDER BY played_at DESC, id DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(e1, e2, r1, r2, at)| RecentGame {
                engine1_id: e1,
                engine2_id: e2,
                engine1_rating_before: r1,
                engine2_rating_before: r2,
                played_at: at,
            })
            .collect())
    }

    async fn pair_game_counts(&self) -> Result<HashMap<(i64, i64), i64>, StoreError> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT engine1_id, engine2_id, COUNT(*) FROM games GROUP BY engine1_id, engine2_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // Both orientations fold into one unordered key.
        let mut counts = HashMap::new();
        for (e1, e2, n) in rows {
            *counts.entry((e1.min(e2), e1.max(e2))).or_insert(0) += n;
        }
        Ok(counts)
    }
}

pub struct SqliteMatchTx {
    tx: Transaction<'static, Sqlite>,
}

impl MatchStore for SqliteStore {
    type Tx = SqliteMatchTx;

    async fn begin(&self) -> Result<SqliteMatchTx, StoreError> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(SqliteMatchTx { tx })
    }
}

impl MatchTx for SqliteMatchTx {
    async fn rating_of(&mut self, engine_id: i64) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT rating FROM engines WHERE id = ?")
            .bind(engine_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.map(|(r,)| r).ok_or(StoreError::UnknownEngine(engine_id))
    }

    async fn insert_game(&mut self, row: &GameRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO games
                (engine1_id, engine2_id, winner_id, is_draw,
                 engine1_rating_before, engine2_rating_before,
                 moves, duration_ms, error, final_status,
                 starting_position, match_set_name,
                 engine1_color, engine2_color, played_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.engine1_id)
        .bind(row.engine2_id)
        .bind(row.winner_id)
        .bind(row.is_draw)
        .bind(row.engine1_rating_before)
        .bind(row.engine2_rating_before)
        .bind(&row.moves)
        .bind(row.duration_ms)
        .bind(&row.error)
        .bind(&row.final_status)
        .bind(&row.starting_position)
        .bind(&row.match_set_name)
        .bind(row.engine1_color.as_str())
        .bind(row.engine2_color.as_str())
        .bind(row.played_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_engine(
        &mut self,
        engine_id: i64,
        new_rating: i64,
        games_delta: i64,
        wld: WldDelta,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE engines
            SET rating = ?,
                games_played = games_played + ?,
                wins = wins + ?,
                losses = losses + ?,
                draws = draws + ?
            WHERE id = ?
            "#,
        )
        .bind(new_rating)
        .bind(games_delta)
        .bind(wld.wins)
        .bind(wld.losses)
        .bind(wld.draws)
        .bind(engine_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownEngine(engine_id));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self) {
        let _ = self.tx.rollback().await;
    }
}

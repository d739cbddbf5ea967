use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool, Result as SqlxResult};
use tracing::instrument;
use uuid::Uuid;

use super::sql_fragment::{CLAIM_FIELDS, USER_FIELDS};
use super::{Store, sql_limit};
use crate::constants::UNKNOWN_USER_NAME;
use crate::db::prelude::{Claim, ClaimFilter, ClaimId, ClaimView, User, UserId, UserTotal};
use crate::db::{StoreError, StoreResult};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        total_points BIGINT NOT NULL DEFAULT 0 CHECK (total_points >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS users_total_points_idx ON users (total_points DESC);

    CREATE TABLE IF NOT EXISTS claims (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users (id),
        points BIGINT NOT NULL CHECK (points > 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS claims_user_id_idx ON claims (user_id);
    CREATE INDEX IF NOT EXISTS claims_created_at_idx ON claims (created_at DESC);
"#;

const CLAIM_FILTER: &str = r#"
    ($1::uuid IS NULL OR c.user_id = $1)
    AND ($2::timestamptz IS NULL OR c.created_at >= $2)
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self { pool })
    }

    /// Creates the tables and indexes if they don't exist yet
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::debug!("schema ensured");

        Ok(())
    }
}

fn conflict_or(err: sqlx::Error, name: &str) -> StoreError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Conflict {
            name: name.to_string(),
        },
        e => e.into(),
    }
}

/// In-place increment of a user's lifetime total; `None` if the user does not exist
async fn add_points<'e, E: PgExecutor<'e>>(
    executor: E,
    id: &UserId,
    delta: i64,
) -> SqlxResult<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET total_points = total_points + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_FIELDS}
        "#
    ))
    .bind(id)
    .bind(delta)
    .fetch_optional(executor)
    .await
}

async fn insert_claim<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: &UserId,
    points: i64,
) -> SqlxResult<Claim> {
    sqlx::query_as::<_, Claim>(&format!(
        r#"
        INSERT INTO claims (id, user_id, points, created_at)
        VALUES ($1, $2, $3, NOW())
        RETURNING {CLAIM_FIELDS}
        "#
    ))
    .bind(ClaimId::new())
    .bind(user_id)
    .bind(points)
    .fetch_one(executor)
    .await
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_FIELDS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_FIELDS} FROM users WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn find_users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_FIELDS} FROM users WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn create_user(&self, name: &str) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, total_points, created_at, updated_at)
            VALUES ($1, $2, 0, NOW(), NOW())
            RETURNING {USER_FIELDS}
            "#
        ))
        .bind(UserId::new())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or(e, name))
    }

    #[instrument(skip(self))]
    async fn list_users(&self, skip: usize, limit: usize) -> StoreResult<(Vec<User>, u64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_FIELDS} FROM users
            ORDER BY created_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(sql_limit(limit))
        .bind(sql_limit(skip))
        .fetch_all(&self.pool)
        .await?;

        Ok((users, total.max(0) as u64))
    }

    #[instrument(skip(self))]
    async fn all_users(&self) -> StoreResult<Vec<User>> {
        Ok(
            sqlx::query_as::<_, User>(&format!("SELECT {USER_FIELDS} FROM users"))
                .fetch_all(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self))]
    async fn count_users(&self) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(total.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn increment_user_points(&self, id: &UserId, delta: i64) -> StoreResult<Option<User>> {
        Ok(add_points(&self.pool, id, delta).await?)
    }

    #[instrument(skip(self))]
    async fn append_claim(&self, user_id: &UserId, points: i64) -> StoreResult<Claim> {
        Ok(insert_claim(&self.pool, user_id, points).await?)
    }

    /// Runs the increment and the append inside one transaction
    #[instrument(skip(self))]
    async fn record_claim(
        &self,
        user_id: &UserId,
        points: i64,
    ) -> StoreResult<Option<(User, Claim)>> {
        let mut tx = self.pool.begin().await?;

        let Some(user) = add_points(&mut *tx, user_id, points).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let claim = insert_claim(&mut *tx, user_id, points).await;

        match claim {
            Ok(claim) => {
                tx.commit().await?;
                Ok(Some((user, claim)))
            }
            Err(e) => {
                tracing::error!(error = ?e, "claim insert failed, rolling back award");
                tx.rollback().await?;
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn list_claims(
        &self,
        filter: &ClaimFilter,
        skip: usize,
        limit: usize,
    ) -> StoreResult<(Vec<ClaimView>, u64)> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM claims c WHERE {CLAIM_FILTER}"
        ))
        .bind(filter.user_id)
        .bind(filter.since)
        .fetch_one(&self.pool)
        .await?;

        let claims = sqlx::query_as::<_, ClaimView>(&format!(
            r#"
            SELECT
                c.id,
                c.user_id,
                COALESCE(u.name, $5) AS user_name,
                c.points,
                c.created_at
            FROM claims c
            LEFT JOIN users u ON u.id = c.user_id
            WHERE {CLAIM_FILTER}
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.user_id)
        .bind(filter.since)
        .bind(sql_limit(limit))
        .bind(sql_limit(skip))
        .bind(UNKNOWN_USER_NAME)
        .fetch_all(&self.pool)
        .await?;

        Ok((claims, total.max(0) as u64))
    }

    #[instrument(skip(self))]
    async fn sum_claims_grouped_by_user(
        &self,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<UserTotal>> {
        Ok(sqlx::query_as::<_, UserTotal>(
            r#"
            SELECT user_id, SUM(points)::BIGINT AS total_points
            FROM claims
            WHERE created_at >= $1
            GROUP BY user_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn sum_claims_for_user(&self, id: &UserId) -> StoreResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(points), 0)::BIGINT FROM claims WHERE user_id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?)
    }
}

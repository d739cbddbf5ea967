use core::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::db::prelude::{Claim, ClaimFilter, ClaimView, User, UserId, UserTotal};
use crate::db::{StoreError, StoreResult};

pub mod memory;
pub mod pg;

pub mod sql_fragment {
    pub const USER_FIELDS: &str = r#"
        id,
        name,
        total_points,
        created_at,
        updated_at
    "#;

    pub const CLAIM_FIELDS: &str = r#"
        id,
        user_id,
        points,
        created_at
    "#;
}

/// Storage operations the leaderboard needs from its backing store.
///
/// Implementations must make [`Store::increment_user_points`] an in-place increment so that
/// concurrent claims for the same user never lose an update.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>>;

    /// Fetches the users that exist among `ids`; missing ids are skipped
    async fn find_users(&self, ids: &[UserId]) -> StoreResult<Vec<User>>;

    /// Fails with [`StoreError::Conflict`] if the name is taken
    async fn create_user(&self, name: &str) -> StoreResult<User>;

    /// Users ordered by creation time (oldest first) along with the overall user count
    async fn list_users(&self, skip: usize, limit: usize) -> StoreResult<(Vec<User>, u64)>;

    async fn all_users(&self) -> StoreResult<Vec<User>>;

    async fn count_users(&self) -> StoreResult<u64>;

    /// Returns `Ok(None)` if the user does not exist
    async fn increment_user_points(&self, id: &UserId, delta: i64) -> StoreResult<Option<User>>;

    async fn append_claim(&self, user_id: &UserId, points: i64) -> StoreResult<Claim>;

    /// Increments the user's lifetime total and appends the matching claim as one unit.
    ///
    /// This default composes the two primitives and is therefore not atomic: if the append
    /// fails after the increment went through, [`StoreError::ClaimNotRecorded`] is returned and
    /// the lifetime total stays ahead of the claim log. Stores that can do better should
    /// override it.
    #[instrument(skip(self))]
    async fn record_claim(
        &self,
        user_id: &UserId,
        points: i64,
    ) -> StoreResult<Option<(User, Claim)>> {
        let Some(user) = self.increment_user_points(user_id, points).await? else {
            return Ok(None);
        };

        match self.append_claim(user_id, points).await {
            Ok(claim) => Ok(Some((user, claim))),
            Err(e) => Err(StoreError::ClaimNotRecorded {
                user_id: *user_id,
                points,
                source: Box::new(e),
            }),
        }
    }

    /// Matching claims, newest first, along with the overall match count
    async fn list_claims(
        &self,
        filter: &ClaimFilter,
        skip: usize,
        limit: usize,
    ) -> StoreResult<(Vec<ClaimView>, u64)>;

    /// Per-user sums of claims created at or after `since`
    async fn sum_claims_grouped_by_user(&self, since: DateTime<Utc>)
    -> StoreResult<Vec<UserTotal>>;

    async fn sum_claims_for_user(&self, id: &UserId) -> StoreResult<i64>;
}

fn sql_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

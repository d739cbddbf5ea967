use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::instrument;

use super::Store;
use crate::constants::UNKNOWN_USER_NAME;
use crate::db::prelude::{Claim, ClaimFilter, ClaimView, User, UserId, UserTotal};
use crate::db::{StoreError, StoreResult};

/// Process-local store used when no database is configured, and by tests.
///
/// Every mutation happens under a single write lock, so claims are atomic with respect to
/// the lifetime counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Kept in creation order
    users: Vec<User>,
    claims: Vec<Claim>,
}

impl Inner {
    fn user(&self, id: &UserId) -> Option<&User> {
        self.users.iter().find(|u| &u.id == id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a claim at `at`. `record_claim` calls this with the current time, and tests use it
    /// to place claims inside or outside a window.
    #[instrument(skip(self))]
    pub async fn record_claim_at(
        &self,
        user_id: &UserId,
        points: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<(User, Claim)>> {
        let mut inner = self.inner.write().await;

        let Some(user) = inner.users.iter_mut().find(|u| &u.id == user_id) else {
            return Ok(None);
        };

        user.total_points += points;
        user.updated_at = Utc::now();
        let user = user.clone();

        let claim = Claim::new(*user_id, points, at);
        inner.claims.push(claim.clone());

        Ok(Some((user, claim)))
    }

    #[cfg(test)]
    pub(crate) async fn remove_user(&self, id: &UserId) {
        self.inner.write().await.users.retain(|u| &u.id != id);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.user(id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .iter()
            .find(|u| u.name == name)
            .cloned())
    }

    async fn find_users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        let inner = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| inner.user(id).cloned()).collect())
    }

    #[instrument(skip(self))]
    async fn create_user(&self, name: &str) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        if inner.users.iter().any(|u| u.name == name) {
            return Err(StoreError::Conflict {
                name: name.to_string(),
            });
        }

        let user = User::new(name);
        inner.users.push(user.clone());

        Ok(user)
    }

    async fn list_users(&self, skip: usize, limit: usize) -> StoreResult<(Vec<User>, u64)> {
        let inner = self.inner.read().await;
        let users = inner.users.iter().skip(skip).take(limit).cloned().collect();

        Ok((users, inner.users.len() as u64))
    }

    async fn all_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.inner.read().await.users.clone())
    }

    async fn count_users(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.users.len() as u64)
    }

    #[instrument(skip(self))]
    async fn increment_user_points(&self, id: &UserId, delta: i64) -> StoreResult<Option<User>> {
        let mut inner = self.inner.write().await;

        Ok(inner.users.iter_mut().find(|u| &u.id == id).map(|user| {
            user.total_points += delta;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    #[instrument(skip(self))]
    async fn append_claim(&self, user_id: &UserId, points: i64) -> StoreResult<Claim> {
        let claim = Claim::new(*user_id, points, Utc::now());
        self.inner.write().await.claims.push(claim.clone());

        Ok(claim)
    }

    async fn record_claim(
        &self,
        user_id: &UserId,
        points: i64,
    ) -> StoreResult<Option<(User, Claim)>> {
        self.record_claim_at(user_id, points, Utc::now()).await
    }

    async fn list_claims(
        &self,
        filter: &ClaimFilter,
        skip: usize,
        limit: usize,
    ) -> StoreResult<(Vec<ClaimView>, u64)> {
        let inner = self.inner.read().await;

        // newest insert first among equal timestamps
        let mut matching: Vec<&Claim> = inner
            .claims
            .iter()
            .rev()
            .filter(|c| filter.matches(c))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let views = matching
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|c| ClaimView {
                id: c.id,
                user_id: c.user_id,
                user_name: inner
                    .user(&c.user_id)
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
                points: c.points,
                created_at: c.created_at,
            })
            .collect();

        Ok((views, total))
    }

    async fn sum_claims_grouped_by_user(
        &self,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<UserTotal>> {
        let inner = self.inner.read().await;

        let mut sums: HashMap<UserId, i64> = HashMap::new();
        for claim in inner.claims.iter().filter(|c| c.created_at >= since) {
            *sums.entry(claim.user_id).or_default() += claim.points;
        }

        Ok(sums
            .into_iter()
            .map(|(user_id, total_points)| UserTotal {
                user_id,
                total_points,
            })
            .collect())
    }

    async fn sum_claims_for_user(&self, id: &UserId) -> StoreResult<i64> {
        Ok(self
            .inner
            .read()
            .await
            .claims
            .iter()
            .filter(|c| &c.user_id == id)
            .map(|c| c.points)
            .sum())
    }
}

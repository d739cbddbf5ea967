use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base claims table model; append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: ClaimId,
    pub user_id: UserId,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(user_id: UserId, points: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ClaimId::new(),
            user_id,
            points,
            created_at,
        }
    }
}

/// Claim joined with its user's display name for history listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub id: ClaimId,
    pub user_id: UserId,
    pub user_name: String,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    pub user_id: Option<UserId>,
    /// Inclusive lower bound on `created_at`
    pub since: Option<DateTime<Utc>>,
}

impl ClaimFilter {
    pub fn matches(&self, claim: &Claim) -> bool {
        self.user_id.is_none_or(|id| claim.user_id == id)
            && self.since.is_none_or(|since| claim.created_at >= since)
    }
}

/// Sum of a user's claim points within some window
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserTotal {
    pub user_id: UserId,
    pub total_points: i64,
}

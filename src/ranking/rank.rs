use std::cmp::Ordering;

use serde::Serialize;

use crate::db::models::user::UserId;

/// A user's point total within some window, before ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub id: UserId,
    pub name: String,
    pub total_points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub id: UserId,
    pub name: String,
    pub total_points: i64,
    pub rank: u64,
}

impl RankedEntry {
    fn new(standing: Standing, rank: u64) -> Self {
        Self {
            id: standing.id,
            name: standing.name,
            total_points: standing.total_points,
            rank,
        }
    }
}

/// Leaderboard order: points descending, then name ascending (byte-wise, so case-sensitive)
pub fn standings_order(a: &Standing, b: &Standing) -> Ordering {
    b.total_points
        .cmp(&a.total_points)
        .then_with(|| a.name.cmp(&b.name))
}

pub fn sort_standings(standings: &mut [Standing]) {
    standings.sort_by(standings_order);
}

/// Assigns dense ranks in a single pass.
///
/// # Precondition
///
/// `sorted` must already be in [`standings_order`]. Nothing is re-sorted here, so unsorted
/// input silently yields meaningless ranks; use [`rank_standings`] when the input order is
/// unknown.
pub fn dense_rank(sorted: Vec<Standing>) -> Vec<RankedEntry> {
    let mut rank = 0;
    let mut previous: Option<i64> = None;

    sorted
        .into_iter()
        .map(|standing| {
            if previous != Some(standing.total_points) {
                rank += 1;
                previous = Some(standing.total_points);
            }

            RankedEntry::new(standing, rank)
        })
        .collect()
}

pub fn rank_standings(mut standings: Vec<Standing>) -> Vec<RankedEntry> {
    sort_standings(&mut standings);
    dense_rank(standings)
}

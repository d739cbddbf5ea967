use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::db::prelude::{Store, StoreResult, UserId};
use crate::ranking::rank::Standing;
use crate::ranking::window::WindowBounds;

/// Per-user point totals for a window, in no particular order.
///
/// Unbounded windows read each user's lifetime counter directly (users without points are
/// included with zero). Bounded windows replay claims since the lower bound, so only users
/// with at least one claim in the window appear.
#[instrument(skip(store, bounds), fields(since = ?bounds.lower))]
pub async fn aggregate(store: &dyn Store, bounds: &WindowBounds<Utc>) -> StoreResult<Vec<Standing>> {
    match bounds.lower {
        None => lifetime_totals(store).await,
        Some(since) => window_totals(store, since).await,
    }
}

async fn lifetime_totals(store: &dyn Store) -> StoreResult<Vec<Standing>> {
    Ok(store
        .all_users()
        .await?
        .into_iter()
        .map(|user| Standing {
            id: user.id,
            name: user.name,
            total_points: user.total_points,
        })
        .collect())
}

async fn window_totals(store: &dyn Store, since: DateTime<Utc>) -> StoreResult<Vec<Standing>> {
    let sums = store.sum_claims_grouped_by_user(since).await?;
    if sums.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<UserId> = sums.iter().map(|s| s.user_id).collect();
    let names: HashMap<UserId, String> = store
        .find_users(&ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user.name))
        .collect();

    Ok(sums
        .into_iter()
        .filter_map(|sum| match names.get(&sum.user_id) {
            Some(name) => Some(Standing {
                id: sum.user_id,
                name: name.clone(),
                total_points: sum.total_points,
            }),
            None => {
                tracing::warn!(
                    user_id = %sum.user_id,
                    points = sum.total_points,
                    "claims reference a missing user, excluding from window"
                );
                None
            }
        })
        .collect())
}

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::constants::{AWARD_MAX, AWARD_MIN};
use crate::db::prelude::{ClaimFilter, ClaimView, Store, StoreError, User, UserId};
use crate::ranking::aggregate::aggregate;
use crate::ranking::notify::{ChangeNotifier, ChangeSubscription};
use crate::ranking::page::{Page, PageRequest, paginate};
use crate::ranking::rank::{RankedEntry, rank_standings};
use crate::ranking::window::Window;

pub type ServiceResult<T> = core::result::Result<T, ServiceError>;

/// Source of the points awarded per claim
pub type AwardRoll = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => ServiceError::Conflict("User name already exists".into()),
            e => ServiceError::Storage(e),
        }
    }
}

/// A page of results scoped to a time window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowedPage<T> {
    #[serde(flatten)]
    pub page: Page<T>,
    pub window: Window,
    /// End of the current window, absent for all-time
    #[serde(rename = "endsAt", skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimResult {
    pub awarded: i64,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCreated {
    pub created: Vec<User>,
}

/// Lifetime counter versus the sum of the claim log for one user.
///
/// `unrecorded` is non-zero only when an award incremented the counter but its claim was
/// never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalAudit {
    pub user_id: UserId,
    pub lifetime_total: i64,
    pub claimed_total: i64,
    pub unrecorded: i64,
}

#[derive(Clone)]
pub struct LeaderboardService {
    store: Arc<dyn Store>,
    notifier: ChangeNotifier,
    roll: AwardRoll,
}

impl fmt::Debug for LeaderboardService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderboardService")
            .field("store", &self.store)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl LeaderboardService {
    pub fn new(store: Arc<dyn Store>, notifier: ChangeNotifier) -> Self {
        Self {
            store,
            notifier,
            roll: Arc::new(|| rand::random_range(AWARD_MIN..=AWARD_MAX)),
        }
    }

    /// Replaces the random award source, e.g. with a fixed value in tests
    pub fn with_roll(mut self, roll: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.roll = Arc::new(roll);
        self
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        self.notifier.subscribe()
    }

    /// Parses a user id taken from a path segment; ids that can't exist are reported as missing
    pub fn user_ref(raw: &str) -> ServiceResult<UserId> {
        raw.parse::<UserId>()
            .map_err(|_| ServiceError::NotFound("User not found".into()))
    }

    pub async fn leaderboard(
        &self,
        window: Window,
        request: PageRequest,
    ) -> ServiceResult<WindowedPage<RankedEntry>> {
        self.leaderboard_at(window, request, &Local::now()).await
    }

    /// Ranked standings for `window` as seen from `now`
    #[instrument(skip(self, now), fields(window = %window))]
    pub async fn leaderboard_at<Tz: TimeZone>(
        &self,
        window: Window,
        request: PageRequest,
        now: &DateTime<Tz>,
    ) -> ServiceResult<WindowedPage<RankedEntry>> {
        let bounds = window.resolve(now).to_utc();
        let standings = aggregate(self.store.as_ref(), &bounds).await?;
        let ranked = rank_standings(standings);

        tracing::debug!(entries = ranked.len(), "leaderboard computed");

        Ok(WindowedPage {
            page: paginate(ranked, request),
            window,
            ends_at: bounds.upper,
        })
    }

    pub async fn claims(
        &self,
        window: Window,
        user_id: Option<&str>,
        request: PageRequest,
    ) -> ServiceResult<WindowedPage<ClaimView>> {
        self.claims_at(window, user_id, request, &Local::now()).await
    }

    /// Claim history, newest first, optionally narrowed to one user
    #[instrument(skip(self, now), fields(window = %window))]
    pub async fn claims_at<Tz: TimeZone>(
        &self,
        window: Window,
        user_id: Option<&str>,
        request: PageRequest,
        now: &DateTime<Tz>,
    ) -> ServiceResult<WindowedPage<ClaimView>> {
        let user_id = user_id
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse::<UserId>()
                    .map_err(|_| ServiceError::Validation(format!("Invalid userId '{raw}'")))
            })
            .transpose()?;

        let bounds = window.resolve(now).to_utc();
        let filter = ClaimFilter {
            user_id,
            since: bounds.lower,
        };

        let (items, total) = self
            .store
            .list_claims(&filter, request.skip(), request.take())
            .await?;

        Ok(WindowedPage {
            page: Page::new(items, total, request),
            window,
            ends_at: bounds.upper,
        })
    }

    /// Awards a random number of points to a user and signals subscribers
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn claim_points(&self, user_id: &UserId) -> ServiceResult<ClaimResult> {
        if self.store.find_user(user_id).await?.is_none() {
            return Err(ServiceError::NotFound("User not found".into()));
        }

        let points = (self.roll)();
        match self.store.record_claim(user_id, points).await {
            Ok(Some((user, claim))) => {
                tracing::info!(points, claim_id = %claim.id, total = user.total_points, "points claimed");
                self.notifier.notify();

                Ok(ClaimResult {
                    awarded: points,
                    user,
                })
            }

            // removed between the lookup and the award
            Ok(None) => Err(ServiceError::NotFound("User not found".into())),

            Err(e @ StoreError::ClaimNotRecorded { .. }) => {
                tracing::error!(
                    error = %e,
                    points,
                    "lifetime total updated without a claim; windowed rankings will undercount"
                );
                // the all-time board did move
                self.notifier.notify();

                Err(e.into())
            }

            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    pub async fn create_user(&self, name: &str) -> ServiceResult<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("Name is required".into()));
        }

        let user = self.store.create_user(name).await?;
        tracing::info!(user_id = %user.id, "user created");

        Ok(user)
    }

    /// Creates every name that doesn't exist yet, skipping blanks and repeats
    #[instrument(skip(self, names), fields(requested = names.len()))]
    pub async fn bulk_create_users(&self, names: &[String]) -> ServiceResult<BulkCreated> {
        if names.is_empty() {
            return Err(ServiceError::Validation("Names array required".into()));
        }

        let mut seen = HashSet::new();
        let mut created = Vec::new();

        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if !seen.insert(name) {
                continue;
            }

            if self.store.find_user_by_name(name).await?.is_some() {
                continue;
            }

            match self.store.create_user(name).await {
                Ok(user) => created.push(user),
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(name, "user appeared concurrently, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(created = created.len(), "bulk user creation finished");
        Ok(BulkCreated { created })
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, request: PageRequest) -> ServiceResult<Page<User>> {
        let (users, total) = self
            .store
            .list_users(request.skip(), request.take())
            .await?;

        Ok(Page::new(users, total, request))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn audit_user(&self, user_id: &UserId) -> ServiceResult<TotalAudit> {
        let Some(user) = self.store.find_user(user_id).await? else {
            return Err(ServiceError::NotFound("User not found".into()));
        };

        let claimed_total = self.store.sum_claims_for_user(user_id).await?;
        let unrecorded = user.total_points - claimed_total;
        if unrecorded != 0 {
            tracing::warn!(unrecorded, "lifetime total diverges from claim log");
        }

        Ok(TotalAudit {
            user_id: user.id,
            lifetime_total: user.total_points,
            claimed_total,
            unrecorded,
        })
    }

    /// Creates `names` if the store has no users at all. Returns how many were created.
    #[instrument(skip(self, names))]
    pub async fn seed_if_empty(&self, names: &[&str]) -> ServiceResult<usize> {
        if self.store.count_users().await? > 0 {
            tracing::debug!("users present, skipping seed");
            return Ok(0);
        }

        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let seeded = self.bulk_create_users(&names).await?.created.len();
        tracing::info!(seeded, "seeded default users");

        Ok(seeded)
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeDelta};

    use super::*;
    use crate::constants::SEED_USERS;
    use crate::db::prelude::{Claim, MemoryStore, StoreResult, UserTotal};
    use crate::ranking::notify::LeaderboardEvent;

    fn service_with(store: Arc<MemoryStore>) -> LeaderboardService {
        LeaderboardService::new(store, ChangeNotifier::default()).with_roll(|| 7)
    }

    fn request(page: i64, limit: i64) -> PageRequest {
        PageRequest::new(Some(page), Some(limit))
    }

    /// Delegates to a memory store but refuses to append claims, and leaves `record_claim` to
    /// the trait's composed default
    #[derive(Debug, Default)]
    struct FailingAppend {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for FailingAppend {
        async fn find_user(&self, id: &UserId) -> StoreResult<Option<User>> {
            self.inner.find_user(id).await
        }

        async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
            self.inner.find_user_by_name(name).await
        }

        async fn find_users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
            self.inner.find_users(ids).await
        }

        async fn create_user(&self, name: &str) -> StoreResult<User> {
            self.inner.create_user(name).await
        }

        async fn list_users(&self, skip: usize, limit: usize) -> StoreResult<(Vec<User>, u64)> {
            self.inner.list_users(skip, limit).await
        }

        async fn all_users(&self) -> StoreResult<Vec<User>> {
            self.inner.all_users().await
        }

        async fn count_users(&self) -> StoreResult<u64> {
            self.inner.count_users().await
        }

        async fn increment_user_points(
            &self,
            id: &UserId,
            delta: i64,
        ) -> StoreResult<Option<User>> {
            self.inner.increment_user_points(id, delta).await
        }

        async fn append_claim(&self, _: &UserId, _: i64) -> StoreResult<Claim> {
            Err(StoreError::SqlxError(sqlx::Error::PoolTimedOut))
        }

        async fn list_claims(
            &self,
            filter: &ClaimFilter,
            skip: usize,
            limit: usize,
        ) -> StoreResult<(Vec<ClaimView>, u64)> {
            self.inner.list_claims(filter, skip, limit).await
        }

        async fn sum_claims_grouped_by_user(
            &self,
            since: DateTime<Utc>,
        ) -> StoreResult<Vec<UserTotal>> {
            self.inner.sum_claims_grouped_by_user(since).await
        }

        async fn sum_claims_for_user(&self, id: &UserId) -> StoreResult<i64> {
            self.inner.sum_claims_for_user(id).await
        }
    }

    #[tokio::test]
    async fn test_all_time_ranks_with_ties() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone());
        let now = Utc::now();

        for (name, points) in [("Kamal", 80), ("Rahul", 100), ("Aisha", 100)] {
            let user = svc.create_user(name).await.unwrap();
            store.record_claim_at(&user.id, points, now).await.unwrap();
        }
        svc.create_user("Zero").await.unwrap();

        let board = svc.leaderboard(Window::All, PageRequest::default()).await.unwrap();
        let rows: Vec<_> = board
            .page
            .items
            .iter()
            .map(|e| (e.name.as_str(), e.total_points, e.rank))
            .collect();

        assert_eq!(
            rows,
            vec![
                ("Aisha", 100, 1),
                ("Rahul", 100, 1),
                ("Kamal", 80, 2),
                ("Zero", 0, 3)
            ]
        );
        assert_eq!(board.window, Window::All);
        assert!(board.ends_at.is_none());
    }

    #[tokio::test]
    async fn test_daily_without_claims_today_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone());
        let now = Utc::now();

        let user = svc.create_user("Priya").await.unwrap();
        store
            .record_claim_at(&user.id, 9, now - TimeDelta::days(3))
            .await
            .unwrap();

        let daily = svc
            .leaderboard_at(Window::Daily, PageRequest::default(), &now)
            .await
            .unwrap();
        assert!(daily.page.items.is_empty());
        assert_eq!(daily.page.total, 0);
        assert!(daily.ends_at.is_some_and(|end| end > now));

        let all = svc
            .leaderboard_at(Window::All, PageRequest::default(), &now)
            .await
            .unwrap();
        assert_eq!(all.page.total, 1);
        assert_eq!(all.page.items[0].total_points, 9);
    }

    #[tokio::test]
    async fn test_windows_use_zone_of_now() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone());
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        // 01:00 IST on the 10th, i.e. 19:30 UTC on the 9th
        let now = ist.with_ymd_and_hms(2025, 6, 10, 1, 0, 0).unwrap();

        let user = svc.create_user("Sanak").await.unwrap();
        // 23:00 IST on the 9th: yesterday locally, same UTC day as `now`
        let yesterday = ist.with_ymd_and_hms(2025, 6, 9, 23, 0, 0).unwrap();
        store
            .record_claim_at(&user.id, 3, yesterday.with_timezone(&Utc))
            .await
            .unwrap();
        let today = ist.with_ymd_and_hms(2025, 6, 10, 0, 30, 0).unwrap();
        store
            .record_claim_at(&user.id, 4, today.with_timezone(&Utc))
            .await
            .unwrap();

        let daily = svc
            .leaderboard_at(Window::Daily, PageRequest::default(), &now)
            .await
            .unwrap();
        assert_eq!(daily.page.items[0].total_points, 4);
    }

    #[tokio::test]
    async fn test_leaderboard_is_stable_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone());
        for name in SEED_USERS {
            let user = svc.create_user(name).await.unwrap();
            svc.claim_points(&user.id).await.unwrap();
        }

        let now = Utc::now();
        for window in [Window::All, Window::Daily, Window::Weekly, Window::Monthly] {
            let first = svc
                .leaderboard_at(window, PageRequest::default(), &now)
                .await
                .unwrap();
            let second = svc
                .leaderboard_at(window, PageRequest::default(), &now)
                .await
                .unwrap();
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn test_pagination_over_twelve_users() {
        let svc = service_with(Arc::new(MemoryStore::new()));
        for i in 0..12 {
            svc.create_user(&format!("user-{i:02}")).await.unwrap();
        }

        let first = svc.leaderboard(Window::All, request(1, 5)).await.unwrap();
        assert_eq!(first.page.items.len(), 5);
        assert_eq!(first.page.total, 12);

        let last = svc.leaderboard(Window::All, request(3, 5)).await.unwrap();
        assert_eq!(last.page.items.len(), 2);

        let beyond = svc.leaderboard(Window::All, request(9, 5)).await.unwrap();
        assert!(beyond.page.items.is_empty());
        assert_eq!(beyond.page.total, 12);
    }

    #[tokio::test]
    async fn test_claim_awards_and_notifies() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone());
        let mut sub = svc.subscribe();

        let user = svc.create_user("Meera").await.unwrap();
        let result = svc.claim_points(&user.id).await.unwrap();

        assert_eq!(result.awarded, 7);
        assert_eq!(result.user.total_points, 7);
        assert_eq!(sub.changed().await, Some(LeaderboardEvent::Changed));

        let (claims, total) = store
            .list_claims(&ClaimFilter::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(claims[0].user_id, user.id);
        assert_eq!(claims[0].points, 7);
    }

    #[tokio::test]
    async fn test_default_roll_stays_in_range() {
        let svc = LeaderboardService::new(Arc::new(MemoryStore::new()), ChangeNotifier::default());
        let user = svc.create_user("Dev").await.unwrap();

        for _ in 0..200 {
            let result = svc.claim_points(&user.id).await.unwrap();
            assert!((AWARD_MIN..=AWARD_MAX).contains(&result.awarded));
        }
    }

    #[tokio::test]
    async fn test_claim_for_missing_user() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone());
        let bystander = svc.create_user("Vikas").await.unwrap();

        assert!(matches!(
            svc.claim_points(&UserId::new()).await,
            Err(ServiceError::NotFound(_))
        ));

        let (_, total) = store
            .list_claims(&ClaimFilter::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 0);
        let bystander = store.find_user(&bystander.id).await.unwrap().unwrap();
        assert_eq!(bystander.total_points, 0);
    }

    #[tokio::test]
    async fn test_unrecorded_claim_only_moves_lifetime_total() {
        let store = Arc::new(FailingAppend::default());
        let svc = LeaderboardService::new(store.clone(), ChangeNotifier::default()).with_roll(|| 5);
        let mut sub = svc.subscribe();

        let user = svc.create_user("Rohan").await.unwrap();
        let err = svc.claim_points(&user.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Storage(StoreError::ClaimNotRecorded { points: 5, .. })
        ));
        assert_eq!(sub.changed().await, Some(LeaderboardEvent::Changed));

        let all = svc.leaderboard(Window::All, PageRequest::default()).await.unwrap();
        assert_eq!(all.page.items[0].total_points, 5);

        let daily = svc.leaderboard(Window::Daily, PageRequest::default()).await.unwrap();
        assert!(daily.page.items.is_empty());

        let audit = svc.audit_user(&user.id).await.unwrap();
        assert_eq!(
            audit,
            TotalAudit {
                user_id: user.id,
                lifetime_total: 5,
                claimed_total: 0,
                unrecorded: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_audit_matches_after_clean_claims() {
        let svc = service_with(Arc::new(MemoryStore::new()));
        let user = svc.create_user("Anita").await.unwrap();
        svc.claim_points(&user.id).await.unwrap();
        svc.claim_points(&user.id).await.unwrap();

        let audit = svc.audit_user(&user.id).await.unwrap();
        assert_eq!(audit.lifetime_total, 14);
        assert_eq!(audit.claimed_total, 14);
        assert_eq!(audit.unrecorded, 0);

        assert!(matches!(
            svc.audit_user(&UserId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_user_validation_and_conflict() {
        let svc = service_with(Arc::new(MemoryStore::new()));

        assert!(matches!(
            svc.create_user("   ").await,
            Err(ServiceError::Validation(msg)) if msg == "Name is required"
        ));

        let user = svc.create_user("  Priya ").await.unwrap();
        assert_eq!(user.name, "Priya");

        assert!(matches!(
            svc.create_user("Priya").await,
            Err(ServiceError::Conflict(msg)) if msg == "User name already exists"
        ));
    }

    #[tokio::test]
    async fn test_bulk_create_skips_existing_and_repeats() {
        let svc = service_with(Arc::new(MemoryStore::new()));
        svc.create_user("Kamal").await.unwrap();

        let names: Vec<String> = [" Rahul", "Kamal", "", "Rahul ", "Sanak", "  "]
            .into_iter()
            .map(String::from)
            .collect();
        let created = svc.bulk_create_users(&names).await.unwrap().created;
        let created: Vec<_> = created.iter().map(|u| u.name.as_str()).collect();

        assert_eq!(created, vec!["Rahul", "Sanak"]);
        assert!(matches!(
            svc.bulk_create_users(&[]).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_users_pages_in_creation_order() {
        let svc = service_with(Arc::new(MemoryStore::new()));
        for name in ["c", "a", "b"] {
            svc.create_user(name).await.unwrap();
        }

        let page = svc.list_users(request(2, 2)).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "b");
    }

    #[tokio::test]
    async fn test_claims_history_filters() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone());
        let now = Utc::now();
        let a = svc.create_user("Aisha").await.unwrap();
        let b = svc.create_user("Kamal").await.unwrap();

        store
            .record_claim_at(&a.id, 1, now - TimeDelta::days(60))
            .await
            .unwrap();
        store.record_claim_at(&a.id, 2, now).await.unwrap();
        store.record_claim_at(&b.id, 3, now).await.unwrap();

        let all = svc
            .claims_at(Window::All, None, PageRequest::default(), &now)
            .await
            .unwrap();
        assert_eq!(all.page.total, 3);

        let id = a.id.to_string();
        let monthly_a = svc
            .claims_at(Window::Monthly, Some(&id), PageRequest::default(), &now)
            .await
            .unwrap();
        assert_eq!(monthly_a.page.total, 1);
        assert_eq!(monthly_a.page.items[0].points, 2);
        assert_eq!(monthly_a.window, Window::Monthly);

        let blank = svc
            .claims_at(Window::All, Some("  "), PageRequest::default(), &now)
            .await
            .unwrap();
        assert_eq!(blank.page.total, 3);

        assert!(matches!(
            svc.claims(Window::All, Some("not-a-uuid"), PageRequest::default())
                .await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_seed_only_when_empty() {
        let svc = service_with(Arc::new(MemoryStore::new()));

        assert_eq!(svc.seed_if_empty(&SEED_USERS).await.unwrap(), 10);
        assert_eq!(svc.seed_if_empty(&SEED_USERS).await.unwrap(), 0);

        let users = svc.list_users(PageRequest::default()).await.unwrap();
        assert_eq!(users.total, 10);
        assert_eq!(users.items[0].name, "Rahul");
    }

    #[test]
    fn test_user_ref() {
        let id = UserId::new();
        assert_eq!(LeaderboardService::user_ref(&id.to_string()).unwrap(), id);
        assert!(matches!(
            LeaderboardService::user_ref("123"),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_windowed_page_json() {
        let page = WindowedPage {
            page: paginate(vec![1, 2, 3], request(1, 2)),
            window: Window::All,
            ends_at: None,
        };
        let json = serde_json::to_value(&page).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "items": [1, 2], "total": 3, "page": 1, "limit": 2, "window": "all" })
        );
    }
}

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::{Json, debug_handler};
use http::StatusCode;
use serde::Serialize;
use tracing::instrument;

use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::models::{BulkCreateBody, ClaimsQuery, CreateUserBody, LeaderboardQuery, Pagination};
use crate::db::prelude::{ClaimView, User};
use crate::ranking::page::Page;
use crate::ranking::rank::RankedEntry;
use crate::service::{BulkCreated, ClaimResult, LeaderboardService, TotalAudit, WindowedPage};

#[derive(Debug, Serialize)]
pub struct Health {
    ok: bool,
}

pub async fn health() -> Json<Health> {
    Json(Health { ok: true })
}

#[instrument(skip(state))]
pub async fn leaderboard(
    Query(query): Query<LeaderboardQuery>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<WindowedPage<RankedEntry>> {
    let page = state
        .service
        .leaderboard(query.window(), query.request())
        .await?;

    Ok(Json(page))
}

#[instrument(skip(state))]
pub async fn claims(
    Query(query): Query<ClaimsQuery>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<WindowedPage<ClaimView>> {
    let page = state
        .service
        .claims(query.window(), query.user_id.as_deref(), query.request())
        .await?;

    Ok(Json(page))
}

#[instrument(skip(state))]
pub async fn list_users(
    Query(param): Query<Pagination>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<Page<User>> {
    Ok(Json(state.service.list_users(param.request()).await?))
}

#[instrument(skip(state, body))]
#[debug_handler]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateUserBody>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), RouteError> {
    let Json(body) = body?;
    let user = state.service.create_user(&body.name).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, body))]
pub async fn bulk_create_users(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BulkCreateBody>, JsonRejection>,
) -> JsonResult<BulkCreated> {
    let Json(body) = body?;

    Ok(Json(state.service.bulk_create_users(&body.names).await?))
}

#[instrument(skip(state))]
pub async fn claim_points(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<ClaimResult> {
    let id = LeaderboardService::user_ref(&id)?;

    Ok(Json(state.service.claim_points(&id).await?))
}

#[instrument(skip(state))]
pub async fn audit_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<TotalAudit> {
    let id = LeaderboardService::user_ref(&id)?;

    Ok(Json(state.service.audit_user(&id).await?))
}

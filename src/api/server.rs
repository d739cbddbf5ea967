use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::socket::socket_handler;
use crate::service::{LeaderboardService, ServiceError};

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub service: LeaderboardService,
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    let api_routes = Router::new()
        .route("/leaderboard", get(leaderboard))
        .route("/claims", get(claims))
        //
        // user-related routes
        .route("/users", get(list_users).post(create_user))
        .route("/users/bulk-create", post(bulk_create_users))
        .route("/users/{id}/claim", post(claim_points))
        .route("/users/{id}/audit", get(audit_user));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(socket_handler))
        .nest("/api", api_routes)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(cors)
        .with_state(state)
}

/// Logs the `RouteError` attached to a failed response
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    tx: UnboundedSender<SocketAddr>,
) -> std::io::Result<()> {
    _ = tx.send(listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = ?e, "unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Binds the listener and spawns the server alongside a task that reports readiness
#[instrument(skip(app))]
pub async fn start_server(app: Router, port: u16) -> std::io::Result<Vec<JoinHandle<()>>> {
    tracing::info!("starting server");
    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    let (tx, mut rx): (_, UnboundedReceiver<SocketAddr>) = tokio::sync::mpsc::unbounded_channel();

    let server_handle = tokio::task::spawn(async move {
        if let Err(e) = serve(listener, app, tx).await {
            tracing::error!(error = ?e, "server stopped with an error");
        }
    });

    let logging_handle = tokio::task::spawn(async move {
        if let Some(addr) = rx.recv().await {
            tracing::info!(
                server_url = &format!("http://127.0.0.1:{}", addr.port()),
                "server ready"
            );
        }
    });

    Ok(vec![server_handle, logging_handle])
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Body(#[from] JsonRejection),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message, err) = match &self {
            RouteError::Service(ServiceError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, msg.clone(), None)
            }

            RouteError::Service(ServiceError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, msg.clone(), None)
            }

            RouteError::Service(ServiceError::Conflict(msg)) => {
                (StatusCode::CONFLICT, msg.clone(), None)
            }

            // internal detail stays in the logs
            RouteError::Service(ServiceError::Storage(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("Server error"),
                Some(self),
            ),

            RouteError::Body(rejection) => (StatusCode::BAD_REQUEST, rejection.body_text(), None),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        if let Some(err) = err {
            response.extensions_mut().insert(Arc::new(err));
        }

        response
    }
}

#[cfg(test)]
mod test {
    use axum::body::{Body, to_bytes};
    use http::header::CONTENT_TYPE;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::api::middleware::cors;
    use crate::db::prelude::{MemoryStore, StoreError};
    use crate::ranking::notify::ChangeNotifier;

    fn app() -> Router {
        let service =
            LeaderboardService::new(Arc::new(MemoryStore::new()), ChangeNotifier::default())
                .with_roll(|| 4);

        router(Arc::new(AppState { service }), cors(&["*".to_string()]))
    }

    async fn send(app: &Router, req: http::Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, body)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        send(app, http::Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        send(
            app,
            http::Request::post(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(&app(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_create_then_rank() {
        let app = app();

        let (status, user) = post_json(&app, "/api/users", json!({ "name": " Priya " })).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["name"], "Priya");
        assert_eq!(user["totalPoints"], 0);

        let (status, body) = post_json(&app, "/api/users", json!({ "name": "Priya" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "User name already exists");

        let (status, body) = post_json(&app, "/api/users", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Name is required");

        let uri = format!("/api/users/{}/claim", user["id"].as_str().unwrap());
        let (status, claim) = post_json(&app, &uri, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(claim["awarded"], 4);
        assert_eq!(claim["user"]["totalPoints"], 4);

        let (status, board) = get_json(&app, "/api/leaderboard?window=Weekly").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["window"], "weekly");
        assert_eq!(board["total"], 1);
        assert_eq!(board["items"][0]["rank"], 1);
        assert_eq!(board["items"][0]["totalPoints"], 4);
        assert!(board["endsAt"].is_string());
    }

    #[tokio::test]
    async fn test_leaderboard_defaults_and_fallbacks() {
        let app = app();

        let (status, board) = get_json(&app, "/api/leaderboard?window=fortnightly&page=-3&limit=abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            board,
            json!({ "items": [], "total": 0, "page": 1, "limit": 20, "window": "all" })
        );

        let (_, board) = get_json(&app, "/api/leaderboard?limit=1000").await;
        assert_eq!(board["limit"], 100);
    }

    #[tokio::test]
    async fn test_claim_unknown_or_malformed_user() {
        let app = app();

        let (status, body) = post_json(&app, "/api/users/not-an-id/claim", json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "User not found");

        let uri = format!("/api/users/{}/claim", uuid::Uuid::new_v4());
        let (status, _) = post_json(&app, &uri, json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, claims) = get_json(&app, "/api/claims").await;
        assert_eq!(claims["total"], 0);
    }

    #[tokio::test]
    async fn test_claims_history() {
        let app = app();
        let (_, user) = post_json(&app, "/api/users", json!({ "name": "Rahul" })).await;
        let id = user["id"].as_str().unwrap();
        post_json(&app, &format!("/api/users/{id}/claim"), json!({})).await;
        post_json(&app, &format!("/api/users/{id}/claim"), json!({})).await;

        let (status, claims) = get_json(&app, &format!("/api/claims?window=daily&userId={id}&limit=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(claims["total"], 2);
        assert_eq!(claims["items"].as_array().unwrap().len(), 1);
        assert_eq!(claims["items"][0]["userName"], "Rahul");
        assert_eq!(claims["items"][0]["userId"], id);
        assert_eq!(claims["window"], "daily");

        let (status, body) = get_json(&app, "/api/claims?userId=nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("userId"));
    }

    #[tokio::test]
    async fn test_users_bulk_list_and_audit() {
        let app = app();

        let (status, body) = post_json(
            &app,
            "/api/users/bulk-create",
            json!({ "names": ["Kamal", " Sanak", "Kamal", ""] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"].as_array().unwrap().len(), 2);

        let (status, body) = post_json(&app, "/api/users/bulk-create", json!({ "names": [] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Names array required");

        let (status, users) = get_json(&app, "/api/users?page=1&limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users["total"], 2);
        assert_eq!(users["items"][0]["name"], "Kamal");

        let id = users["items"][0]["id"].as_str().unwrap();
        let (status, audit) = get_json(&app, &format!("/api/users/{id}/audit")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            audit,
            json!({ "userId": id, "lifetimeTotal": 0, "claimedTotal": 0, "unrecorded": 0 })
        );
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (status, body) = send(
            &app(),
            http::Request::post("/api/users")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from("{ nope"))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_storage_errors_are_opaque() {
        let err = RouteError::from(ServiceError::Storage(StoreError::SqlxError(
            sqlx::Error::PoolTimedOut,
        )));
        let res = err.into_response();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.extensions().get::<Arc<RouteError>>().is_some());

        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "message": "Server error" }));
    }
}

use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;

use crate::api::middleware::cors;
use crate::api::server::{AppState, router, start_server};
use crate::constants::SEED_USERS;
use crate::db::prelude::{MemoryStore, PgStore, Store, StoreError};
use crate::ranking::notify::ChangeNotifier;
use crate::service::{LeaderboardService, ServiceError};
use crate::util::env::{Env, EnvErr};
use crate::util::telemetry;

mod api;
mod constants;
mod db;
mod ranking;
mod service;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

async fn open_store(env: &Env) -> Result<Arc<dyn Store>> {
    Ok(match env.database_url() {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            tracing::info!("connected to postgres");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = Env::new()?;
    let telemetry_registry = telemetry::Telemetry::new(&env)?.register()?;

    tracing::info!("starting main application");

    let store = open_store(&env).await?;
    let service = LeaderboardService::new(store, ChangeNotifier::default());
    if env.seed_on_empty {
        service.seed_if_empty(&SEED_USERS).await?;
    }

    let app = router(Arc::new(AppState { service }), cors(&env.cors_allow_origins));
    let handles = start_server(app, env.server_api_port).await?;

    _ = join_all(handles).await;

    telemetry_registry.shutdown();
    Ok(())
}

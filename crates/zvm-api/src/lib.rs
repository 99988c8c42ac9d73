//! HTTP surface of the account store (axum) and a matching reqwest client.
//!
//! Every route requires the `X-API-Key` header. Errors come back as
//! `{"error": "...", "code": "..."}` with a status that mirrors the
//! account error kind.

use std::{future::Future, sync::Arc};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use zvm_core::ports::AccountService;

pub mod client;
pub mod gate;
pub mod routes;
pub mod wire;

pub use client::ApiClient;

pub struct AppState {
    pub service: Arc<dyn AccountService>,
    pub api_key: String,
}

impl AppState {
    pub fn new(service: Arc<dyn AccountService>, api_key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            service,
            api_key: api_key.into(),
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/user/create", post(routes::create))
        .route("/api/user/renew", post(routes::renew))
        .route("/api/user/delete", post(routes::delete))
        .route("/api/user/info", post(routes::info))
        .route("/api/users", get(routes::list))
        .route("/api/cron/sweep", post(routes::sweep))
        .route("/api/cron/expire", post(routes::purge))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gate::require_api_key,
        ))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "account api listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("account api stopped");
    Ok(())
}

//! HTTP surface: application state, router assembly, and serving.

pub mod error;
pub mod keywords_cache;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{FromRef, OriginalUri};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::ai::UpstreamConfig;
use crate::archive::ArchiveManager;
use crate::config::Config;
use crate::jobs::weekly_keywords::WeeklyKeywordsJob;
use crate::security::{self, SecurityService};
use crate::store::DocumentStore;

use keywords_cache::KeywordsCache;

/// Shared application state. Cheap to clone; every field is a handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DocumentStore>,
    pub archive: ArchiveManager,
    pub security: SecurityService,
    pub keywords_cache: Arc<KeywordsCache>,
    pub chat_upstream: Arc<UpstreamConfig>,
    pub system_prompt: Arc<String>,
    pub weekly_job: WeeklyKeywordsJob,
    pub http: reqwest::Client,
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

/// Build the full application router.
///
/// The ban check wraps every route; the rate-limit counter wraps only the AI
/// chat proxy. When a static root is configured the admin SPA is served for
/// anything outside `/api`.
pub fn create_app(state: AppState) -> Router {
    let ai_routes = Router::new()
        .route("/ai/chat", post(routes::ai::chat))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            security::monitor_api_rate_limit,
        ));

    let api = Router::new()
        .route("/auth/login", post(routes::auth::login))
        .route("/keywords", get(routes::keywords::list).post(routes::keywords::create))
        .route("/keywords/batch", post(routes::keywords::batch_import))
        .route("/keywords/refresh-weekly", post(routes::keywords::refresh_weekly))
        .route(
            "/keywords/:id",
            put(routes::keywords::update).delete(routes::keywords::remove),
        )
        .route("/news", get(routes::news::list).post(routes::news::create))
        .route("/news/dates", get(routes::news::dates))
        .route("/news/date/:date", get(routes::news::by_date))
        .route("/news/template", get(routes::news::template))
        .route("/news/batch", post(routes::news::batch_import))
        .route("/news/:id", put(routes::news::update).delete(routes::news::remove))
        .route("/tools", get(routes::tools::list).post(routes::tools::create))
        .route("/tools/categories", get(routes::tools::categories))
        .route("/tools/batch", post(routes::tools::batch_import))
        .route("/tools/upload-logo", post(routes::tools::upload_logo))
        .route(
            "/tools/:id",
            get(routes::tools::show)
                .put(routes::tools::update)
                .delete(routes::tools::remove),
        )
        .route("/settings", get(routes::misc::get_settings).post(routes::misc::update_settings))
        .route("/stats", get(routes::misc::stats))
        .route("/backup", get(routes::misc::backup))
        .route("/restore", post(routes::misc::restore))
        .route(
            "/banned-ips",
            get(routes::security::list_bans).post(routes::security::create_ban),
        )
        .route("/banned-ips/cleanup", post(routes::security::cleanup_bans))
        .route("/banned-ips/:ip", delete(routes::security::remove_ban))
        .route("/api-calls/stats", get(routes::security::call_stats))
        .route("/visit/track", post(routes::visit::track))
        .route("/visit/province-stats", get(routes::visit::province_stats))
        .route("/visit/logs", get(routes::visit::logs))
        .route("/visit/logs/cleanup", delete(routes::visit::cleanup_logs))
        .route("/reports", get(routes::reports::list))
        .route("/reports/:filename", get(routes::reports::show))
        .route("/archive/dates", get(routes::archive::dates))
        .route(
            "/archive/:date",
            get(routes::archive::show).delete(routes::archive::remove),
        )
        .merge(ai_routes)
        .fallback(api_not_found);

    let mut app = Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::check_ip_ban,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    if let Some(static_root) = &state.config.static_root {
        app = app.fallback_service(ServeDir::new(static_root));
    }

    app.with_state(state)
}

async fn api_not_found(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "资源不存在", "path": uri.path() })),
    )
}

/// Bind and serve until the shutdown token fires.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn serve(app: Router, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .context("Server error")
}

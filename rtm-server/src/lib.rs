//! HTTP API over the traceability engine
//!
//! Connection management under `/api/connections` and report generation
//! under `/api/rtm`. Handlers share one [`AppState`].

pub mod config;
mod error;
mod handlers;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use rtm_core::{ConnectionRegistry, EngineConfig, SourceFactory};

pub use config::ServerConfig;
pub use error::ApiError;
pub use handlers::{CreateConnectionRequest, KpiResponse, ReportRequest, TestConnectionResponse};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    /// Opens a backend source for a stored connection
    pub factory: Arc<dyn SourceFactory>,
    pub engine_config: Arc<EngineConfig>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        registry: ConnectionRegistry,
        factory: Arc<dyn SourceFactory>,
        engine_config: EngineConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            factory,
            engine_config: Arc::new(engine_config),
            request_timeout,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/api/connections",
            get(handlers::list_connections).post(handlers::create_connection),
        )
        .route(
            "/api/connections/{name}",
            get(handlers::get_connection)
                .put(handlers::update_connection)
                .delete(handlers::delete_connection),
        )
        .route("/api/connections/{name}/test", post(handlers::test_connection))
        .route("/api/connections/{name}/default", post(handlers::set_default_connection))
        .route("/api/connections/{name}/sprints", get(handlers::connection_sprints))
        .route("/api/rtm/report", post(handlers::rtm_report))
        .route("/api/rtm/kpi", post(handlers::rtm_kpi))
        .route("/api/rtm/export", post(handlers::rtm_export))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

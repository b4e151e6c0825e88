//! API Routes
//!
//! HTTP endpoints for the latest peer snapshot, health and metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::Metrics;
use crate::collector::StatsCollector;

/// Shared API state
pub struct ApiState {
    pub collector: Arc<StatsCollector>,
    pub metrics: Arc<Metrics>,
}

/// Build the API router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Snapshot
        .route("/peers", get(get_peers))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_api_server(port: u16, state: Arc<ApiState>) -> anyhow::Result<()> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("📊 HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Collector status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let status = state.collector.status();

    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "state": format!("{:?}", status.state),
        "cycles_completed": status.cycles_completed,
        "cycles_failed": status.cycles_failed,
        "last_sequence": status.last_sequence,
        "last_error": status.last_error,
        "subscribers": status.subscribers,
    }))
}

/// GET /peers - Latest enriched snapshot
async fn get_peers(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let snapshot = state.collector.latest_snapshot();
    Json(serde_json::json!({
        "count": snapshot.len(),
        "enriched": snapshot.enriched_count(),
        "countries": snapshot.country_counts(),
        "snapshot": &*snapshot,
    }))
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}

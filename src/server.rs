//! ==============================================================================
//! server.rs - hub http api
//! ==============================================================================
//!
//! routes:
//!     POST /api/data                              ingest one reading envelope
//!     GET  /api/dashboard                         latest reading per producer
//!     GET  /api/producers/:producer_id/history    recent readings, ?limit=N
//!     GET  /api/group/:producer_id                same, path used by older dashboards
//!     GET  /health                                liveness + row count
//!
//! every handler hands its sqlite work to spawn_blocking so a slow disk
//! never stalls the reactor. errors become json bodies, never panics.
//!
//! ==============================================================================

use crate::config::ServerConfig;
use crate::domain::{HistoryLimit, Reading};
use crate::error::{IngestError, StoreError};
use crate::ingest::Ingestor;
use crate::snapshot::SnapshotReader;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// everything a handler may touch. the store itself sits behind both.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub snapshot: SnapshotReader,
}

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    message: String,
    producer_id: String,
    id: i64,
    received_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct DashboardResponse {
    status: &'static str,
    data: Vec<Reading>,
    last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
struct HistoryResponse {
    status: &'static str,
    producer_id: String,
    data: Vec<Reading>,
}

/// `?limit=` is read leniently; anything unusable means the default
#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/data", post(ingest_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/producers/:producer_id/history", get(history_handler))
        .route("/api/group/:producer_id", get(history_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// bind and serve until `shutdown` resolves
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("[SERVER] Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;

    tracing::info!("[SERVER] Stopped");
    Ok(())
}

/// run blocking store work off the async threads
async fn blocking<T, E, F>(work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| E::from(StoreError::Worker(e.to_string())))?
}

async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, IngestError> {
    let ingestor = state.ingestor.clone();
    let ack = blocking(move || ingestor.ingest(&body)).await?;

    Ok(Json(IngestResponse {
        status: "success",
        message: format!("Data received from {}", ack.producer_id),
        producer_id: ack.producer_id,
        id: ack.id,
        received_at: ack.received_at,
    }))
}

async fn dashboard_handler(
    State(state): State<AppState>,
) -> Result<Json<DashboardResponse>, StoreError> {
    let reader = state.snapshot.clone();
    let snapshot = blocking(move || reader.latest()).await?;

    Ok(Json(DashboardResponse {
        status: "success",
        data: snapshot.readings,
        last_updated: snapshot.queried_at,
    }))
}

async fn history_handler(
    State(state): State<AppState>,
    Path(producer_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, StoreError> {
    let limit = HistoryLimit::parse(params.limit.as_deref());
    let reader = state.snapshot.clone();
    let id = producer_id.clone();
    let data = blocking(move || reader.history(&id, limit)).await?;

    Ok(Json(HistoryResponse { status: "success", producer_id, data }))
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StoreError> {
    let reader = state.snapshot.clone();
    let readings = blocking(move || reader.reading_count()).await?;
    Ok(Json(serde_json::json!({"status": "ok", "readings": readings})))
}

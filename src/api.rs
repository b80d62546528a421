//! REST API server for the consensus index
//!
//! Thin read/admin surface over the orchestrator and store. Admin
//! endpoints return the failure message verbatim so a human can retry.

use axum::{extract::Query, extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::scoring::ScoreOrchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct RescoreRequest {
    /// Defaults to today when omitted.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ScoreOrchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Read Endpoints
/// =============================

async fn get_score(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.store().latest_snapshot().await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(ApiResponse::success(snapshot))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("No score recorded yet".to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Failed to load score: {}", e))),
        ),
    }
}

async fn get_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let days = query.days.unwrap_or(30).min(365);

    match state.orchestrator.store().history(days).await {
        Ok(history) => (StatusCode::OK, Json(ApiResponse::success(history))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Failed to load history: {}", e))),
        ),
    }
}

/// =============================
/// Admin Endpoints
/// =============================

async fn admin_run(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    let today = Utc::now().date_naive();
    info!(date = %today, "admin triggered daily update");

    match state.orchestrator.run_daily_update(today).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Daily update failed: {}", e))),
        ),
    }
}

async fn admin_rescore(
    State(state): State<ApiState>,
    Json(req): Json<RescoreRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let date = req.date.unwrap_or_else(|| Utc::now().date_naive());
    info!(date = %date, "admin triggered rescore");

    match state.orchestrator.rescore(date).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Rescore failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<ScoreOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/score", get(get_score))
        .route("/api/score/history", get(get_history))
        .route("/api/admin/run", post(admin_run))
        .route("/api/admin/rescore", post(admin_rescore))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<ScoreOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

//! REST API server for the tax orchestrator
//!
//! Exposes conversation turns and session snapshots over HTTP

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::TurnRequest;

// =============================
// Request Models
// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TurnPayload {
    /// Omitted on the first turn; a new session id is issued
    pub session_id: Option<String>,
    pub utterance: String,
    #[serde(default)]
    pub document: Option<String>,
}

// =============================
// Response Wrapper
// =============================

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
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

// =============================
// Handlers
// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn run_turn(
    State(state): State<ApiState>,
    Json(payload): Json<TurnPayload>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(session_id = %session_id, "Received turn");

    let mut request = TurnRequest::new(session_id, payload.utterance);
    request.document = payload.document;

    match state.orchestrator.run_turn(request).await {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(OrchestrationError::InvalidRequest(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Invalid request: {}", reason))),
        ),
        Err(e) => {
            error!(error = %e, "Turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Turn failed".to_string())),
            )
        }
    }
}

async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.store().load(&session_id).await {
        Ok(Some(conversation)) => (StatusCode::OK, Json(ApiResponse::success(conversation))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session {} not found", session_id))),
        ),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Session lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Session store unavailable".to_string())),
            )
        }
    }
}

// =============================
// Router
// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/turn", post(run_turn))
        .route("/api/sessions/:session_id", get(get_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

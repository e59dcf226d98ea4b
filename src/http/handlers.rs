//! HTTP route handlers
//!
//! Apart from the status routes these return fixed placeholder payloads

use std::sync::Arc;

use axum::{extract::State, Json};

use super::dto::{
    BuildResponse, ConceptList, HealthResponse, HeartbeatResponse, OrchestrateResponse,
    ServiceStatus, SystemStatus, ToolList,
};
use super::AppState;

/// Name reported by `/status`
pub const SERVICE_NAME: &str = "gaia-external-brain";

/// Liveness probe reporting the deployment environment
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        env: state.app_env.clone(),
    })
}

/// Service name and uptime
pub async fn status(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        service: SERVICE_NAME.into(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Operational status with the number of open WebSocket connections
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    Json(SystemStatus {
        status: "operational".into(),
        connections: state.registry.len().await,
    })
}

pub async fn heartbeat() -> Json<HeartbeatResponse> {
    Json(HeartbeatResponse {
        heartbeat: "received".into(),
    })
}

pub async fn orchestrate() -> Json<OrchestrateResponse> {
    Json(OrchestrateResponse {
        orchestrate: "started".into(),
    })
}

pub async fn list_tools() -> Json<ToolList> {
    Json(ToolList { tools: Vec::new() })
}

pub async fn build_tool() -> Json<BuildResponse> {
    Json(BuildResponse {
        build: "started".into(),
    })
}

pub async fn learning_concepts() -> Json<ConceptList> {
    Json(ConceptList {
        concepts: Vec::new(),
    })
}

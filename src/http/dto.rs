//! Response bodies of the HTTP API

use serde::{Deserialize, Serialize};

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub env: String,
}

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub uptime_secs: u64,
}

/// Body of `GET /api/v1/system/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    pub connections: usize,
}

/// Body of `POST /api/v1/system/heartbeat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub heartbeat: String,
}

/// Body of `POST /api/v1/system/orchestrate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrateResponse {
    pub orchestrate: String,
}

/// Body of `GET /api/v1/tools`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<serde_json::Value>,
}

/// Body of `POST /api/v1/tools/build`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResponse {
    pub build: String,
}

/// Body of `GET /api/v1/learning/concepts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptList {
    pub concepts: Vec<serde_json::Value>,
}

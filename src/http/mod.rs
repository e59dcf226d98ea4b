//! HTTP API and Axum router setup
//!
//! Serves the health and status routes plus the placeholder orchestration,
//! tools and learning routes

pub mod dto;
pub mod handlers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::server::ConnectionRegistry;

/// Shared state accessible from all handlers
pub struct AppState {
    pub app_env: String,
    pub registry: Arc<ConnectionRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(app_env: impl Into<String>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            app_env: app_env.into(),
            registry,
            started_at: Instant::now(),
        }
    }
}

/// Builds the router with tracing and permissive CORS
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    let api = Router::new()
        .route("/system/status", get(handlers::system_status))
        .route("/system/heartbeat", post(handlers::heartbeat))
        .route("/system/orchestrate", post(handlers::orchestrate))
        .route("/tools", get(handlers::list_tools))
        .route("/tools/build", post(handlers::build_tool))
        .route("/learning/concepts", get(handlers::learning_concepts));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .nest("/api/v1", api)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

/// Binds `addr` and serves the API until the shutdown signal fires
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP API listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    info!("HTTP API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::dto::*;
    use super::*;
    use axum::http::{Method, StatusCode};
    use serde::de::DeserializeOwned;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::server::Connection;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            "test",
            Arc::new(ConnectionRegistry::new()),
        ))
    }

    async fn call<T: DeserializeOwned>(
        state: Arc<AppState>,
        method: Method,
        uri: &str,
    ) -> (StatusCode, T) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body): (_, HealthResponse) =
            call(test_state(), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.env, "test");
    }

    #[tokio::test]
    async fn test_status() {
        let (status, body): (_, ServiceStatus) =
            call(test_state(), Method::GET, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.service, "gaia-external-brain");
        assert!(body.uptime_secs < 60);
    }

    #[tokio::test]
    async fn test_system_status_counts_connections() {
        let state = test_state();
        let (a, _rx_a) = Connection::channel(1);
        let (tx, _rx_b) = mpsc::channel(1);
        state.registry.add(a).await;
        state
            .registry
            .add(Connection::new(crate::server::ConnectionId::new(), tx))
            .await;

        let (status, body): (_, SystemStatus) =
            call(state, Method::GET, "/api/v1/system/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "operational");
        assert_eq!(body.connections, 2);
    }

    #[tokio::test]
    async fn test_placeholder_routes() {
        let (status, body): (_, HeartbeatResponse) =
            call(test_state(), Method::POST, "/api/v1/system/heartbeat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.heartbeat, "received");

        let (_, body): (_, OrchestrateResponse) =
            call(test_state(), Method::POST, "/api/v1/system/orchestrate").await;
        assert_eq!(body.orchestrate, "started");

        let (_, body): (_, ToolList) = call(test_state(), Method::GET, "/api/v1/tools").await;
        assert!(body.tools.is_empty());

        let (_, body): (_, BuildResponse) =
            call(test_state(), Method::POST, "/api/v1/tools/build").await;
        assert_eq!(body.build, "started");

        let (_, body): (_, ConceptList) =
            call(test_state(), Method::GET, "/api/v1/learning/concepts").await;
        assert!(body.concepts.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/system/heartbeat")
            .body(Body::empty())
            .unwrap();
        let response = router(test_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

//! WebSocket server implementation
//!
//! Listens on a configurable port, upgrades connections on the configured
//! path, and echoes every text frame it receives to all connected peers.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::config::{ServiceConfig, DEFAULT_QUEUE_CAPACITY};

/// Prefix added to every echoed frame
pub const ECHO_PREFIX: &str = "echo: ";

/// Build the frame broadcast in reply to an inbound text frame
pub fn echo(text: &str) -> String {
    format!("{ECHO_PREFIX}{text}")
}

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Request path accepted by the handshake
    pub path: String,
    /// Outbound queue size of each connection
    pub queue_capacity: usize,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            path: "/ws".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the handshake path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the per-connection outbound queue size
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl From<&ServiceConfig> for ServerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self::new(config.bind.clone(), config.ws_port)
            .with_path(config.ws_path.clone())
            .with_queue_capacity(config.queue_capacity)
    }
}

/// WebSocket server feeding the connection registry
pub struct WebSocketServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig, registry: Arc<ConnectionRegistry>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    ///
    /// Stops accepting and sends a close frame to every open connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and run the server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket server listening on ws://{}{}", addr, self.config.path);

        self.serve(listener).await
    }

    /// Accept connections from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let registry = Arc::clone(&self.registry);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            let path = self.config.path.clone();
                            let queue_capacity = self.config.queue_capacity;

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, registry, shutdown_rx, path, queue_capacity).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping WebSocket server");
                    break;
                }
            }
        }

        if !self.registry.is_empty().await {
            let open: Vec<String> = self
                .registry
                .ids()
                .await
                .iter()
                .map(ToString::to_string)
                .collect();
            info!("Closing {} open connections: {}", open.len(), open.join(", "));
        }

        Ok(())
    }
}

/// Reject handshakes that do not target the endpoint path
fn check_path(request: &Request, response: Response, path: &str) -> Result<Response, ErrorResponse> {
    if request.uri().path() == path {
        return Ok(response);
    }

    warn!("Rejecting WebSocket handshake for {}", request.uri().path());
    let mut rejection = ErrorResponse::new(Some(format!(
        "No WebSocket endpoint at {}",
        request.uri().path()
    )));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

/// Handle a single WebSocket connection
///
/// A failed handshake is returned as an error and nothing is registered.
/// Once registered, the connection is removed however the session ends.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
    path: String,
    queue_capacity: usize,
) -> anyhow::Result<()> {
    debug!("New connection from {}", peer_addr);

    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        check_path(request, response, &path)
    })
    .await?;

    let (connection, mut outbound_rx) = Connection::channel(queue_capacity);
    let id = connection.id();
    register(&registry, connection).await?;
    info!("Connection {} from {} registered", id, peer_addr);

    let result = run_session(
        ws_stream,
        id,
        &registry,
        &mut outbound_rx,
        &mut shutdown_rx,
    )
    .await;

    registry.disconnect(id).await;
    info!("Connection {} from {} closed", id, peer_addr);
    result
}

/// Add a connection to the registry, failing if its id is already taken
///
/// A session that failed here must not run, or its final `disconnect`
/// would remove the other connection with the same id.
async fn register(registry: &ConnectionRegistry, connection: Connection) -> anyhow::Result<()> {
    let id = connection.id();
    if !registry.add(connection).await {
        anyhow::bail!("connection {} is already registered", id);
    }
    Ok(())
}

/// Pump inbound frames into broadcasts and queued broadcasts into the socket
async fn run_session(
    ws_stream: WebSocketStream<TcpStream>,
    id: ConnectionId,
    registry: &ConnectionRegistry,
    outbound_rx: &mut mpsc::Receiver<String>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received {} bytes from {}", text.len(), id);
                        let outcome = registry.broadcast(&echo(&text)).await;
                        if !outcome.removed.is_empty() {
                            debug!("Broadcast from {} dropped {} connections", id, outcome.removed.len());
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes), ignoring", id, data.len());
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                        // tungstenite queues the pong for a ping and flushes it on the next read
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Client {} requested close", id);
                        // Flush the close reply tungstenite queued
                        let _ = ws_sender.flush().await;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", id, e);
                        break;
                    }
                    None => {
                        debug!("Connection {} closed by peer", id);
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        ws_sender.send(Message::Text(text)).await?;
                    }
                    None => {
                        debug!("Connection {} was dropped from the registry", id);
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received, closing connection {}", id);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use scribe_core::{ClientId, JobId, StatusEvent};
use scribe_engine::{Orchestrator, StatusPublisher};
use scribe_store::{JobRepo, StoreError, TranscriptRepo};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::bridge;
use crate::client::{self, ClientRegistry};
use crate::handlers;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobRepo,
    pub transcripts: TranscriptRepo,
    pub orchestrator: Orchestrator,
    pub registry: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/jobs/{id}", get(handlers::job_status))
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
        .route(
            "/jobs/{id}/export/{format}",
            get(handlers::export_transcript),
        )
        .route("/queue", get(handlers::queue_stats))
        .route("/health", get(handlers::health))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the
/// background tasks alive.
pub async fn start(
    config: ServerConfig,
    jobs: JobRepo,
    transcripts: TranscriptRepo,
    orchestrator: Orchestrator,
    publisher: Arc<StatusPublisher>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let bridge_handle = bridge::create_bridge(Arc::clone(&registry), publisher.subscribe());
    let cleanup_handle = client::start_cleanup_task(
        Arc::clone(&registry),
        std::time::Duration::from_secs(60),
    );

    let (message_tx, message_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let subscription_handle = tokio::spawn(process_client_messages(
        message_rx,
        Arc::clone(&registry),
        jobs.clone(),
    ));

    let state = AppState {
        jobs,
        transcripts,
        orchestrator,
        registry,
        message_tx,
    };
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "transcription server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bridge: bridge_handle,
        _subscriptions: subscription_handle,
        _cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _subscriptions: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.registry.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    client::handle_ws_connection(socket, client_id, rx, state.registry, state.message_tx).await;
}

/// Requests a client can make over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    SubscribeJobStatus { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    UnsubscribeJobStatus { job_id: JobId },
}

/// Apply subscription requests from connected clients. A subscribe is
/// answered immediately with a status snapshot, so a client that missed
/// pushes (or just connected) never waits for the next one to sync up.
async fn process_client_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    registry: Arc<ClientRegistry>,
    jobs: JobRepo,
) {
    while let Some((client_id, raw)) = rx.recv().await {
        let message: ClientMessage = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "ignoring unparseable client message");
                continue;
            }
        };

        match message {
            ClientMessage::SubscribeJobStatus { job_id } => {
                registry.subscribe(&client_id, job_id.clone()).await;
                match jobs.get(&job_id) {
                    Ok(job) => {
                        let snapshot = StatusEvent::JobStatusUpdate {
                            view: job.status_view(),
                        };
                        if let Ok(json) = serde_json::to_string(&snapshot) {
                            registry.send_to(&client_id, json).await;
                        }
                    }
                    Err(StoreError::NotFound(_)) => {
                        let error = serde_json::json!({
                            "type": "error",
                            "message": format!("job {job_id} not found"),
                        });
                        registry.send_to(&client_id, error.to_string()).await;
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "snapshot fetch failed");
                    }
                }
            }
            ClientMessage::UnsubscribeJobStatus { job_id } => {
                registry.unsubscribe(&client_id, &job_id).await;
            }
        }
    }
}

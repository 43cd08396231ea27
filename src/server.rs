use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::realtime::SessionService;
use crate::realtime::events::{InboundEvent, OutboundEvent};
use crate::realtime::session::SessionHandle;

const OUTBOUND_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(service: Arc<SessionService>, metrics: PrometheusHandle) -> Self {
        Self { service, metrics }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub conversation_id: Option<Uuid>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status().await)
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state.service, socket, query))
}

async fn handle_socket(service: Arc<SessionService>, socket: WebSocket, query: ConnectQuery) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(OUTBOUND_BUFFER);

    let session = match service
        .connect(
            query.user_id.as_deref().unwrap_or(""),
            query.workspace_id.as_deref().unwrap_or(""),
            query.conversation_id,
            tx,
        )
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, code = e.code(), "websocket handshake rejected");
            if let Ok(payload) = serde_json::to_string(&OutboundEvent::Error {
                error: e.to_string(),
                code: e.code().into(),
            }) {
                let _ = sink.send(Message::Text(payload)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(session_id = %session.id, error = %e, "websocket read error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                match serde_json::from_str::<InboundEvent>(&text) {
                    Ok(event) => service.handle_event(&session, event).await,
                    Err(e) => {
                        debug!(session_id = %session.id, error = %e, "malformed inbound event");
                        if malformed(&service, &session, e.to_string()).await {
                            break;
                        }
                    }
                }
                // handle_event may have force-disconnected the session
                if !service.is_active(session.id).await {
                    break;
                }
            }
            Message::Close(_) => break,
            // pings are answered by axum; binary frames are ignored
            _ => {}
        }
    }

    service.disconnect(session.id).await;
    writer.abort();
}

/// Malformed payloads get a typed error and count toward the disconnect
/// threshold. Returns true when the session should be dropped.
async fn malformed(service: &Arc<SessionService>, session: &Arc<SessionHandle>, detail: String) -> bool {
    let err = ServiceError::MalformedEvent(detail);
    session.send(OutboundEvent::Error {
        error: err.to_string(),
        code: err.code().into(),
    });
    session.with_metrics(|m| m.errors += 1).await;
    let consecutive = session.record_error();
    if consecutive >= service.config().error_disconnect_threshold {
        warn!(session_id = %session.id, consecutive, "too many malformed events, disconnecting");
        service.disconnect(session.id).await;
        true
    } else {
        false
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install shutdown handler");
    }
    info!("shutdown signal received");
}

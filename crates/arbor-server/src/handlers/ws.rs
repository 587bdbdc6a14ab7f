//! WebSocket handshake and the per-connection loop.
//!
//! The model is loaded before the upgrade, so an unknown model id or a malformed
//! load request is answered with a plain HTTP error and no session is created.

use std::sync::Arc;

use arbor_engine::ModelHandle;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ServerError;
use crate::models::{ConnectQuery, ServerEvent};
use crate::params::ChatMode;
use crate::session::ChatSession;
use crate::session_manager::SessionGuard;
use crate::state::AppState;

/// `GET /ws/chat`
pub async fn handle_chat_ws(
    ws: Option<WebSocketUpgrade>,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, ServerError> {
    connect(ChatMode::Chat, ws, state, query).await
}

/// `GET /ws/text_generation`
pub async fn handle_text_generation_ws(
    ws: Option<WebSocketUpgrade>,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, ServerError> {
    connect(ChatMode::TextGeneration, ws, state, query).await
}

async fn connect(
    mode: ChatMode,
    ws: Option<WebSocketUpgrade>,
    state: AppState,
    query: ConnectQuery,
) -> Result<Response, ServerError> {
    let spec = query.to_spec()?;
    let guard = state
        .sessions
        .try_acquire(mode, format!("model-{}", spec.model_id))
        .ok_or(ServerError::ServiceUnavailable)?;
    let model = state.loader.load(&spec).await?;
    let ws = ws.ok_or_else(|| {
        ServerError::InvalidRequest("expected a WebSocket upgrade request".to_string())
    })?;

    Ok(ws.on_upgrade(move |socket| run_session(socket, state, mode, model, guard)))
}

async fn run_session(
    socket: WebSocket,
    state: AppState,
    mode: ChatMode,
    model: ModelHandle,
    guard: SessionGuard,
) {
    let session_id = guard.session_id();
    tracing::info!(%session_id, %mode, model = %model.info().name, "session opened");

    let (mut sink, mut stream) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(state.config.event_buffer);

    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(error = %err, "event serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let cancel = guard.cancellation_token();
    let mut session = ChatSession::new(
        session_id,
        model,
        mode,
        state.config.defaults.clone(),
        Arc::clone(&state.branches),
        events_tx,
        cancel.clone(),
    );
    session.announce().await;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
            Some(Ok(Message::Binary(bytes))) => {
                session.handle_text(&String::from_utf8_lossy(&bytes)).await
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                tracing::debug!(%session_id, error = %err, "socket read failed");
                break;
            }
        }
    }

    session.shutdown().await;
    drop(guard);
    let _ = writer.await;
    tracing::info!(%session_id, "session closed");
}

//! WebSocket stream of engine events.
//!
//! `/api/v1/ws/events` upgrades to a WebSocket and forwards every
//! [`WorkflowEvent`] published on the [`EventBus`] as a JSON text frame.
//! `?execution_id=` narrows the stream to one execution.
//!
//! A slow client that lags behind the broadcast channel misses the skipped
//! events and keeps receiving. Closing the socket never affects executions.
//!
//! [`EventBus`]: agentflow_core::event::EventBus

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use agentflow_types::event::WorkflowEvent;

use crate::state::AppState;

/// Incoming frame from a client. Anything else is logged and ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Keep-alive. Answered with `{"type":"pong"}`.
    Ping,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventStreamQuery {
    pub execution_id: Option<Uuid>,
}

/// GET /api/v1/ws/events
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, query.execution_id))
}

fn wanted(event: &WorkflowEvent, filter: Option<Uuid>) -> bool {
    filter.is_none_or(|id| event.execution_id() == id)
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, filter: Option<Uuid>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut event_rx = state.event_bus.subscribe();

    loop {
        tokio::select! {
            event_result = event_rx.recv() => {
                match event_result {
                    Ok(event) if wanted(&event, filter) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize workflow event");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "websocket subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsCommand>(&text) {
                            Ok(WsCommand::Ping) => {
                                let pong = serde_json::json!({ "type": "pong" }).to_string();
                                if ws_sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::debug!(raw = %text.as_str(), error = %err, "ignoring websocket frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket receive error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("websocket connection closed");
}

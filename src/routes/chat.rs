use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::auth::{self, AuthUser};
use crate::db::models::ChatMessage;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Join { instance_id: String },
    #[serde(rename_all = "camelCase")]
    Message { instance_id: String, text: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerFrame {
    Message { message: ChatMessage },
    Error { message: String },
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quest-instances/{id}/chat", get(history).post(send))
        .route("/ws", get(ws_upgrade))
}

async fn history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    Ok(Json(state.chat.list_messages(&id, &user.id)?))
}

/// Persist, then fan out, then best-effort notify. A message is never
/// broadcast before it is durably recorded.
async fn send(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ChatMessage>> {
    let message = state.chat.send_message(&id, &user.id, &req.text)?;
    state.rooms.publish(&id, message.clone());
    state
        .chat
        .notify_participants(&id, &user.id, &message.text)
        .await;
    Ok(Json(message))
}

/// Live chat. The mobile client authenticates the upgrade with its bearer
/// token as a query parameter, then speaks `join` and `message` frames.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, AppError> {
    let user = auth::lookup_session(&state.db, &query.token)?.ok_or(AppError::Unauthorized)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthUser) {
    let (mut sink, mut stream) = socket.split();

    // Single writer task; room forwarders and the read loop both feed it.
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(32);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut joined: HashSet<String> = HashSet::new();
    let mut forwarders = Vec::new();

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Join { instance_id }) => {
                match state.chat.is_participant(&instance_id, &user.id) {
                    Ok(true) => {
                        if joined.insert(instance_id.clone()) {
                            let mut room_rx = state.rooms.subscribe(&instance_id);
                            let tx = tx.clone();
                            forwarders.push(tokio::spawn(async move {
                                while let Ok(message) = room_rx.recv().await {
                                    if tx.send(ServerFrame::Message { message }).await.is_err() {
                                        break;
                                    }
                                }
                            }));
                        }
                    }
                    Ok(false) => {
                        let _ = tx
                            .send(ServerFrame::Error {
                                message: "Join the quest to chat".into(),
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::error!("Chat join check failed: {}", e);
                    }
                }
            }
            Ok(ClientFrame::Message { instance_id, text }) => {
                match state.chat.send_message(&instance_id, &user.id, &text) {
                    Ok(message) => {
                        state.rooms.publish(&instance_id, message.clone());
                        state
                            .chat
                            .notify_participants(&instance_id, &user.id, &message.text)
                            .await;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(ServerFrame::Error {
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            Err(_) => {
                let _ = tx
                    .send(ServerFrame::Error {
                        message: "Unrecognized frame".into(),
                    })
                    .await;
            }
        }
    }

    for task in forwarders {
        task.abort();
    }
    drop(tx);
    let _ = writer.await;
}

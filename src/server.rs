// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The WebSocket transport: turns the JSON frames of the wire protocol
//! into calls against [`crate::pipeline::EditPipeline`] and
//! [`crate::hub::SessionHub`]. The core modules know nothing about HTTP
//! or WebSocket framing; this is the only module that does.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::TokenVerifier;
use crate::hub::{SessionHub, SessionId};
use crate::model::{DocumentId, IncomingEdit, ServerMsg};
use crate::pipeline::EditPipeline;
use crate::store::DocumentStore;

const POLICY_VIOLATION: u16 = 1008;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub hub: Arc<SessionHub>,
    pub pipeline: Arc<EditPipeline>,
    pub auth: Arc<dyn TokenVerifier>,
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:document_id", get(connect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn connect(
    Path(document_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let document_id = DocumentId::from(document_id.as_str());
    ws.on_upgrade(move |socket| handle_connection(socket, document_id, query.token, state))
}

async fn handle_connection(socket: WebSocket, document_id: DocumentId, token: String, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let Some(user_id) = state.auth.verify_token(&token).await else {
        warn!(%document_id, "rejecting connection: invalid token");
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: POLICY_VIOLATION,
                reason: "invalid or missing token".into(),
            })))
            .await;
        return;
    };

    let document = match state.store.get_document(&document_id).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            let _ = sink.send(server_message(&ServerMsg::Error {
                message: "Document not found".to_string(),
            })).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
        Err(err) => {
            warn!(%document_id, error = %err, "failed to look up document at connect time");
            let _ = sink.send(server_message(&ServerMsg::Error {
                message: "Document not found".to_string(),
            })).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let session = SessionId::new();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
    state.hub.connect(&document_id, session, outbox_tx).await;
    info!(%document_id, %user_id, session_id = %session.0, "session connected");

    if sink
        .send(server_message(&ServerMsg::Init {
            content: document.content.to_string(),
            version: document.version,
        }))
        .await
        .is_err()
    {
        state.hub.disconnect(&document_id, session).await;
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if sink.send(server_message(&message)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%document_id, session_id = %session.0, error = %err, "socket read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                let edit: IncomingEdit = match serde_json::from_str(&text) {
                    Ok(edit) => edit,
                    Err(err) => {
                        state
                            .hub
                            .send_to(
                                &document_id,
                                session,
                                ServerMsg::Error {
                                    message: format!("Invalid message format: {err}"),
                                },
                            )
                            .await;
                        continue;
                    }
                };

                if let Err(err) = state
                    .pipeline
                    .submit_edit(&document_id, user_id.clone(), session, edit)
                    .await
                {
                    warn!(%document_id, session_id = %session.0, error = %err, "edit submission failed");
                    state
                        .hub
                        .send_to(&document_id, session, ServerMsg::Error { message: err.to_string() })
                        .await;
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.disconnect(&document_id, session).await;
    writer.abort();
    info!(%document_id, session_id = %session.0, "session disconnected");
}

fn server_message(message: &ServerMsg) -> Message {
    Message::Text(serde_json::to_string(message).expect("ServerMsg always serializes"))
}

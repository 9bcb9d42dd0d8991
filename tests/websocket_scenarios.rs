// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Black-box end-to-end tests driving the real WebSocket transport
//! (`quillsync::server::router`) with `tokio-tungstenite` clients, covering
//! sequential edits, stale-version rejection, malformed frames, auth
//! failure, unknown documents, and multi-subscriber broadcast fan-out.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quillsync::auth::DevTokenVerifier;
use quillsync::hub::SessionHub;
use quillsync::model::{Document, DocumentId, UserId};
use quillsync::pipeline::EditPipeline;
use quillsync::server::{router, AppState};
use quillsync::store::{DocumentStore, InMemoryStore};
use ropey::Rope;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server(store: Arc<InMemoryStore>) -> String {
    let hub = SessionHub::new();
    let pipeline = Arc::new(EditPipeline::new(store.clone(), hub.clone()));
    let state = AppState {
        store,
        hub,
        pipeline,
        auth: Arc::new(DevTokenVerifier),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("server exited");
    });
    format!("ws://{addr}")
}

async fn seeded_store(doc_id: &str, content: &str) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_document(Document {
            id: DocumentId::from(doc_id),
            title: "t".to_string(),
            content: Rope::from_str(content),
            version: 0,
            owner_id: UserId::from("owner"),
        })
        .await;
    store
}

async fn recv_json(stream: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin)) -> Value {
    let msg = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("frame was not JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_a_sequential_insert() {
    let store = seeded_store("doc-a", "").await;
    let base = spawn_server(store.clone()).await;

    let (ws, _) = connect_async(format!("{base}/ws/doc-a?token=alice")).await.expect("connect");
    let (mut sink, mut stream) = ws.split();

    let init = recv_json(&mut stream).await;
    assert_eq!(init["type"], "init");
    assert_eq!(init["content"], "");
    assert_eq!(init["version"], 0);

    sink.send(Message::Text(
        json!({"position": 0, "insert_text": "Hello", "delete_len": 0, "base_version": 0}).to_string(),
    ))
    .await
    .expect("send edit");

    let ack = recv_json(&mut stream).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["updated_version"], 1);

    let doc = store.get_document(&DocumentId::from("doc-a")).await.unwrap().unwrap();
    assert_eq!(doc.content, "Hello");
    assert_eq!(doc.version, 1);
}

#[tokio::test]
async fn scenario_d_stale_base_version_replies_sync_needed() {
    let store = seeded_store("doc-d", "z").await;
    // Advance the document to version 5 behind the connecting client's back.
    for i in 0..5 {
        let user = UserId::from("bg");
        store
            .run_edit_transaction(
                &DocumentId::from("doc-d"),
                i,
                user,
                Box::new(|_doc, _missed| quillsync::model::TransformedEdit {
                    position: 0,
                    insert_text: String::new(),
                    delete_len: 0,
                }),
            )
            .await
            .unwrap();
    }

    let base = spawn_server(store.clone()).await;
    let (ws, _) = connect_async(format!("{base}/ws/doc-d?token=carol")).await.expect("connect");
    let (mut sink, mut stream) = ws.split();

    let init = recv_json(&mut stream).await;
    assert_eq!(init["version"], 5);

    sink.send(Message::Text(
        json!({"position": 0, "insert_text": "q", "delete_len": 0, "base_version": 3}).to_string(),
    ))
    .await
    .expect("send edit");

    let reply = recv_json(&mut stream).await;
    assert_eq!(reply["type"], "sync_needed");
    assert_eq!(reply["content"], "z");
    assert_eq!(reply["version"], 5);
}

#[tokio::test]
async fn scenario_f_malformed_frame_keeps_connection_open() {
    let store = seeded_store("doc-f", "abc").await;
    let base = spawn_server(store.clone()).await;

    let (ws, _) = connect_async(format!("{base}/ws/doc-f?token=dave")).await.expect("connect");
    let (mut sink, mut stream) = ws.split();

    let _init = recv_json(&mut stream).await;

    sink.send(Message::Text("not json".to_string())).await.expect("send garbage");
    let reply = recv_json(&mut stream).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("Invalid message format"));

    // Connection is still alive and the document is untouched: a well-formed
    // edit afterwards still works.
    sink.send(Message::Text(
        json!({"position": 3, "insert_text": "!", "delete_len": 0, "base_version": 0}).to_string(),
    ))
    .await
    .expect("send edit");
    let ack = recv_json(&mut stream).await;
    assert_eq!(ack["type"], "ack");
}

#[tokio::test]
async fn invalid_token_closes_with_policy_violation() {
    let store = seeded_store("doc-auth", "").await;
    let base = spawn_server(store).await;

    let (ws, _) = connect_async(format!("{base}/ws/doc-auth?token=")).await.expect("connect");
    let (_sink, mut stream) = ws.split();

    let msg = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1008),
        other => panic!("expected a close frame with code 1008, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_document_replies_error_then_closes() {
    let store = Arc::new(InMemoryStore::new());
    let base = spawn_server(store).await;

    let (ws, _) = connect_async(format!("{base}/ws/does-not-exist?token=erin")).await.expect("connect");
    let (_sink, mut stream) = ws.split();

    let reply = recv_json(&mut stream).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Document not found");
}

#[tokio::test]
async fn broadcast_reaches_other_subscriber_not_sender() {
    let store = seeded_store("doc-bc", "").await;
    let base = spawn_server(store).await;

    let (ws_a, _) = connect_async(format!("{base}/ws/doc-bc?token=alice")).await.expect("connect a");
    let (mut sink_a, mut stream_a) = ws_a.split();
    let _init_a = recv_json(&mut stream_a).await;

    let (ws_b, _) = connect_async(format!("{base}/ws/doc-bc?token=bob")).await.expect("connect b");
    let (_sink_b, mut stream_b) = ws_b.split();
    let _init_b = recv_json(&mut stream_b).await;

    sink_a
        .send(Message::Text(
            json!({"position": 0, "insert_text": "hi", "delete_len": 0, "base_version": 0}).to_string(),
        ))
        .await
        .expect("send edit");

    let ack = recv_json(&mut stream_a).await;
    assert_eq!(ack["type"], "ack");

    let op = recv_json(&mut stream_b).await;
    assert_eq!(op["type"], "op");
    assert_eq!(op["updated_version"], 1);
}

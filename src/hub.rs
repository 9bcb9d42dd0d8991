//! The Session Hub: tracks the live subscriber sessions per document and
//! multiplexes outbound frames to them.
//!
//! Each subscriber is represented by an outbox: an unbounded channel whose
//! receiving end is owned by that connection's write task. Routing a
//! message through the outbox (rather than calling the socket directly)
//! is what keeps sends on a single connection serialized, since only one
//! task ever drains that receiver.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{DocumentId, ServerMsg};

/// Identifies one live connection within the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

type Outbox = mpsc::UnboundedSender<ServerMsg>;

#[derive(Default)]
pub struct SessionHub {
    documents: RwLock<HashMap<DocumentId, HashMap<SessionId, Outbox>>>,
}

impl SessionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `session` as a subscriber of `document_id`, creating the
    /// document's subscriber set if this is its first connection.
    /// Idempotent: connecting the same session id twice just replaces its
    /// outbox rather than creating a duplicate entry.
    pub async fn connect(&self, document_id: &DocumentId, session: SessionId, outbox: Outbox) {
        let mut documents = self.documents.write().await;
        documents.entry(document_id.clone()).or_default().insert(session, outbox);
        debug!(%document_id, session_id = %session.0, "session connected");
    }

    /// Remove `session` from `document_id`'s subscriber set. If the set
    /// becomes empty, the document entry itself is dropped.
    pub async fn disconnect(&self, document_id: &DocumentId, session: SessionId) {
        let mut documents = self.documents.write().await;
        if let Some(subscribers) = documents.get_mut(document_id) {
            subscribers.remove(&session);
            if subscribers.is_empty() {
                documents.remove(document_id);
            }
        }
        debug!(%document_id, session_id = %session.0, "session disconnected");
    }

    /// Send `message` to every subscriber of `document_id` except
    /// `exclude`. A session whose outbox has been dropped (its connection
    /// died) is pruned from the set; that failure never stops delivery to
    /// the remaining subscribers.
    pub async fn broadcast_except(&self, document_id: &DocumentId, message: ServerMsg, exclude: SessionId) {
        let dead = {
            let documents = self.documents.read().await;
            let Some(subscribers) = documents.get(document_id) else {
                return;
            };
            let mut dead = Vec::new();
            for (&session, outbox) in subscribers {
                if session == exclude {
                    continue;
                }
                if outbox.send(message.clone()).is_err() {
                    warn!(%document_id, session_id = %session.0, "dropping dead subscriber outbox");
                    dead.push(session);
                }
            }
            dead
        };

        if !dead.is_empty() {
            let mut documents = self.documents.write().await;
            if let Some(subscribers) = documents.get_mut(document_id) {
                for session in dead {
                    subscribers.remove(&session);
                }
                if subscribers.is_empty() {
                    documents.remove(document_id);
                }
            }
        }
    }

    /// Send `message` to exactly one subscriber. Used for the `ack` and
    /// `sync_needed`/`error` replies that only the sender should see.
    /// Silently drops the message if the session has already disconnected
    /// (e.g. it disconnected mid-commit; see the pipeline's ack-drop note).
    pub async fn send_to(&self, document_id: &DocumentId, session: SessionId, message: ServerMsg) {
        let documents = self.documents.read().await;
        if let Some(subscribers) = documents.get(document_id) {
            if let Some(outbox) = subscribers.get(&session) {
                let _ = outbox.send(message);
            }
        }
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self, document_id: &DocumentId) -> usize {
        self.documents
            .read()
            .await
            .get(document_id)
            .map_or(0, HashMap::len)
    }
}

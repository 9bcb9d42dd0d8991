//! The Edit Pipeline: turns one validated inbound edit message into a
//! committed [`Operation`] and a broadcast-ready payload, or into a
//! `sync_needed` reply.
//!
//! This module is transport-agnostic: it knows nothing about WebSockets
//! or JSON framing, only about [`crate::store::DocumentStore`] and
//! [`crate::hub::SessionHub`]. `server` is the only module that calls it.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::SessionError;
use crate::hub::{SessionHub, SessionId};
use crate::model::{ClientEdit, Document, DocumentId, IncomingEdit, OperationView, ServerMsg, UserId};
use crate::ot;
use crate::store::DocumentStore;

pub struct EditPipeline {
    store: Arc<dyn DocumentStore>,
    hub: Arc<SessionHub>,
}

impl EditPipeline {
    pub fn new(store: Arc<dyn DocumentStore>, hub: Arc<SessionHub>) -> Self {
        Self { store, hub }
    }

    /// Run the full preflight-then-commit-then-deliver path for one inbound
    /// edit from `session` on behalf of `user_id`.
    ///
    /// Errors returned here are the ones fatal enough that the caller
    /// should close the connection (document gone, storage failure while
    /// even the preflight read failed). Recoverable outcomes — a stale
    /// `base_version`, or a transaction failure after the document was
    /// found — are reported to the sender as `sync_needed`/`error` frames
    /// and this returns `Ok(())`.
    pub async fn submit_edit(
        &self,
        document_id: &DocumentId,
        user_id: UserId,
        session: SessionId,
        edit: IncomingEdit,
    ) -> Result<(), SessionError> {
        let current = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(document_id.to_string()))?;

        if edit.base_version != current.version {
            self.hub
                .send_to(
                    document_id,
                    session,
                    ServerMsg::SyncNeeded {
                        content: current.content.to_string(),
                        version: current.version,
                    },
                )
                .await;
            return Ok(());
        }

        let client_edit: ClientEdit = edit.into();
        let transform_user = user_id.clone();
        let transform: crate::store::TransformFn = Box::new(move |_document: &Document, missed| {
            ot::transform(&client_edit, missed, &transform_user)
        });

        let commit = match self
            .store
            .run_edit_transaction(document_id, current.version, user_id, transform)
            .await
        {
            Ok(commit) => commit,
            Err(err) => {
                error!(%document_id, error = %err, "edit transaction failed");
                self.hub
                    .send_to(
                        document_id,
                        session,
                        ServerMsg::Error {
                            message: err.to_string(),
                        },
                    )
                    .await;
                return Ok(());
            }
        };

        info!(
            %document_id,
            applied_version = commit.operation.applied_version,
            "edit committed"
        );

        let op = OperationView::from(&commit.operation);
        self.hub
            .send_to(
                document_id,
                session,
                ServerMsg::Ack {
                    op: op.clone(),
                    updated_version: commit.updated_version,
                },
            )
            .await;
        self.hub
            .broadcast_except(
                document_id,
                ServerMsg::Op {
                    op,
                    updated_version: commit.updated_version,
                },
                session,
            )
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, DocumentId, UserId};
    use crate::store::InMemoryStore;
    use ropey::Rope;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    async fn setup() -> (EditPipeline, Arc<InMemoryStore>, Arc<SessionHub>, DocumentId) {
        let store = Arc::new(InMemoryStore::new());
        let doc_id: DocumentId = "doc-1".into();
        store
            .insert_document(Document {
                id: doc_id.clone(),
                title: "t".to_string(),
                content: Rope::from_str("hello"),
                version: 0,
                owner_id: UserId::from("owner"),
            })
            .await;
        let hub = SessionHub::new();
        let pipeline = EditPipeline::new(store.clone(), hub.clone());
        (pipeline, store, hub, doc_id)
    }

    #[tokio::test]
    #[traced_test]
    async fn commits_edit_and_acks_sender() {
        let (pipeline, store, hub, doc_id) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionId::new();
        hub.connect(&doc_id, session, tx).await;

        pipeline
            .submit_edit(
                &doc_id,
                UserId::from("alice"),
                session,
                IncomingEdit {
                    position: 5,
                    insert_text: " world".to_string(),
                    delete_len: 0,
                    base_version: 0,
                },
            )
            .await
            .unwrap();

        let msg = rx.try_recv().expect("expected an ack");
        match msg {
            ServerMsg::Ack { updated_version, .. } => assert_eq!(updated_version, 1),
            other => panic!("expected Ack, got {other:?}"),
        }

        let doc = store.get_document(&doc_id).await.unwrap().unwrap();
        assert_eq!(doc.content, "hello world");
        assert_eq!(doc.version, 1);
        assert!(logs_contain("edit committed"));
    }

    #[tokio::test]
    async fn stale_base_version_short_circuits_to_sync_needed() {
        let (pipeline, store, hub, doc_id) = setup().await;
        store
            .run_edit_transaction(
                &doc_id,
                0,
                UserId::from("bob"),
                Box::new(|_doc, _missed| crate::model::TransformedEdit {
                    position: 5,
                    insert_text: "!".to_string(),
                    delete_len: 0,
                }),
            )
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionId::new();
        hub.connect(&doc_id, session, tx).await;

        pipeline
            .submit_edit(
                &doc_id,
                UserId::from("alice"),
                session,
                IncomingEdit {
                    position: 0,
                    insert_text: "x".to_string(),
                    delete_len: 0,
                    base_version: 0,
                },
            )
            .await
            .unwrap();

        match rx.try_recv().expect("expected a reply") {
            ServerMsg::SyncNeeded { version, .. } => assert_eq!(version, 1),
            other => panic!("expected SyncNeeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcasts_op_to_other_subscribers_not_sender() {
        let (pipeline, _store, hub, doc_id) = setup().await;
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = SessionId::new();
        let b = SessionId::new();
        hub.connect(&doc_id, a, tx_a).await;
        hub.connect(&doc_id, b, tx_b).await;

        pipeline
            .submit_edit(
                &doc_id,
                UserId::from("alice"),
                a,
                IncomingEdit {
                    position: 0,
                    insert_text: "x".to_string(),
                    delete_len: 0,
                    base_version: 0,
                },
            )
            .await
            .unwrap();

        matches!(rx_a.try_recv().unwrap(), ServerMsg::Ack { .. });
        matches!(rx_b.try_recv().unwrap(), ServerMsg::Op { .. });
    }
}

//! Core data types shared by the store, pipeline, hub, and wire protocol.
//!
//! `Operation` is the persisted, immutable record of a committed edit.
//! `SimpleOp` is the internal normalization the OT transformer works with
//! and never leaves [`crate::ot`].

use chrono::{DateTime, Utc};
use derive_more::{AsRef, Display};
use ropey::Rope;
use serde::{Deserialize, Serialize};

/// Opaque document identifier, as it appears in the connect URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, AsRef, Display, Serialize, Deserialize)]
#[as_ref(forward)]
pub struct DocumentId(pub String);

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The user id an external token verifier hands back to us. Compared
/// lexicographically by the OT transformer's insert/insert tie-break rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, AsRef, Display, Serialize, Deserialize)]
#[as_ref(forward)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A document's durable state: its text content and the version counter
/// that increases by exactly one per committed operation. `content` is a
/// [`Rope`] rather than a `String` so splicing an edit in is proportional
/// to the edit's size rather than the whole document's, the same reason
/// the daemon this core is descended from keeps text in a rope.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub content: Rope,
    pub version: u64,
    pub owner_id: UserId,
}

/// A committed, immutable edit record. `applied_version` is the document
/// version *after* this operation; for a given document these values form
/// the gap-free sequence 1, 2, 3, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub base_version: u64,
    pub position: usize,
    pub insert_text: String,
    pub delete_len: usize,
    pub applied_version: u64,
    pub created_at: DateTime<Utc>,
}

/// An edit as submitted by a client, before transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEdit {
    pub position: usize,
    pub insert_text: String,
    pub delete_len: usize,
    pub base_version: u64,
}

/// The result of transforming a [`ClientEdit`] against missed history:
/// same shape, rewritten coordinates, ready to apply to current content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedEdit {
    pub position: usize,
    pub insert_text: String,
    pub delete_len: usize,
}

/// Internal normalization of an operation used only inside the OT
/// transformer. At most one delete followed by one insert at the same
/// position; never persisted, never sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SimpleOp {
    Insert { pos: usize, text: String, user_id: UserId },
    Delete { pos: usize, length: usize, user_id: UserId },
}

/// Apply a transformed edit to `content` in place: delete first, then
/// insert at the resulting position, per the order the OT transformer
/// assumes. `position` is clamped into `[0, len(content)]` and
/// `delete_len` into `[0, len(content) - position]`; this never panics on
/// out-of-range input. All offsets are char offsets, matching the
/// transformer's coordinate space.
pub fn apply_operation(content: &mut Rope, position: usize, delete_len: usize, insert_text: &str) {
    let len = content.len_chars();
    let pos = position.min(len);
    let delete_len = delete_len.min(len - pos);

    if delete_len > 0 {
        content.remove(pos..pos + delete_len);
    }
    if !insert_text.is_empty() {
        content.insert(pos, insert_text);
    }
}

/// The `op` object embedded in `ack`/`op` server frames. A read-only view
/// of a committed [`Operation`] with wire-friendly field names; never
/// constructed from untrusted input. `applied_version` is deliberately
/// omitted here since it duplicates the frame's own `updated_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationView {
    pub id: i64,
    pub doc_id: DocumentId,
    pub user_id: UserId,
    pub base_version: u64,
    pub position: usize,
    pub insert_text: String,
    pub delete_len: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Operation> for OperationView {
    fn from(op: &Operation) -> Self {
        Self {
            id: op.id,
            doc_id: op.document_id.clone(),
            user_id: op.user_id.clone(),
            base_version: op.base_version,
            position: op.position,
            insert_text: op.insert_text.clone(),
            delete_len: op.delete_len,
            created_at: op.created_at,
        }
    }
}

/// An edit submitted by a client, exactly as it arrives over the wire.
/// `insert_text` defaults to empty and `delete_len` to zero so a pure
/// insert or pure delete frame need not spell out the other field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IncomingEdit {
    pub position: usize,
    #[serde(default)]
    pub insert_text: String,
    #[serde(default)]
    pub delete_len: usize,
    pub base_version: u64,
}

impl From<IncomingEdit> for ClientEdit {
    fn from(edit: IncomingEdit) -> Self {
        Self {
            position: edit.position,
            insert_text: edit.insert_text,
            delete_len: edit.delete_len,
            base_version: edit.base_version,
        }
    }
}

/// Every frame the server ever sends to a client, tagged by `type` so the
/// client can dispatch on it without a second parse pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once, immediately after a successful connect: the document's
    /// current content and version.
    Init { content: String, version: u64 },
    /// Reply to the frame's own author: their edit committed as `op` and
    /// the document is now at `updated_version`.
    Ack { op: OperationView, updated_version: u64 },
    /// Fan-out to every other subscriber: someone else's edit committed.
    Op { op: OperationView, updated_version: u64 },
    /// The submitted `base_version` is too far behind for transformation
    /// to be attempted; the client should discard local state and reload
    /// from `content` at `version`.
    SyncNeeded { content: String, version: u64 },
    /// A malformed frame, auth failure, or storage failure that does not
    /// warrant tearing down the connection.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_at_position() {
        let mut rope = Rope::from_str("");
        apply_operation(&mut rope, 0, 0, "Hello");
        assert_eq!(rope.to_string(), "Hello");
    }

    #[test]
    fn deletes_then_inserts() {
        // Scenario C: delete [1,4) from "abcdef" -> "aef", then insert "X" at 1.
        let mut rope = Rope::from_str("abcdef");
        apply_operation(&mut rope, 1, 3, "");
        assert_eq!(rope.to_string(), "aef");
        apply_operation(&mut rope, 1, 0, "X");
        assert_eq!(rope.to_string(), "aXef");
    }

    #[test]
    fn clamps_position_past_end() {
        let mut rope = Rope::from_str("abc");
        apply_operation(&mut rope, 100, 0, "!");
        assert_eq!(rope.to_string(), "abc!");
    }

    #[test]
    fn clamps_delete_len_past_end() {
        let mut rope = Rope::from_str("abc");
        apply_operation(&mut rope, 1, 100, "");
        assert_eq!(rope.to_string(), "a");
    }
}

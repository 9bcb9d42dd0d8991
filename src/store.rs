//! The Document Store: a transactional critical section keyed by
//! `document_id`, under which a document's current content/version can be
//! read with an exclusive hold, missed operations collected, and the
//! commit applied atomically.
//!
//! Two adapters are provided. [`InMemoryStore`] keeps everything in a
//! process-local map behind a per-document lock; it's what the tests in
//! this crate run against. [`SqliteStore`] persists to a SQLite database
//! through `rusqlite`, offloading blocking I/O to a worker thread via
//! `tokio::task::spawn_blocking`, per the per-document serialization
//! strategy chosen in the design notes: the lock lives in-process (a
//! `tokio::sync::Mutex` per document id), and the database transaction is
//! the durability backstop rather than the primary serialization point.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use ropey::Rope;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{apply_operation, Document, DocumentId, Operation, TransformedEdit, UserId};

/// The result of a successfully committed edit transaction.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub operation: Operation,
    pub updated_version: u64,
}

/// A pure function from "current document + missed history" to a
/// transformed edit. Boxed rather than generic so [`DocumentStore`] stays
/// object-safe: callers hold it as `Arc<dyn DocumentStore>`.
pub type TransformFn = Box<dyn Fn(&Document, &[Operation]) -> TransformedEdit + Send + Sync>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document's current state without taking the edit lock. Used
    /// for the pipeline's cheap preflight version check and for sending
    /// the initial `init` frame on connect.
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError>;

    /// Run one edit transaction: acquire an exclusive hold on the document
    /// row, collect operations with `applied_version > base_version`, call
    /// `transform` with the current document and that missed history,
    /// apply and persist the result, and commit. Rolls back leaving no
    /// partial state on any failure.
    async fn run_edit_transaction(
        &self,
        document_id: &DocumentId,
        base_version: u64,
        user_id: UserId,
        transform: TransformFn,
    ) -> Result<CommitResult, StoreError>;
}

/// Serializes transactions against the same document id. A document
/// absent from the map has never been locked; `get_or_create` inserts a
/// fresh lock lazily so unrelated documents never contend with each other.
#[derive(Default)]
struct DocumentLocks {
    locks: std::sync::Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    fn get_or_create(&self, id: &DocumentId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("document lock map poisoned");
        locks.entry(id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

struct DocState {
    document: Document,
    operations: Vec<Operation>,
}

/// An in-process store, suitable for tests and for embedding the core
/// without a database. Each document is guarded by its own lock, held for
/// the duration of `run_edit_transaction`.
#[derive(Default)]
pub struct InMemoryStore {
    docs: Mutex<HashMap<DocumentId, DocState>>,
    locks: DocumentLocks,
    next_op_id: std::sync::atomic::AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document. Not part of [`DocumentStore`]: document creation is
    /// an external collaborator's concern; the core only reads and mutates.
    pub async fn insert_document(&self, document: Document) {
        let mut docs = self.docs.lock().await;
        docs.insert(
            document.id.clone(),
            DocState {
                document,
                operations: Vec::new(),
            },
        );
    }

    fn next_id(&self) -> i64 {
        self.next_op_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(id).map(|s| s.document.clone()))
    }

    async fn run_edit_transaction(
        &self,
        document_id: &DocumentId,
        base_version: u64,
        user_id: UserId,
        transform: TransformFn,
    ) -> Result<CommitResult, StoreError> {
        let lock = self.locks.get_or_create(document_id);
        let _guard = lock.lock().await;

        let mut docs = self.docs.lock().await;
        let state = docs
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;

        let missed: Vec<Operation> = state
            .operations
            .iter()
            .filter(|op| op.applied_version > base_version)
            .cloned()
            .collect();

        let transformed = transform(&state.document, &missed);

        if !transformed.insert_text.is_empty() || transformed.delete_len > 0 {
            apply_operation(
                &mut state.document.content,
                transformed.position,
                transformed.delete_len,
                &transformed.insert_text,
            );
        }
        state.document.version += 1;
        let new_version = state.document.version;

        let operation = Operation {
            id: self.next_id(),
            document_id: document_id.clone(),
            user_id,
            base_version,
            position: transformed.position,
            insert_text: transformed.insert_text,
            delete_len: transformed.delete_len,
            applied_version: new_version,
            created_at: Utc::now(),
        };
        state.operations.push(operation.clone());

        Ok(CommitResult {
            operation,
            updated_version: new_version,
        })
    }
}

/// A SQLite-backed store. Schema:
///
/// ```sql
/// CREATE TABLE documents(
///   id TEXT PRIMARY KEY, title TEXT NOT NULL, content TEXT NOT NULL,
///   version INTEGER NOT NULL, owner_id TEXT NOT NULL,
///   created_at TEXT NOT NULL, updated_at TEXT NOT NULL
/// );
/// CREATE TABLE operations(
///   id INTEGER PRIMARY KEY AUTOINCREMENT, document_id TEXT NOT NULL,
///   user_id TEXT NOT NULL, base_version INTEGER NOT NULL,
///   position INTEGER NOT NULL, insert_text TEXT NOT NULL,
///   delete_len INTEGER NOT NULL, applied_version INTEGER NOT NULL,
///   created_at TEXT NOT NULL
/// );
/// CREATE INDEX operations_document_id ON operations(document_id);
/// CREATE INDEX operations_document_applied ON operations(document_id, applied_version);
/// ```
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    locks: DocumentLocks,
}

impl SqliteStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents(
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    owner_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS operations(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    document_id TEXT NOT NULL REFERENCES documents(id),
                    user_id TEXT NOT NULL,
                    base_version INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    insert_text TEXT NOT NULL,
                    delete_len INTEGER NOT NULL,
                    applied_version INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS operations_document_id ON operations(document_id);
                CREATE INDEX IF NOT EXISTS operations_document_applied
                    ON operations(document_id, applied_version);",
            )?;
        }
        Ok(Self {
            pool,
            locks: DocumentLocks::default(),
        })
    }

    /// Seed a document row. See [`InMemoryStore::insert_document`]: out of
    /// scope for the core proper, needed here to make the adapter usable
    /// without the external document-creation endpoint.
    pub async fn insert_document(&self, document: Document) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO documents(id, title, content, version, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    document.id.0,
                    document.title,
                    document.content.to_string(),
                    document.version as i64,
                    document.owner_id.0,
                    now,
                ],
            )?;
            Ok::<_, anyhow::Error>(())
        })
        .await?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let pool = self.pool.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(anyhow::Error::from)?;
            let doc = conn
                .query_row(
                    "SELECT id, title, content, version, owner_id FROM documents WHERE id = ?1",
                    params![id.0],
                    |row| {
                        Ok(Document {
                            id: DocumentId(row.get(0)?),
                            title: row.get(1)?,
                            content: Rope::from_str(&row.get::<_, String>(2)?),
                            version: row.get::<_, i64>(3)? as u64,
                            owner_id: UserId(row.get(4)?),
                        })
                    },
                )
                .optional()
                .map_err(anyhow::Error::from)?;
            Ok::<_, anyhow::Error>(doc)
        })
        .await
        .map_err(|e| StoreError::StorageFailure(e.into()))?
        .map_err(StoreError::StorageFailure)
    }

    async fn run_edit_transaction(
        &self,
        document_id: &DocumentId,
        base_version: u64,
        user_id: UserId,
        transform: TransformFn,
    ) -> Result<CommitResult, StoreError> {
        let lock = self.locks.get_or_create(document_id);
        let _guard = lock.lock().await;

        let pool = self.pool.clone();
        let document_id = document_id.clone();

        tokio::task::spawn_blocking(move || -> Result<CommitResult, StoreError> {
            let mut conn = pool.get().map_err(|e| StoreError::StorageFailure(e.into()))?;
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| StoreError::StorageFailure(e.into()))?;

            let document = tx
                .query_row(
                    "SELECT id, title, content, version, owner_id FROM documents WHERE id = ?1",
                    params![document_id.0],
                    |row| {
                        Ok(Document {
                            id: DocumentId(row.get(0)?),
                            title: row.get(1)?,
                            content: Rope::from_str(&row.get::<_, String>(2)?),
                            version: row.get::<_, i64>(3)? as u64,
                            owner_id: UserId(row.get(4)?),
                        })
                    },
                )
                .optional()
                .map_err(|e| StoreError::StorageFailure(e.into()))?
                .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;

            let mut stmt = tx
                .prepare(
                    "SELECT id, document_id, user_id, base_version, position, insert_text,
                            delete_len, applied_version, created_at
                     FROM operations
                     WHERE document_id = ?1 AND applied_version > ?2
                     ORDER BY applied_version ASC",
                )
                .map_err(|e| StoreError::StorageFailure(e.into()))?;
            let missed: Vec<Operation> = stmt
                .query_map(params![document_id.0, base_version as i64], |row| {
                    Ok(Operation {
                        id: row.get(0)?,
                        document_id: DocumentId(row.get(1)?),
                        user_id: UserId(row.get(2)?),
                        base_version: row.get::<_, i64>(3)? as u64,
                        position: row.get::<_, i64>(4)? as usize,
                        insert_text: row.get(5)?,
                        delete_len: row.get::<_, i64>(6)? as usize,
                        applied_version: row.get::<_, i64>(7)? as u64,
                        created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(8)?)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                })
                .map_err(|e| StoreError::StorageFailure(e.into()))?
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::StorageFailure(e.into()))?;
            drop(stmt);

            let transformed = transform(&document, &missed);

            let mut new_content = document.content.clone();
            if !transformed.insert_text.is_empty() || transformed.delete_len > 0 {
                apply_operation(&mut new_content, transformed.position, transformed.delete_len, &transformed.insert_text);
            }
            let new_version = document.version + 1;
            let now = Utc::now();

            tx.execute(
                "UPDATE documents SET content = ?1, version = ?2, updated_at = ?3 WHERE id = ?4",
                params![new_content.to_string(), new_version as i64, now.to_rfc3339(), document_id.0],
            )
            .map_err(|e| StoreError::StorageFailure(e.into()))?;

            tx.execute(
                "INSERT INTO operations(document_id, user_id, base_version, position, insert_text,
                                        delete_len, applied_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    document_id.0,
                    user_id.0,
                    base_version as i64,
                    transformed.position as i64,
                    transformed.insert_text,
                    transformed.delete_len as i64,
                    new_version as i64,
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::StorageFailure(e.into()))?;
            let op_id = tx.last_insert_rowid();

            tx.commit().map_err(|e| StoreError::StorageFailure(e.into()))?;

            Ok(CommitResult {
                operation: Operation {
                    id: op_id,
                    document_id,
                    user_id,
                    base_version,
                    position: transformed.position,
                    insert_text: transformed.insert_text,
                    delete_len: transformed.delete_len,
                    applied_version: new_version,
                    created_at: now,
                },
                updated_version: new_version,
            })
        })
        .await
        .map_err(|e| StoreError::StorageFailure(e.into()))?
    }
}

// Document store seam - every read/write of users, articles and comments goes through here
pub mod sqlite;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::db::models::Entity;

pub use sqlite::SqliteDocumentStore;

/// Most point reads a single listing keeps in flight at once.
pub const READ_FAN_OUT: usize = 4;

/// A schema-flexible document body.
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Transaction aborted: {0}")]
    Aborted(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Address of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn of<T: Entity>(id: impl Into<String>) -> Self {
        Self::new(T::COLLECTION, id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    /// Field is an array holding the value.
    ArrayContains,
    Gte,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn array_contains(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::ArrayContains, value)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Documents read at the start of a transaction attempt.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    docs: Vec<(DocRef, Option<Document>)>,
}

impl Snapshot {
    pub fn new(docs: Vec<(DocRef, Option<Document>)>) -> Self {
        Self { docs }
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<&Document> {
        self.docs
            .iter()
            .find(|(r, _)| r.collection == collection && r.id == id)
            .and_then(|(_, doc)| doc.as_ref())
    }

    pub fn entity<T: Entity>(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.get(T::COLLECTION, id)
            .cloned()
            .map(|doc| T::from_document(id, doc))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or replace the whole document.
    Set(DocRef, Document),
    /// Replace the given top-level fields of an existing document.
    Update(DocRef, Document),
}

/// Writes produced by one transaction attempt; applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, target: DocRef, doc: Document) -> &mut Self {
        self.writes.push(Write::Set(target, doc));
        self
    }

    pub fn update(&mut self, target: DocRef, fields: Document) -> &mut Self {
        self.writes.push(Write::Update(target, fields));
        self
    }

    pub fn set_entity<T: Entity>(&mut self, entity: &T) -> Result<&mut Self, StoreError> {
        let doc = entity.to_document()?;
        Ok(self.set(DocRef::of::<T>(entity.id()), doc))
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Write function of a transaction. May run more than once when the
/// store retries after a write conflict, so it must be free of side effects.
pub type TransactionFn = Box<dyn FnMut(&Snapshot) -> Result<WriteBatch, StoreError> + Send>;

/// Point in time after which a transaction must not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    limit: Duration,
    at: Instant,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            limit,
            at: Instant::now() + limit,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn sooner(self, other: Deadline) -> Deadline {
        if other.at < self.at {
            other
        } else {
            self
        }
    }

    /// The error reported once the deadline has passed.
    pub fn expired(&self) -> StoreError {
        StoreError::Timeout(self.limit)
    }
}

/// Repository trait - the remote document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read by key.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Filtered, ordered range query. Returns `(id, body)` pairs.
    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError>;

    /// Create or replace a document.
    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Replace top-level fields of an existing document. Nested objects are
    /// replaced whole and a `null` value is stored as `null`.
    async fn update(&self, collection: &str, id: &str, fields: Document)
        -> Result<(), StoreError>;

    /// Atomic read-modify-write over `read_set`.
    async fn run_transaction(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
    ) -> Result<(), StoreError>;

    /// Like `run_transaction`, but nothing may commit after `deadline`.
    ///
    /// An `Err` then always means no write landed. The default only stops
    /// waiting; stores that can abandon work in flight override it.
    async fn run_transaction_within(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        tokio::time::timeout(deadline.remaining(), self.run_transaction(read_set, apply))
            .await
            .map_err(|_| deadline.expired())?
    }
}

/// Type alias for Arc-wrapped store (for AppState)
pub type DynDocumentStore = Arc<dyn DocumentStore>;

/// Runs a transaction whose write function also yields a value for the caller.
pub async fn transact<T, F>(
    store: &dyn DocumentStore,
    read_set: Vec<DocRef>,
    mut apply: F,
) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnMut(&Snapshot) -> Result<(WriteBatch, T), StoreError> + Send + 'static,
{
    let output = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&output);

    store
        .run_transaction(
            read_set,
            Box::new(move |snapshot| {
                let (batch, value) = apply(snapshot)?;
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(value);
                }
                Ok(batch)
            }),
        )
        .await?;

    let value = output
        .lock()
        .map_err(|_| StoreError::Task("transaction output poisoned".into()))?
        .take();
    value.ok_or_else(|| StoreError::Task("transaction produced no output".into()))
}

pub async fn fetch<T: Entity>(store: &dyn DocumentStore, id: &str) -> Result<Option<T>, StoreError> {
    store
        .get(T::COLLECTION, id)
        .await?
        .map(|doc| T::from_document(id, doc))
        .transpose()
}

pub async fn put<T: Entity>(store: &dyn DocumentStore, entity: &T) -> Result<(), StoreError> {
    store
        .set(T::COLLECTION, entity.id(), entity.to_document()?)
        .await
}

/// Typed query. Documents that no longer match the entity shape are skipped
/// with a warning rather than failing the whole listing.
pub async fn query_all<T: Entity>(
    store: &dyn DocumentStore,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    let rows = store.query(T::COLLECTION, query).await?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, doc)| match T::from_document(&id, doc) {
            Ok(entity) => Some(entity),
            Err(e) => {
                tracing::warn!("Skipping malformed {} document {}: {}", T::COLLECTION, id, e);
                None
            }
        })
        .collect())
}

/// Decorator bounding every store call by a fixed deadline.
pub struct TimeoutStore<S> {
    inner: S,
    limit: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

impl<S: DocumentStore> TimeoutStore<S> {
    /// Runs one write as a transaction under this store's deadline.
    async fn write_within(&self, write: Write) -> Result<(), StoreError> {
        self.inner
            .run_transaction_within(
                Vec::new(),
                Box::new(move |_| {
                    let mut batch = WriteBatch::new();
                    batch.writes.push(write.clone());
                    Ok(batch)
                }),
                Deadline::after(self.limit),
            )
            .await
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for TimeoutStore<S> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        with_timeout(self.limit, self.inner.get(collection, id)).await
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        with_timeout(self.limit, self.inner.query(collection, query)).await
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        self.write_within(Write::Set(DocRef::new(collection, id), doc))
            .await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        self.write_within(Write::Update(DocRef::new(collection, id), fields))
            .await
    }

    async fn run_transaction(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
    ) -> Result<(), StoreError> {
        self.inner
            .run_transaction_within(read_set, apply, Deadline::after(self.limit))
            .await
    }

    async fn run_transaction_within(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        let deadline = deadline.sooner(Deadline::after(self.limit));
        self.inner
            .run_transaction_within(read_set, apply, deadline)
            .await
    }
}

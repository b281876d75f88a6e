// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dreamscape::config::Config;
use dreamscape::db;
use dreamscape::db::models::{Article, Comment, User};
use dreamscape::state::AppState;
use dreamscape::store::{
    self, Deadline, DocRef, Document, DocumentStore, DynDocumentStore, Query,
    SqliteDocumentStore, StoreError, TransactionFn,
};
use tempfile::TempDir;

pub fn sqlite_store() -> (SqliteDocumentStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
    db::run_migrations(&pool).unwrap();
    (SqliteDocumentStore::new(pool), temp_dir)
}

pub fn shared_store() -> (DynDocumentStore, TempDir) {
    let (store, tmp) = sqlite_store();
    (Arc::new(store), tmp)
}

/// App state over a fresh database with a cheap bcrypt cost.
pub fn test_state() -> (AppState, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
    db::run_migrations(&pool).unwrap();

    let mut config = Config::default();
    config.database.path = Some(temp_dir.path().join("test.db"));

    let mut state = AppState::new(pool, config).unwrap();
    state.accounts = state.accounts.clone().with_hash_cost(4);
    (state, temp_dir)
}

pub fn article(id: &str, author_id: &str, like_count: u64) -> Article {
    Article {
        id: id.to_string(),
        author_id: author_id.to_string(),
        title: format!("Dream {}", id),
        text: "I was flying over a silver lake".to_string(),
        image: String::new(),
        emotions: vec!["awe".to_string()],
        topics: vec!["flight".to_string()],
        like_count,
        saved_count: 0,
        created_at: Utc::now(),
        visible: true,
    }
}

pub fn comment(id: &str, article_id: &str, author_id: &str, age_secs: i64) -> Comment {
    Comment {
        id: id.to_string(),
        article_id: article_id.to_string(),
        author_id: author_id.to_string(),
        text: format!("comment {}", id),
        created_at: Utc::now() - chrono::Duration::seconds(age_secs),
    }
}

pub async fn seed_user(store: &dyn DocumentStore, id: &str, name: &str) -> User {
    let user = User::new(id, name);
    store::put(store, &user).await.unwrap();
    user
}

/// Delays user reads per id and records the order in which they finished.
pub struct DelayingStore<S> {
    inner: S,
    user_delays: HashMap<String, Duration>,
    completed: Mutex<Vec<String>>,
}

impl<S> DelayingStore<S> {
    pub fn new(inner: S, user_delays: &[(&str, u64)]) -> Self {
        Self {
            inner,
            user_delays: user_delays
                .iter()
                .map(|(id, ms)| (id.to_string(), Duration::from_millis(*ms)))
                .collect(),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for DelayingStore<S> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        if collection == "users" {
            if let Some(delay) = self.user_delays.get(id) {
                tokio::time::sleep(*delay).await;
            }
        }
        let result = self.inner.get(collection, id).await;
        if collection == "users" {
            self.completed.lock().unwrap().push(id.to_string());
        }
        result
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.inner.query(collection, query).await
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        self.inner.set(collection, id, doc).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.inner.update(collection, id, fields).await
    }

    async fn run_transaction(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
    ) -> Result<(), StoreError> {
        self.inner.run_transaction(read_set, apply).await
    }

    async fn run_transaction_within(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        self.inner
            .run_transaction_within(read_set, apply, deadline)
            .await
    }
}

/// Reads pass through; every transaction fails as if the network dropped.
pub struct FailingStore<S> {
    inner: S,
}

impl<S> FailingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for FailingStore<S> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.inner.query(collection, query).await
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        self.inner.set(collection, id, doc).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.inner.update(collection, id, fields).await
    }

    async fn run_transaction(
        &self,
        _read_set: Vec<DocRef>,
        _apply: TransactionFn,
    ) -> Result<(), StoreError> {
        Err(StoreError::Timeout(Duration::from_secs(60)))
    }
}

/// Article reads fail outright; everything else passes through.
pub struct BrokenArticleReads<S> {
    inner: S,
}

impl<S> BrokenArticleReads<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for BrokenArticleReads<S> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        if collection == "articles" {
            return Err(StoreError::Task("connection reset".into()));
        }
        self.inner.get(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.inner.query(collection, query).await
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        self.inner.set(collection, id, doc).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.inner.update(collection, id, fields).await
    }

    async fn run_transaction(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
    ) -> Result<(), StoreError> {
        self.inner.run_transaction(read_set, apply).await
    }
}

/// Tracks the largest number of point reads in flight at once.
pub struct CountingStore<S> {
    inner: S,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for CountingStore<S> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = self.inner.get(collection, id).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.inner.query(collection, query).await
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        self.inner.set(collection, id, doc).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.inner.update(collection, id, fields).await
    }

    async fn run_transaction(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
    ) -> Result<(), StoreError> {
        self.inner.run_transaction(read_set, apply).await
    }
}

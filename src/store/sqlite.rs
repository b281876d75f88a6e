// SQLite implementation of the document store
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;

use super::{
    Deadline, DocRef, Direction, Document, DocumentStore, FilterOp, Query, Snapshot,
    StoreError, TransactionFn, Write,
};
use crate::db::BUSY_TIMEOUT;
use crate::state::DbPool;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const RETRY_PAUSE: Duration = Duration::from_millis(10);

pub struct SqliteDocumentStore {
    pool: DbPool,
    max_attempts: u32,
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Run blocking rusqlite work off the async executor.
    async fn blocking<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            work(&*conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| read_document(conn, &collection, &id))
            .await
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let (sql, bindings) = compile_query(collection, query)?;

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(bindings.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, body)| Ok((id, parse_body(&body)?)))
                .collect()
        })
        .await
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        let target = DocRef::new(collection, id);
        self.blocking(move |conn| apply_write(conn, Write::Set(target, doc)))
            .await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        let target = DocRef::new(collection, id);
        self.blocking(move |conn| apply_write(conn, Write::Update(target, fields)))
            .await
    }

    async fn run_transaction(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
    ) -> Result<(), StoreError> {
        self.transaction(read_set, apply, None).await
    }

    async fn run_transaction_within(
        &self,
        read_set: Vec<DocRef>,
        apply: TransactionFn,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        self.transaction(read_set, apply, Some(deadline)).await
    }
}

impl SqliteDocumentStore {
    async fn transaction(
        &self,
        read_set: Vec<DocRef>,
        mut apply: TransactionFn,
        deadline: Option<Deadline>,
    ) -> Result<(), StoreError> {
        let max_attempts = self.max_attempts;
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let conn = match deadline {
                Some(deadline) => pool
                    .get_timeout(deadline.remaining())
                    .map_err(|_| deadline.expired())?,
                None => pool.get()?,
            };

            let result = retry_attempts(&conn, &read_set, &mut apply, max_attempts, deadline);

            if deadline.is_some() {
                if let Err(e) = conn.busy_timeout(BUSY_TIMEOUT) {
                    tracing::warn!("Failed to restore busy timeout: {}", e);
                }
            }
            result
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Retries on lock contention. Under a deadline each attempt may wait on
/// the lock for an even share of the time left.
fn retry_attempts(
    conn: &Connection,
    read_set: &[DocRef],
    apply: &mut TransactionFn,
    max_attempts: u32,
    deadline: Option<Deadline>,
) -> Result<(), StoreError> {
    for attempt in 1..=max_attempts {
        if let Some(deadline) = deadline {
            if deadline.has_passed() {
                return Err(deadline.expired());
            }
            let attempts_left = max_attempts - attempt + 1;
            conn.busy_timeout(deadline.remaining() / attempts_left)?;
        }

        match run_attempt(conn, read_set, apply, deadline) {
            Ok(()) => return Ok(()),
            Err(e) if is_contention(&e) => {
                tracing::debug!("Transaction attempt {} hit contention: {}", attempt, e);
                std::thread::sleep(RETRY_PAUSE);
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(deadline) = deadline.filter(Deadline::has_passed) {
        return Err(deadline.expired());
    }
    Err(StoreError::Conflict(format!(
        "transaction gave up after {} attempts",
        max_attempts
    )))
}

/// One all-or-nothing attempt: read the snapshot, compute writes, commit.
fn run_attempt(
    conn: &Connection,
    read_set: &[DocRef],
    apply: &mut TransactionFn,
    deadline: Option<Deadline>,
) -> Result<(), StoreError> {
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = read_modify_write(conn, read_set, apply)
        .and_then(|()| match deadline {
            Some(deadline) if deadline.has_passed() => Err(deadline.expired()),
            _ => Ok(()),
        })
        .and_then(|()| conn.execute_batch("COMMIT").map_err(StoreError::from));

    if result.is_err() && !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            tracing::warn!("Rollback failed: {}", e);
        }
    }

    result
}

fn read_modify_write(
    conn: &Connection,
    read_set: &[DocRef],
    apply: &mut TransactionFn,
) -> Result<(), StoreError> {
    let mut docs = Vec::with_capacity(read_set.len());
    for target in read_set {
        let doc = read_document(conn, &target.collection, &target.id)?;
        docs.push((target.clone(), doc));
    }

    let batch = apply(&Snapshot::new(docs))?;
    for write in batch.into_writes() {
        apply_write(conn, write)?;
    }

    Ok(())
}

fn is_contention(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Sql(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

fn read_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| parse_body(&b)).transpose()
}

fn apply_write(conn: &Connection, write: Write) -> Result<(), StoreError> {
    match write {
        Write::Set(target, doc) => {
            conn.execute(
                "INSERT INTO documents (collection, id, body)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, id) DO UPDATE SET
                   body = excluded.body,
                   updated_at = datetime('now')",
                params![target.collection, target.id, serde_json::to_string(&doc)?],
            )?;
        }
        Write::Update(target, fields) => {
            let (sql, bindings) = compile_update(&target, &fields)?;
            let rows = conn.execute(&sql, params_from_iter(bindings.iter()))?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!(
                    "{}/{}",
                    target.collection, target.id
                )));
            }
        }
    }
    Ok(())
}

/// One `json_set` pair per top-level field; each value replaces the old one whole.
fn compile_update(target: &DocRef, fields: &Document) -> Result<(String, Vec<SqlValue>), StoreError> {
    let mut bindings = vec![
        SqlValue::Text(target.collection.clone()),
        SqlValue::Text(target.id.clone()),
    ];

    let mut body = String::from("body");
    if !fields.is_empty() {
        body = String::from("json_set(body");
        for (field, value) in fields {
            bindings.push(SqlValue::Text(json_path(field)?));
            let path_idx = bindings.len();
            bindings.push(SqlValue::Text(serde_json::to_string(value)?));
            body.push_str(&format!(", ?{}, json(?{})", path_idx, bindings.len()));
        }
        body.push(')');
    }

    let sql = format!(
        "UPDATE documents SET body = {}, updated_at = datetime('now')
         WHERE collection = ?1 AND id = ?2",
        body
    );
    Ok((sql, bindings))
}

fn parse_body(body: &str) -> Result<Document, StoreError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Malformed(format!(
            "document body is not an object: {}",
            other
        ))),
    }
}

fn is_valid_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_path(field: &str) -> Result<String, StoreError> {
    if is_valid_field(field) {
        Ok(format!("$.{}", field))
    } else {
        Err(StoreError::InvalidQuery(format!("invalid field name: {:?}", field)))
    }
}

fn to_sql_value(value: &Value) -> Result<SqlValue, StoreError> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        // json_extract reports JSON booleans as 0/1
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => Ok(SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(StoreError::InvalidQuery(
            "filter values must be scalars".to_string(),
        )),
    }
}

/// Compile a query into SQL plus positional bindings.
fn compile_query(collection: &str, query: &Query) -> Result<(String, Vec<SqlValue>), StoreError> {
    let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?1");
    let mut bindings = vec![SqlValue::Text(collection.to_string())];

    for filter in &query.filters {
        bindings.push(SqlValue::Text(json_path(&filter.field)?));
        let path_idx = bindings.len();
        bindings.push(to_sql_value(&filter.value)?);
        let value_idx = bindings.len();

        let clause = match filter.op {
            FilterOp::Eq => format!(" AND json_extract(body, ?{}) = ?{}", path_idx, value_idx),
            FilterOp::Gte => format!(" AND json_extract(body, ?{}) >= ?{}", path_idx, value_idx),
            FilterOp::Lte => format!(" AND json_extract(body, ?{}) <= ?{}", path_idx, value_idx),
            FilterOp::ArrayContains => format!(
                " AND EXISTS (SELECT 1 FROM json_each(body, ?{}) AS elem WHERE elem.value = ?{})",
                path_idx, value_idx
            ),
        };
        sql.push_str(&clause);
    }

    match &query.order_by {
        Some((field, direction)) => {
            bindings.push(SqlValue::Text(json_path(field)?));
            let dir = match direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY json_extract(body, ?{}) {}, id ASC",
                bindings.len(),
                dir
            ));
        }
        None => sql.push_str(" ORDER BY id ASC"),
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok((sql, bindings))
}

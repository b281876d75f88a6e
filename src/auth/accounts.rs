use rusqlite::{params, ErrorCode, OptionalExtension};

use crate::auth::{session, AuthError};
use crate::config::AuthConfig;
use crate::db::models::User;
use crate::state::DbPool;
use crate::store::{self, DocumentStore};

/// Outcome of a successful registration or sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub user_id: String,
    pub token: String,
}

/// Email/password accounts backed by the `accounts` and `sessions` tables.
#[derive(Clone)]
pub struct Accounts {
    pool: DbPool,
    session_hours: u64,
    min_password_len: usize,
    hash_cost: u32,
}

impl Accounts {
    pub fn new(pool: DbPool, config: &AuthConfig) -> Self {
        Self {
            pool,
            session_hours: config.session_hours,
            min_password_len: config.min_password_len,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Lower the bcrypt cost (tests only need the shape, not the strength).
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Create an account, its `users/{id}` profile document and a first session.
    pub async fn register(
        &self,
        store: &dyn DocumentStore,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, AuthError> {
        let email = normalize_email(email)?;
        self.check_password(password)?;

        let user_id = uuid::Uuid::now_v7().to_string();
        let hash = bcrypt::hash(password, self.hash_cost)?;

        {
            let conn = self.pool.get()?;
            conn.execute(
                "INSERT INTO accounts (id, email, password_hash) VALUES (?1, ?2, ?3)",
                params![user_id, email, hash],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref f, _)
                    if f.code == ErrorCode::ConstraintViolation =>
                {
                    AuthError::EmailTaken
                }
                other => AuthError::Database(other),
            })?;
        }

        let profile = User::new(user_id.clone(), display_name_for(&email));
        if let Err(e) = store::put(store, &profile).await {
            tracing::error!("Failed to create profile for {}: {}", user_id, e);
            let conn = self.pool.get()?;
            conn.execute("DELETE FROM accounts WHERE id = ?1", params![user_id])?;
            return Err(e.into());
        }

        tracing::info!("Registered account {}", user_id);
        let token = session::create_session(&self.pool, &user_id, self.session_hours)?;
        Ok(SignedIn { user_id, token })
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let email = email.trim().to_lowercase();
        let conn = self.pool.get()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, password_hash FROM accounts WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        drop(conn);

        let (user_id, hash) = row.ok_or(AuthError::InvalidCredentials)?;
        if !bcrypt::verify(password, &hash).unwrap_or(false) {
            return Err(AuthError::InvalidCredentials);
        }

        let token = session::create_session(&self.pool, &user_id, self.session_hours)?;
        Ok(SignedIn { user_id, token })
    }

    pub fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        session::delete_session(&self.pool, token)
    }

    /// The single source of truth for "is someone signed in".
    pub fn current_session_user_id(&self, token: &str) -> Result<Option<String>, AuthError> {
        session::lookup_session(&self.pool, token)
    }

    /// Replace the password after re-checking the old one. Other sessions are revoked.
    pub fn change_password(
        &self,
        user_id: &str,
        old_password: &str,
        new_password: &str,
        keep_token: &str,
    ) -> Result<(), AuthError> {
        self.check_password(new_password)?;

        let conn = self.pool.get()?;
        let hash: String = conn
            .query_row(
                "SELECT password_hash FROM accounts WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(AuthError::NoSession)?;

        if !bcrypt::verify(old_password, &hash).unwrap_or(false) {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = bcrypt::hash(new_password, self.hash_cost)?;
        conn.execute(
            "UPDATE accounts SET password_hash = ?1 WHERE id = ?2",
            params![new_hash, user_id],
        )?;
        drop(conn);
        session::delete_other_sessions(&self.pool, user_id, keep_token)?;

        tracing::info!("Password changed for {}", user_id);
        Ok(())
    }

    fn check_password(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.min_password_len {
            return Err(AuthError::WeakPassword(self.min_password_len));
        }
        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.split_once('@').ok_or(AuthError::InvalidEmail)?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.contains('@') {
        return Err(AuthError::InvalidEmail);
    }
    Ok(email)
}

fn display_name_for(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

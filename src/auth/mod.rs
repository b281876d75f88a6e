pub mod accounts;
pub mod session;

use thiserror::Error;

use crate::store::StoreError;

pub use accounts::{Accounts, SignedIn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Not signed in")]
    NoSession,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Profile error: {0}")]
    Store(#[from] StoreError),
}

//! Storage backends
//!
//! - Postgres: durable users and application tokens
//! - Memory: process-local store for tests and local runs
//!
//! The credential resolver only needs [`CredentialStore`]. Account CRUD goes
//! through [`AccountStore`].

mod memory;
mod postgres;
mod records;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};
pub use records::{ApplicationRecord, UserRecord};

pub use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

/// Service epoch in Unix milliseconds (2023-06-13T09:52:54.737Z)
pub const EPOCH_MILLIS: i64 = 1_686_613_974_737;

/// Allocate a user id: milliseconds elapsed since [`EPOCH_MILLIS`]
pub fn next_user_id() -> i64 {
    Utc::now().timestamp_millis() - EPOCH_MILLIS
}

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Lookups the credential resolver depends on
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the user owning a bearer token
    async fn fetch_user(&self, bearer: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Find an application token, joined with its owning user
    async fn fetch_application(&self, token: &str)
        -> Result<Option<ApplicationRecord>, StorageError>;
}

/// Account and application token management
#[async_trait]
pub trait AccountStore: CredentialStore {
    /// Create a user and issue its bearer token
    async fn create_user(
        &self,
        github_id: i64,
        username: &str,
        admin: bool,
    ) -> Result<UserRecord, StorageError>;

    /// All applications owned by a user, including invalidated ones
    async fn fetch_applications(&self, user_id: i64)
        -> Result<Vec<ApplicationRecord>, StorageError>;

    /// Create an application token. Names are unique per user.
    async fn create_application(
        &self,
        user_id: i64,
        name: &str,
        description: &str,
    ) -> Result<ApplicationRecord, StorageError>;

    /// Replace an application's token with a freshly issued one
    async fn regenerate_application_token(
        &self,
        user_id: i64,
        old_token: &str,
    ) -> Result<ApplicationRecord, StorageError>;

    /// Mark an application token invalid. Idempotent.
    async fn invalidate_application(&self, token: &str) -> Result<(), StorageError>;

    /// Set or clear the verified flag on an application
    async fn set_application_verified(
        &self,
        tid: i64,
        verified: bool,
    ) -> Result<ApplicationRecord, StorageError>;
}

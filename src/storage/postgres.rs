//! PostgreSQL storage backend

use crate::auth::generate_token;
use crate::storage::{
    next_user_id, AccountStore, ApplicationRecord, CredentialStore, StorageError, UserRecord,
};
use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

const APPLICATION_COLUMNS: &str = "t.tid, t.token_name, t.token_description, t.token, \
     t.verified, t.invalid, u.uid, u.github_id, u.username, u.admin, u.bearer, u.created";

/// Postgres configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: usize,
}

impl PostgresConfig {
    pub fn from_url(url: &str) -> Option<Self> {
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return None;
        }

        Some(Self {
            url: url.to_string(),
            max_connections: 16,
        })
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("DATABASE_URL")
            .ok()
            .and_then(|url| Self::from_url(&url))
    }
}

/// Inserts retried when the clock-derived user id is already taken
const USER_ID_ATTEMPTS: usize = 5;

/// Which `users` uniqueness constraint an insert tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserConflict {
    GithubId,
    UserId,
    Other,
}

impl UserConflict {
    fn from_constraint(constraint: Option<&str>) -> Self {
        match constraint {
            Some("users_github_id_key") => Self::GithubId,
            // bearer tokens embed the uid, so they collide along with it
            Some("users_pkey") | Some("users_bearer_key") => Self::UserId,
            _ => Self::Other,
        }
    }
}

fn db_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Database(e.to_string())
}

fn user_from_row(row: &Row) -> UserRecord {
    UserRecord {
        uid: row.get("uid"),
        github_id: row.get("github_id"),
        username: row.get("username"),
        admin: row.get("admin"),
        bearer: row.get("bearer"),
        created: row.get("created"),
    }
}

fn application_from_row(row: &Row) -> ApplicationRecord {
    ApplicationRecord {
        owner: user_from_row(row),
        tid: row.get("tid"),
        name: row.get("token_name"),
        description: row.get("token_description"),
        token: row.get("token"),
        verified: row.get("verified"),
        invalid: row.get("invalid"),
    }
}

/// PostgreSQL storage for users and application tokens
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connect and make sure the schema exists
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_connections));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(db_error)?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StorageError> {
        self.pool.get().await.map_err(db_error)
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        let client = self.client().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    uid BIGINT PRIMARY KEY,
                    github_id BIGINT UNIQUE NOT NULL,
                    username TEXT NOT NULL,
                    admin BOOLEAN NOT NULL DEFAULT FALSE,
                    bearer TEXT UNIQUE NOT NULL,
                    created TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE TABLE IF NOT EXISTS tokens (
                    tid BIGSERIAL PRIMARY KEY,
                    user_id BIGINT NOT NULL REFERENCES users(uid) ON DELETE CASCADE,
                    token_name TEXT NOT NULL,
                    token_description TEXT NOT NULL DEFAULT '',
                    token TEXT UNIQUE NOT NULL,
                    verified BOOLEAN NOT NULL DEFAULT FALSE,
                    invalid BOOLEAN NOT NULL DEFAULT FALSE,
                    UNIQUE (user_id, token_name)
                );

                CREATE INDEX IF NOT EXISTS tokens_user_id_idx ON tokens(user_id);
                "#,
            )
            .await
            .map_err(db_error)?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn fetch_user(&self, bearer: &str) -> Result<Option<UserRecord>, StorageError> {
        let client = self.client().await?;

        let row = client
            .query_opt("SELECT * FROM users WHERE bearer = $1", &[&bearer])
            .await
            .map_err(db_error)?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn fetch_application(
        &self,
        token: &str,
    ) -> Result<Option<ApplicationRecord>, StorageError> {
        let client = self.client().await?;

        let query = format!(
            "SELECT {} FROM tokens t JOIN users u ON u.uid = t.user_id WHERE t.token = $1",
            APPLICATION_COLUMNS
        );
        let row = client
            .query_opt(query.as_str(), &[&token])
            .await
            .map_err(db_error)?;

        Ok(row.as_ref().map(application_from_row))
    }
}

#[async_trait]
impl AccountStore for PostgresStore {
    async fn create_user(
        &self,
        github_id: i64,
        username: &str,
        admin: bool,
    ) -> Result<UserRecord, StorageError> {
        let client = self.client().await?;

        let mut uid = next_user_id();
        for attempt in 1..=USER_ID_ATTEMPTS {
            let bearer = generate_token(uid);

            let err = match client
                .query_one(
                    "INSERT INTO users (uid, github_id, username, admin, bearer)
                     VALUES ($1, $2, $3, $4, $5) RETURNING *",
                    &[&uid, &github_id, &username, &admin, &bearer],
                )
                .await
            {
                Ok(row) => {
                    debug!(uid = uid, github_id = github_id, "Created user");
                    return Ok(user_from_row(&row));
                }
                Err(e) => e,
            };

            if err.code() != Some(&SqlState::UNIQUE_VIOLATION) {
                return Err(db_error(err));
            }

            let conflict =
                UserConflict::from_constraint(err.as_db_error().and_then(|db| db.constraint()));
            match conflict {
                UserConflict::GithubId => {
                    return Err(StorageError::Conflict(format!(
                        "user with github id {} exists",
                        github_id
                    )));
                }
                UserConflict::UserId => {
                    debug!(uid = uid, attempt = attempt, "User id taken, retrying");
                    uid = next_user_id().max(uid + 1);
                }
                UserConflict::Other => return Err(db_error(err)),
            }
        }

        Err(StorageError::Database(format!(
            "no free user id after {} attempts",
            USER_ID_ATTEMPTS
        )))
    }

    async fn fetch_applications(
        &self,
        user_id: i64,
    ) -> Result<Vec<ApplicationRecord>, StorageError> {
        let client = self.client().await?;

        let query = format!(
            "SELECT {} FROM tokens t JOIN users u ON u.uid = t.user_id WHERE t.user_id = $1",
            APPLICATION_COLUMNS
        );
        let rows = client
            .query(query.as_str(), &[&user_id])
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(application_from_row).collect())
    }

    async fn create_application(
        &self,
        user_id: i64,
        name: &str,
        description: &str,
    ) -> Result<ApplicationRecord, StorageError> {
        let client = self.client().await?;

        let token = generate_token(user_id);
        let query = format!(
            "WITH t AS (
                INSERT INTO tokens (user_id, token_name, token_description, token)
                VALUES ($1, $2, $3, $4) RETURNING *
             )
             SELECT {} FROM t JOIN users u ON u.uid = t.user_id",
            APPLICATION_COLUMNS
        );

        let row = client
            .query_one(query.as_str(), &[&user_id, &name, &description, &token])
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StorageError::Conflict(format!("application '{}' already exists", name))
                } else {
                    db_error(e)
                }
            })?;

        debug!(user_id = user_id, name = name, "Created application");
        Ok(application_from_row(&row))
    }

    async fn regenerate_application_token(
        &self,
        user_id: i64,
        old_token: &str,
    ) -> Result<ApplicationRecord, StorageError> {
        let client = self.client().await?;

        let token = generate_token(user_id);
        let query = format!(
            "WITH t AS (
                UPDATE tokens SET token = $1 WHERE token = $2 RETURNING *
             )
             SELECT {} FROM t JOIN users u ON u.uid = t.user_id",
            APPLICATION_COLUMNS
        );

        let row = client
            .query_opt(query.as_str(), &[&token, &old_token])
            .await
            .map_err(db_error)?
            .ok_or_else(|| StorageError::NotFound("application token".to_string()))?;

        Ok(application_from_row(&row))
    }

    async fn invalidate_application(&self, token: &str) -> Result<(), StorageError> {
        let client = self.client().await?;

        client
            .execute("UPDATE tokens SET invalid = TRUE WHERE token = $1", &[&token])
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn set_application_verified(
        &self,
        tid: i64,
        verified: bool,
    ) -> Result<ApplicationRecord, StorageError> {
        let client = self.client().await?;

        let query = format!(
            "WITH t AS (
                UPDATE tokens SET verified = $1 WHERE tid = $2 RETURNING *
             )
             SELECT {} FROM t JOIN users u ON u.uid = t.user_id",
            APPLICATION_COLUMNS
        );

        let row = client
            .query_opt(query.as_str(), &[&verified, &tid])
            .await
            .map_err(db_error)?
            .ok_or_else(|| StorageError::NotFound(format!("application {}", tid)))?;

        debug!(tid = tid, verified = verified, "Updated application verification");
        Ok(application_from_row(&row))
    }
}

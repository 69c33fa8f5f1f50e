//! In-memory store

use crate::auth::generate_token;
use crate::storage::{
    next_user_id, AccountStore, ApplicationRecord, CredentialStore, StorageError, UserRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An application row as stored, before joining the owner
#[derive(Debug, Clone)]
struct ApplicationRow {
    tid: i64,
    user_id: i64,
    name: String,
    description: String,
    token: String,
    verified: bool,
    invalid: bool,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<i64, UserRecord>,
    applications: Vec<ApplicationRow>,
    last_uid: i64,
    last_tid: i64,
}

impl Tables {
    fn join(&self, row: &ApplicationRow) -> Option<ApplicationRecord> {
        let owner = self.users.get(&row.user_id)?.clone();

        Some(ApplicationRecord {
            owner,
            tid: row.tid,
            name: row.name.clone(),
            description: row.description.clone(),
            token: row.token.clone(),
            verified: row.verified,
            invalid: row.invalid,
        })
    }

    fn joined(&self, row: &ApplicationRow) -> Result<ApplicationRecord, StorageError> {
        self.join(row)
            .ok_or_else(|| StorageError::NotFound(format!("owner of application {}", row.tid)))
    }
}

/// Process-local store behind a single lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    pub fn user_count(&self) -> usize {
        self.tables.read().users.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn fetch_user(&self, bearer: &str) -> Result<Option<UserRecord>, StorageError> {
        let tables = self.tables.read();
        Ok(tables.users.values().find(|u| u.bearer == bearer).cloned())
    }

    async fn fetch_application(
        &self,
        token: &str,
    ) -> Result<Option<ApplicationRecord>, StorageError> {
        let tables = self.tables.read();
        Ok(tables
            .applications
            .iter()
            .find(|a| a.token == token)
            .and_then(|row| tables.join(row)))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_user(
        &self,
        github_id: i64,
        username: &str,
        admin: bool,
    ) -> Result<UserRecord, StorageError> {
        let mut tables = self.tables.write();

        if tables.users.values().any(|u| u.github_id == github_id) {
            return Err(StorageError::Conflict(format!(
                "user with github id {} exists",
                github_id
            )));
        }

        // Ids come from the clock; keep them strictly increasing within a millisecond
        let uid = next_user_id().max(tables.last_uid + 1);
        tables.last_uid = uid;

        let user = UserRecord {
            uid,
            github_id,
            username: username.to_string(),
            admin,
            bearer: generate_token(uid),
            created: Utc::now(),
        };
        tables.users.insert(uid, user.clone());

        Ok(user)
    }

    async fn fetch_applications(
        &self,
        user_id: i64,
    ) -> Result<Vec<ApplicationRecord>, StorageError> {
        let tables = self.tables.read();
        Ok(tables
            .applications
            .iter()
            .filter(|a| a.user_id == user_id)
            .filter_map(|row| tables.join(row))
            .collect())
    }

    async fn create_application(
        &self,
        user_id: i64,
        name: &str,
        description: &str,
    ) -> Result<ApplicationRecord, StorageError> {
        let mut tables = self.tables.write();

        if !tables.users.contains_key(&user_id) {
            return Err(StorageError::NotFound(format!("user {}", user_id)));
        }

        if tables
            .applications
            .iter()
            .any(|a| a.user_id == user_id && a.name == name)
        {
            return Err(StorageError::Conflict(format!(
                "application '{}' already exists",
                name
            )));
        }

        tables.last_tid += 1;
        let row = ApplicationRow {
            tid: tables.last_tid,
            user_id,
            name: name.to_string(),
            description: description.to_string(),
            token: generate_token(user_id),
            verified: false,
            invalid: false,
        };
        let record = tables.joined(&row)?;
        tables.applications.push(row);

        Ok(record)
    }

    async fn regenerate_application_token(
        &self,
        user_id: i64,
        old_token: &str,
    ) -> Result<ApplicationRecord, StorageError> {
        let mut tables = self.tables.write();

        let row = tables
            .applications
            .iter_mut()
            .find(|a| a.token == old_token)
            .ok_or_else(|| StorageError::NotFound("application token".to_string()))?;
        row.token = generate_token(user_id);
        let row = row.clone();

        tables.joined(&row)
    }

    async fn invalidate_application(&self, token: &str) -> Result<(), StorageError> {
        let mut tables = self.tables.write();

        if let Some(row) = tables.applications.iter_mut().find(|a| a.token == token) {
            row.invalid = true;
        }

        Ok(())
    }

    async fn set_application_verified(
        &self,
        tid: i64,
        verified: bool,
    ) -> Result<ApplicationRecord, StorageError> {
        let mut tables = self.tables.write();

        let row = tables
            .applications
            .iter_mut()
            .find(|a| a.tid == tid)
            .ok_or_else(|| StorageError::NotFound(format!("application {}", tid)))?;
        row.verified = verified;
        let row = row.clone();

        tables.joined(&row)
    }
}

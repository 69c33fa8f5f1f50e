//! Stored account shapes

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub uid: i64,
    pub github_id: i64,
    pub username: String,
    pub admin: bool,
    pub bearer: String,
    pub created: DateTime<Utc>,
}

/// An application token together with the user that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationRecord {
    #[serde(flatten)]
    pub owner: UserRecord,
    pub tid: i64,
    pub name: String,
    pub description: String,
    pub token: String,
    pub verified: bool,
    pub invalid: bool,
}

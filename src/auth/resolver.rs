//! Credential resolution
//!
//! A raw `authorization` value is resolved against the store in a fixed order:
//!
//! 1. bearer token of a user: `{bearer}`
//! 2. application token: `{application}` plus `verified` when set, unless
//!    the token has been invalidated
//! 3. `admin` is added on top when the owning user is an administrator
//!
//! Every failure mode collapses into [`ResolveError::Unauthenticated`] so
//! callers cannot tell a missing header from an unknown or revoked token.

use crate::auth::capabilities::{Capability, CapabilitySet};
use crate::storage::{ApplicationRecord, CredentialStore, StorageError, UserRecord};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("credential lookup failed: {0}")]
    Store(#[from] StorageError),
}

/// Which credential namespace a principal was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Application,
}

/// The stored account behind a principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    User(UserRecord),
    Application(ApplicationRecord),
}

/// An authenticated identity, snapshotted at resolution time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The user id; for applications, the owning user's id
    pub id: i64,
    pub admin: bool,
    pub account: Account,
}

impl Principal {
    fn user(record: UserRecord) -> Self {
        Self {
            id: record.uid,
            admin: record.admin,
            account: Account::User(record),
        }
    }

    fn application(record: ApplicationRecord) -> Self {
        Self {
            id: record.owner.uid,
            admin: record.owner.admin,
            account: Account::Application(record),
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self.account {
            Account::User(_) => PrincipalKind::User,
            Account::Application(_) => PrincipalKind::Application,
        }
    }

    pub fn as_user(&self) -> Option<&UserRecord> {
        match &self.account {
            Account::User(user) => Some(user),
            Account::Application(_) => None,
        }
    }

    pub fn as_application(&self) -> Option<&ApplicationRecord> {
        match &self.account {
            Account::Application(app) => Some(app),
            Account::User(_) => None,
        }
    }
}

/// A principal together with the capabilities derived for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub principal: Principal,
    pub capabilities: CapabilitySet,
}

/// Turns raw credentials into principals
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, credential: Option<&str>) -> Result<Authenticated, ResolveError> {
        let token = match credential.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return Err(ResolveError::Unauthenticated),
        };

        let mut capabilities = CapabilitySet::new();

        let principal = if let Some(user) = self.store.fetch_user(token).await? {
            capabilities.insert(Capability::Bearer);
            Principal::user(user)
        } else {
            let app = match self.store.fetch_application(token).await? {
                Some(app) if !app.invalid => app,
                Some(app) => {
                    debug!(tid = app.tid, "Rejected invalidated application token");
                    return Err(ResolveError::Unauthenticated);
                }
                None => return Err(ResolveError::Unauthenticated),
            };

            capabilities.insert(Capability::Application);
            if app.verified {
                capabilities.insert(Capability::Verified);
            }
            Principal::application(app)
        };

        if principal.admin {
            capabilities.insert(Capability::Admin);
        }

        debug!(
            principal_id = principal.id,
            kind = ?principal.kind(),
            capabilities = %capabilities,
            "Resolved credential"
        );

        Ok(Authenticated {
            principal,
            capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AccountStore, MemoryStore};

    async fn setup() -> (Arc<MemoryStore>, CredentialResolver) {
        let store = Arc::new(MemoryStore::new());
        let resolver = CredentialResolver::new(store.clone());
        (store, resolver)
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let (store, resolver) = setup().await;
        let user = store.create_user(1001, "danny", false).await.unwrap();

        let auth = resolver.resolve(Some(&user.bearer)).await.unwrap();
        assert_eq!(auth.principal.id, user.uid);
        assert_eq!(auth.principal.kind(), PrincipalKind::User);
        assert!(auth.capabilities.contains(Capability::Bearer));
        assert!(!auth.capabilities.contains(Capability::Application));
        assert!(!auth.capabilities.contains(Capability::Admin));
    }

    #[tokio::test]
    async fn test_admin_bearer_token() {
        let (store, resolver) = setup().await;
        let admin = store.create_user(1, "root", true).await.unwrap();

        let auth = resolver.resolve(Some(&admin.bearer)).await.unwrap();
        let caps: Vec<Capability> = auth.capabilities.iter().collect();
        assert_eq!(caps, vec![Capability::Bearer, Capability::Admin]);
    }

    #[tokio::test]
    async fn test_application_token() {
        let (store, resolver) = setup().await;
        let user = store.create_user(1001, "danny", false).await.unwrap();
        let app = store
            .create_application(user.uid, "modbot", "")
            .await
            .unwrap();

        let auth = resolver.resolve(Some(&app.token)).await.unwrap();
        assert_eq!(auth.principal.id, user.uid);
        assert_eq!(auth.principal.kind(), PrincipalKind::Application);
        assert!(auth.capabilities.contains(Capability::Application));
        assert!(!auth.capabilities.contains(Capability::Verified));
        assert!(!auth.capabilities.contains(Capability::Bearer));

        store.set_application_verified(app.tid, true).await.unwrap();
        let auth = resolver.resolve(Some(&app.token)).await.unwrap();
        assert!(auth.capabilities.contains(Capability::Verified));
    }

    #[tokio::test]
    async fn test_application_inherits_owner_admin() {
        let (store, resolver) = setup().await;
        let user = store.create_user(1, "root", true).await.unwrap();
        let app = store.create_application(user.uid, "ops", "").await.unwrap();

        let auth = resolver.resolve(Some(&app.token)).await.unwrap();
        assert!(auth.capabilities.contains(Capability::Admin));
    }

    #[tokio::test]
    async fn test_invalidated_application_is_unauthenticated() {
        let (store, resolver) = setup().await;
        let user = store.create_user(1001, "danny", false).await.unwrap();
        let app = store.create_application(user.uid, "modbot", "").await.unwrap();
        store.set_application_verified(app.tid, true).await.unwrap();
        store.invalidate_application(&app.token).await.unwrap();

        assert!(matches!(
            resolver.resolve(Some(&app.token)).await,
            Err(ResolveError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_failures_are_uniform() {
        let (store, resolver) = setup().await;
        store.create_user(1001, "danny", false).await.unwrap();

        for credential in [None, Some(""), Some("   "), Some("NDI=.unknown"), Some("garbage")] {
            assert!(
                matches!(resolver.resolve(credential).await, Err(ResolveError::Unauthenticated)),
                "expected {:?} to be unauthenticated",
                credential
            );
        }
    }
}

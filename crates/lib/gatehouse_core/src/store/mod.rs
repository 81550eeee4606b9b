//! Storage interfaces for the auth core.
//!
//! Services never talk to a database directly; they receive these traits at
//! construction. Two implementations ship: [`memory::MemoryStore`] and
//! [`postgres::PgStore`].

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{LoginAttemptRecord, Principal, RevocationEntry};
use crate::models::policy::{PermissionRecord, PolicyEntry, RestfulRule};

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage call exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

/// Run a storage call under a deadline.
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::DeadlineExceeded(limit)),
    }
}

/// Principals and their password hashes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StorageError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StorageError>;

    /// Last-login bookkeeping after a successful login.
    async fn record_login(
        &self,
        id: i64,
        at: DateTime<Utc>,
        origin: &str,
    ) -> Result<(), StorageError>;
}

/// Failed-login records keyed by `(account, origin)`.
#[async_trait]
pub trait LoginAttemptRepository: Send + Sync {
    async fn find(
        &self,
        account: &str,
        origin: &str,
    ) -> Result<Option<LoginAttemptRecord>, StorageError>;

    /// Insert or overwrite the record for its `(account, origin)` key.
    async fn save(&self, record: &LoginAttemptRecord) -> Result<(), StorageError>;

    /// Returns whether a record existed.
    async fn delete(&self, account: &str, origin: &str) -> Result<bool, StorageError>;

    /// Delete records whose last attempt is older than `before`.
    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Revoked tokens, keyed by token hash.
#[async_trait]
pub trait RevocationRepository: Send + Sync {
    /// Idempotent: inserting an already-present hash succeeds.
    async fn insert(&self, entry: &RevocationEntry) -> Result<(), StorageError>;

    async fn contains(&self, token_hash: &str) -> Result<bool, StorageError>;

    /// Delete entries whose original expiry is at or before `cutoff`.
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// The authorization graph.
///
/// The `replace_*` and `delete_*` methods must be atomic: either every
/// change lands or none does.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn roles_for_principal(&self, principal_id: i64) -> Result<Vec<i64>, StorageError>;

    async fn restful_rules_for_roles(
        &self,
        role_ids: &[i64],
    ) -> Result<Vec<RestfulRule>, StorageError>;

    /// The enabled permission bound to exactly `(url, method)`.
    async fn find_enabled_permission(
        &self,
        url: &str,
        method: &str,
    ) -> Result<Option<PermissionRecord>, StorageError>;

    /// Whether any of `role_ids` holds the permission with `code`.
    async fn any_role_has_code(&self, role_ids: &[i64], code: &str)
    -> Result<bool, StorageError>;

    async fn policies_for_role(&self, role_id: i64) -> Result<Vec<PolicyEntry>, StorageError>;

    /// Insert or update a permission record by ID.
    async fn save_permission(&self, record: &PermissionRecord) -> Result<(), StorageError>;

    async fn replace_user_roles(
        &self,
        principal_id: i64,
        role_ids: &[i64],
    ) -> Result<(), StorageError>;

    async fn replace_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<(), StorageError>;

    async fn replace_role_restful_rules(
        &self,
        role_id: i64,
        rules: &[RestfulRule],
    ) -> Result<(), StorageError>;

    /// Remove every association of a role.
    async fn delete_role(&self, role_id: i64) -> Result<(), StorageError>;

    /// Remove a permission and every role link to it. Returns whether it existed.
    async fn delete_permission(&self, permission_id: i64) -> Result<bool, StorageError>;
}

/// The full set of repositories a [`crate::auth::session::Authenticator`] needs.
#[derive(Clone)]
pub struct Repositories {
    pub credentials: Arc<dyn CredentialStore>,
    pub attempts: Arc<dyn LoginAttemptRepository>,
    pub revocations: Arc<dyn RevocationRepository>,
    pub policies: Arc<dyn PolicyRepository>,
}

impl Repositories {
    /// Use one backend for every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CredentialStore
            + LoginAttemptRepository
            + RevocationRepository
            + PolicyRepository
            + 'static,
    {
        Self {
            credentials: store.clone(),
            attempts: store.clone(),
            revocations: store.clone(),
            policies: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_deadline_passes_through_results() {
        let value = with_deadline(Duration::from_secs(1), async { Ok::<_, StorageError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn with_deadline_reports_timeouts() {
        let result = with_deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StorageError>(())
        })
        .await;
        assert!(matches!(result, Err(StorageError::DeadlineExceeded(_))));
    }
}

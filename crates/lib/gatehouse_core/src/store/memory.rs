//! In-memory storage backend.
//!
//! Suitable for tests and single-process embedding. Login attempts and
//! revocations live in `DashMap`s; the policy graph sits behind one
//! `RwLock` so replace-all syncs are applied atomically.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{
    CredentialStore, LoginAttemptRepository, PolicyRepository, RevocationRepository, StorageError,
};
use crate::models::auth::{LoginAttemptRecord, Principal, RevocationEntry};
use crate::models::policy::{PermissionRecord, PolicyEntry, RestfulRule};

#[derive(Debug, Default)]
struct PolicyGraph {
    user_roles: HashMap<i64, BTreeSet<i64>>,
    permissions: HashMap<i64, PermissionRecord>,
    role_permissions: HashMap<i64, BTreeSet<i64>>,
    role_rules: HashMap<i64, Vec<RestfulRule>>,
}

/// Every repository trait, backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    principals: DashMap<i64, Principal>,
    attempts: DashMap<(String, String), LoginAttemptRecord>,
    revoked: DashMap<String, RevocationEntry>,
    graph: RwLock<PolicyGraph>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a principal.
    pub fn insert_principal(&self, principal: Principal) {
        self.principals.insert(principal.id, principal);
    }

    /// Number of revocation entries currently held.
    pub fn revocation_count(&self) -> usize {
        self.revoked.len()
    }

    fn attempt_key(account: &str, origin: &str) -> (String, String) {
        (account.to_string(), origin.to_string())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StorageError> {
        Ok(self
            .principals
            .iter()
            .find(|entry| entry.username == username)
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StorageError> {
        Ok(self.principals.get(&id).map(|entry| entry.value().clone()))
    }

    async fn record_login(
        &self,
        id: i64,
        at: DateTime<Utc>,
        origin: &str,
    ) -> Result<(), StorageError> {
        if let Some(mut principal) = self.principals.get_mut(&id) {
            principal.last_login_at = Some(at);
            principal.last_login_origin = Some(origin.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl LoginAttemptRepository for MemoryStore {
    async fn find(
        &self,
        account: &str,
        origin: &str,
    ) -> Result<Option<LoginAttemptRecord>, StorageError> {
        Ok(self
            .attempts
            .get(&Self::attempt_key(account, origin))
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, record: &LoginAttemptRecord) -> Result<(), StorageError> {
        self.attempts.insert(
            Self::attempt_key(&record.account, &record.origin),
            record.clone(),
        );
        Ok(())
    }

    async fn delete(&self, account: &str, origin: &str) -> Result<bool, StorageError> {
        Ok(self
            .attempts
            .remove(&Self::attempt_key(account, origin))
            .is_some())
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let initial = self.attempts.len();
        self.attempts.retain(|_, record| record.last_attempt_at >= before);
        Ok((initial - self.attempts.len()) as u64)
    }
}

#[async_trait]
impl RevocationRepository for MemoryStore {
    async fn insert(&self, entry: &RevocationEntry) -> Result<(), StorageError> {
        self.revoked
            .entry(entry.token_hash.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn contains(&self, token_hash: &str) -> Result<bool, StorageError> {
        Ok(self.revoked.contains_key(token_hash))
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let initial = self.revoked.len();
        self.revoked.retain(|_, entry| entry.expires_at > cutoff);
        Ok((initial - self.revoked.len()) as u64)
    }
}

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn roles_for_principal(&self, principal_id: i64) -> Result<Vec<i64>, StorageError> {
        let graph = self.graph.read().await;
        Ok(graph
            .user_roles
            .get(&principal_id)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn restful_rules_for_roles(
        &self,
        role_ids: &[i64],
    ) -> Result<Vec<RestfulRule>, StorageError> {
        let graph = self.graph.read().await;
        Ok(role_ids
            .iter()
            .filter_map(|role| graph.role_rules.get(role))
            .flatten()
            .cloned()
            .collect())
    }

    async fn find_enabled_permission(
        &self,
        url: &str,
        method: &str,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        let graph = self.graph.read().await;
        Ok(graph
            .permissions
            .values()
            .find(|p| p.enabled && p.url == url && p.method == method)
            .cloned())
    }

    async fn any_role_has_code(
        &self,
        role_ids: &[i64],
        code: &str,
    ) -> Result<bool, StorageError> {
        let graph = self.graph.read().await;
        Ok(role_ids.iter().any(|role| {
            graph.role_permissions.get(role).is_some_and(|ids| {
                ids.iter()
                    .filter_map(|id| graph.permissions.get(id))
                    .any(|p| p.code == code)
            })
        }))
    }

    async fn policies_for_role(&self, role_id: i64) -> Result<Vec<PolicyEntry>, StorageError> {
        let graph = self.graph.read().await;
        let codes = graph
            .role_permissions
            .get(&role_id)
            .into_iter()
            .flatten()
            .filter_map(|id| graph.permissions.get(id))
            .map(|p| PolicyEntry::PermissionCode {
                role_id,
                code: p.code.clone(),
            });
        let rules = graph
            .role_rules
            .get(&role_id)
            .into_iter()
            .flatten()
            .map(|r| PolicyEntry::Restful {
                role_id,
                path: r.path.clone(),
                method: r.method.clone(),
            });
        Ok(codes.chain(rules).collect())
    }

    async fn save_permission(&self, record: &PermissionRecord) -> Result<(), StorageError> {
        let mut graph = self.graph.write().await;
        if graph
            .permissions
            .values()
            .any(|p| p.id != record.id && p.code == record.code)
        {
            return Err(StorageError::Constraint(format!(
                "permission code '{}' already exists",
                record.code
            )));
        }
        graph.permissions.insert(record.id, record.clone());
        Ok(())
    }

    async fn replace_user_roles(
        &self,
        principal_id: i64,
        role_ids: &[i64],
    ) -> Result<(), StorageError> {
        let mut graph = self.graph.write().await;
        if role_ids.is_empty() {
            graph.user_roles.remove(&principal_id);
        } else {
            graph
                .user_roles
                .insert(principal_id, role_ids.iter().copied().collect());
        }
        Ok(())
    }

    async fn replace_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<(), StorageError> {
        let mut graph = self.graph.write().await;
        // Validate before touching anything so a bad ID leaves the role intact.
        if let Some(missing) = permission_ids
            .iter()
            .find(|id| !graph.permissions.contains_key(*id))
        {
            return Err(StorageError::Constraint(format!(
                "permission {missing} does not exist"
            )));
        }
        if permission_ids.is_empty() {
            graph.role_permissions.remove(&role_id);
        } else {
            graph
                .role_permissions
                .insert(role_id, permission_ids.iter().copied().collect());
        }
        Ok(())
    }

    async fn replace_role_restful_rules(
        &self,
        role_id: i64,
        rules: &[RestfulRule],
    ) -> Result<(), StorageError> {
        let mut graph = self.graph.write().await;
        if rules.is_empty() {
            graph.role_rules.remove(&role_id);
        } else {
            graph.role_rules.insert(role_id, rules.to_vec());
        }
        Ok(())
    }

    async fn delete_role(&self, role_id: i64) -> Result<(), StorageError> {
        let mut graph = self.graph.write().await;
        graph.role_permissions.remove(&role_id);
        graph.role_rules.remove(&role_id);
        for roles in graph.user_roles.values_mut() {
            roles.remove(&role_id);
        }
        graph.user_roles.retain(|_, roles| !roles.is_empty());
        Ok(())
    }

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, StorageError> {
        let mut graph = self.graph.write().await;
        let existed = graph.permissions.remove(&permission_id).is_some();
        for ids in graph.role_permissions.values_mut() {
            ids.remove(&permission_id);
        }
        graph.role_permissions.retain(|_, ids| !ids.is_empty());
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn permission(id: i64, code: &str, url: &str, method: &str) -> PermissionRecord {
        PermissionRecord {
            id,
            code: code.into(),
            url: url.into(),
            method: method.into(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn replace_role_permissions_rejects_unknown_ids_without_change() {
        let store = MemoryStore::new();
        store
            .save_permission(&permission(1, "report:create", "/reports", "POST"))
            .await
            .unwrap();
        store.replace_role_permissions(9, &[1]).await.unwrap();

        let err = store.replace_role_permissions(9, &[1, 404]).await;
        assert!(matches!(err, Err(StorageError::Constraint(_))));
        assert!(store.any_role_has_code(&[9], "report:create").await.unwrap());
    }

    #[tokio::test]
    async fn delete_permission_drops_role_links() {
        let store = MemoryStore::new();
        store
            .save_permission(&permission(1, "report:create", "/reports", "POST"))
            .await
            .unwrap();
        store.replace_role_permissions(9, &[1]).await.unwrap();

        assert!(store.delete_permission(1).await.unwrap());
        assert!(!store.any_role_has_code(&[9], "report:create").await.unwrap());
        assert!(store.policies_for_role(9).await.unwrap().is_empty());
        assert!(!store.delete_permission(1).await.unwrap());
    }

    #[tokio::test]
    async fn delete_role_removes_user_links_and_rules() {
        let store = MemoryStore::new();
        store.replace_user_roles(42, &[1, 2]).await.unwrap();
        store
            .replace_role_restful_rules(1, &[RestfulRule::new("/users/*", "GET")])
            .await
            .unwrap();

        store.delete_role(1).await.unwrap();

        assert_eq!(store.roles_for_principal(42).await.unwrap(), vec![2]);
        assert!(store.restful_rules_for_roles(&[1]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_permission_code_is_rejected() {
        let store = MemoryStore::new();
        store
            .save_permission(&permission(1, "report:create", "/reports", "POST"))
            .await
            .unwrap();
        let err = store
            .save_permission(&permission(2, "report:create", "/reports/new", "POST"))
            .await;
        assert!(matches!(err, Err(StorageError::Constraint(_))));
    }

    #[tokio::test]
    async fn revocation_insert_is_idempotent_and_sweepable() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let entry = RevocationEntry {
            token_hash: "abc".into(),
            principal_id: 1,
            username: "alice".into(),
            reason: "logout".into(),
            expires_at: now + Duration::minutes(5),
            revoked_at: now,
        };
        store.insert(&entry).await.unwrap();
        store.insert(&entry).await.unwrap();
        assert_eq!(store.revocation_count(), 1);

        assert_eq!(store.delete_expired(now).await.unwrap(), 0);
        assert_eq!(
            store.delete_expired(now + Duration::minutes(5)).await.unwrap(),
            1
        );
        assert!(!store.contains("abc").await.unwrap());
    }

    #[tokio::test]
    async fn stale_attempts_are_removed() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = LoginAttemptRecord::new("alice", "10.0.0.5", now - Duration::days(31));
        let fresh = LoginAttemptRecord::new("bob", "10.0.0.6", now);
        store.save(&old).await.unwrap();
        store.save(&fresh).await.unwrap();

        let removed = store.delete_stale(now - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.find("alice", "10.0.0.5").await.unwrap().is_none());
        assert!(store.find("bob", "10.0.0.6").await.unwrap().is_some());
    }
}

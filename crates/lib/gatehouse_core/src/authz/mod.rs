//! Authorization engine.
//!
//! A decision runs an ordered chain of strategies. The first strategy with
//! an opinion wins; when none has one the request is denied. The default
//! chain is RESTful path rules, then permission-code RBAC.
//!
//! The engine also owns the policy graph: replace-all syncs of user roles,
//! role permissions and role RESTful rules, plus cascading deletes.

pub mod matcher;
pub mod rbac;
pub mod restful;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::policy::{
    Decision, PermissionRecord, PolicyEntry, RestfulRule, user_subject,
};
use crate::store::{PolicyRepository, StorageError, with_deadline};
use rbac::RbacStrategy;
use restful::RestfulStrategy;

/// Authorization errors. None of them is ever an allow.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Authorization indeterminate: {0}")]
    Indeterminate(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<StorageError> for AuthzError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DeadlineExceeded(limit) => {
                AuthzError::Indeterminate(format!("policy lookup exceeded {limit:?}"))
            }
            other => AuthzError::Storage(other),
        }
    }
}

/// A strategy's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    NoOpinion,
}

/// The principal being authorized, with its roles resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub principal_id: i64,
    /// `user:<id>`.
    pub key: String,
    pub roles: Vec<i64>,
}

impl Subject {
    pub fn new(principal_id: i64, roles: Vec<i64>) -> Self {
        Self {
            principal_id,
            key: user_subject(principal_id),
            roles,
        }
    }
}

/// A `(resource, action)` pair. The action is upper-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub resource: String,
    pub action: String,
}

impl AccessRequest {
    /// Query string and fragment are dropped from `resource`, so every
    /// strategy sees the same path.
    pub fn new(resource: &str, action: &str) -> Self {
        let path = resource.split(['?', '#']).next().unwrap_or_default();
        Self {
            resource: path.to_string(),
            action: action.trim().to_ascii_uppercase(),
        }
    }
}

/// One link of the decision chain.
#[async_trait]
pub trait AuthorizationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        subject: &Subject,
        request: &AccessRequest,
    ) -> Result<Verdict, StorageError>;
}

#[derive(Clone)]
pub struct AuthorizationEngine {
    policies: Arc<dyn PolicyRepository>,
    strategies: Vec<Arc<dyn AuthorizationStrategy>>,
    timeout: Duration,
}

impl AuthorizationEngine {
    /// Engine with the default RESTful-then-RBAC chain.
    pub fn new(policies: Arc<dyn PolicyRepository>, timeout: Duration) -> Self {
        let strategies: Vec<Arc<dyn AuthorizationStrategy>> = vec![
            Arc::new(RestfulStrategy::new(policies.clone())),
            Arc::new(RbacStrategy::new(policies.clone())),
        ];
        Self::with_strategies(policies, strategies, timeout)
    }

    pub fn with_strategies(
        policies: Arc<dyn PolicyRepository>,
        strategies: Vec<Arc<dyn AuthorizationStrategy>>,
        timeout: Duration,
    ) -> Self {
        Self {
            policies,
            strategies,
            timeout,
        }
    }

    /// Decide whether `principal_id` may perform `action` on `resource`.
    ///
    /// The whole evaluation shares one storage deadline.
    pub async fn authorize(
        &self,
        principal_id: i64,
        resource: &str,
        action: &str,
    ) -> Result<Decision, AuthzError> {
        let request = AccessRequest::new(resource, action);
        let decision =
            with_deadline(self.timeout, self.evaluate(principal_id, &request)).await?;
        debug!(
            subject = %user_subject(principal_id),
            resource = %request.resource,
            action = %request.action,
            ?decision,
            "authorization decision"
        );
        Ok(decision)
    }

    async fn evaluate(
        &self,
        principal_id: i64,
        request: &AccessRequest,
    ) -> Result<Decision, StorageError> {
        let roles = self.policies.roles_for_principal(principal_id).await?;
        let subject = Subject::new(principal_id, roles);

        for strategy in &self.strategies {
            match strategy.evaluate(&subject, request).await? {
                Verdict::Allow => {
                    debug!(strategy = strategy.name(), subject = %subject.key, "allowed");
                    return Ok(Decision::Allow);
                }
                Verdict::Deny => {
                    debug!(strategy = strategy.name(), subject = %subject.key, "denied");
                    return Ok(Decision::Deny);
                }
                Verdict::NoOpinion => {}
            }
        }
        Ok(Decision::Deny)
    }

    /// [`Self::authorize`] collapsed to a boolean; errors deny.
    pub async fn is_allowed(&self, principal_id: i64, resource: &str, action: &str) -> bool {
        match self.authorize(principal_id, resource, action).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                warn!(principal_id, resource, action, error = %e, "authorization failed closed");
                false
            }
        }
    }

    /// Replace every role of a principal.
    pub async fn sync_user_roles(
        &self,
        principal_id: i64,
        role_ids: &[i64],
    ) -> Result<(), AuthzError> {
        let roles = dedup_ids(role_ids);
        with_deadline(
            self.timeout,
            self.policies.replace_user_roles(principal_id, &roles),
        )
        .await?;
        info!(principal_id, roles = ?roles, "user roles synced");
        Ok(())
    }

    /// Replace every permission code held by a role.
    pub async fn sync_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<(), AuthzError> {
        let ids = dedup_ids(permission_ids);
        with_deadline(
            self.timeout,
            self.policies.replace_role_permissions(role_id, &ids),
        )
        .await?;
        info!(role_id, permissions = ?ids, "role permissions synced");
        Ok(())
    }

    /// Replace every RESTful rule held by a role.
    pub async fn sync_role_restful_permissions(
        &self,
        role_id: i64,
        rules: &[RestfulRule],
    ) -> Result<(), AuthzError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(rules.len());
        for rule in rules {
            let rule = validate_rule(rule)?;
            if seen.insert(rule.clone()) {
                normalized.push(rule);
            }
        }
        with_deadline(
            self.timeout,
            self.policies.replace_role_restful_rules(role_id, &normalized),
        )
        .await?;
        info!(role_id, rules = normalized.len(), "role RESTful rules synced");
        Ok(())
    }

    /// Remove a role's user links, permission links and RESTful rules.
    pub async fn delete_role(&self, role_id: i64) -> Result<(), AuthzError> {
        with_deadline(self.timeout, self.policies.delete_role(role_id)).await?;
        info!(role_id, "role removed from policy graph");
        Ok(())
    }

    /// Remove a permission and every role link to it.
    pub async fn delete_permission(&self, permission_id: i64) -> Result<bool, AuthzError> {
        let existed =
            with_deadline(self.timeout, self.policies.delete_permission(permission_id)).await?;
        if existed {
            info!(permission_id, "permission removed from policy graph");
        }
        Ok(existed)
    }

    /// Insert or update a permission record.
    pub async fn save_permission(&self, record: &PermissionRecord) -> Result<(), AuthzError> {
        if record.code.trim().is_empty() {
            return Err(AuthzError::Validation("permission code is empty".into()));
        }
        if !record.url.starts_with('/') {
            return Err(AuthzError::Validation(format!(
                "permission url '{}' must start with '/'",
                record.url
            )));
        }
        let method = record.method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(AuthzError::Validation("permission method is empty".into()));
        }
        let record = PermissionRecord {
            method,
            ..record.clone()
        };
        with_deadline(self.timeout, self.policies.save_permission(&record)).await?;
        info!(id = record.id, code = %record.code, "permission saved");
        Ok(())
    }

    pub async fn roles_for_principal(&self, principal_id: i64) -> Result<Vec<i64>, AuthzError> {
        Ok(with_deadline(self.timeout, self.policies.roles_for_principal(principal_id)).await?)
    }

    pub async fn policies_for_role(&self, role_id: i64) -> Result<Vec<PolicyEntry>, AuthzError> {
        Ok(with_deadline(self.timeout, self.policies.policies_for_role(role_id)).await?)
    }
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn validate_rule(rule: &RestfulRule) -> Result<RestfulRule, AuthzError> {
    let path = rule.path.trim();
    if !path.starts_with('/') {
        return Err(AuthzError::Validation(format!(
            "rule path '{}' must start with '/'",
            rule.path
        )));
    }
    let method = rule.method.trim();
    if method.is_empty() {
        return Err(AuthzError::Validation(format!(
            "rule for '{path}' has an empty method pattern"
        )));
    }
    if method != "*" {
        matcher::compile_method_pattern(method).map_err(|e| {
            AuthzError::Validation(format!("invalid method pattern '{method}': {e}"))
        })?;
    }
    Ok(RestfulRule::new(path, method))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::memory::MemoryStore;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn engine() -> (AuthorizationEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (AuthorizationEngine::new(store.clone(), TIMEOUT), store)
    }

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
    async fn no_policy_means_deny() {
        let (engine, _) = engine();
        assert_eq!(
            engine.authorize(42, "/users/1", "GET").await.unwrap(),
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn restful_rule_allows_single_segment() {
        let (engine, _) = engine();
        engine.sync_user_roles(42, &[3]).await.unwrap();
        engine
            .sync_role_restful_permissions(3, &[RestfulRule::new("/users/*", "GET")])
            .await
            .unwrap();

        assert!(engine.is_allowed(42, "/users/123", "GET").await);
        assert!(!engine.is_allowed(42, "/users/123/orders", "GET").await);
        assert!(!engine.is_allowed(42, "/users/123", "DELETE").await);
    }

    #[tokio::test]
    async fn rbac_link_removal_flips_to_deny() {
        let (engine, _) = engine();
        engine
            .save_permission(&permission(10, "report:create", "/reports", "post"))
            .await
            .unwrap();
        engine.sync_user_roles(42, &[3]).await.unwrap();
        engine.sync_role_permissions(3, &[10]).await.unwrap();
        assert!(engine.is_allowed(42, "/reports", "POST").await);

        engine.sync_role_permissions(3, &[]).await.unwrap();
        assert!(!engine.is_allowed(42, "/reports", "POST").await);
    }

    #[tokio::test]
    async fn query_string_is_ignored_by_both_models() {
        let (engine, _) = engine();
        engine
            .save_permission(&permission(10, "report:create", "/reports", "POST"))
            .await
            .unwrap();
        engine.sync_user_roles(42, &[3]).await.unwrap();
        engine.sync_role_permissions(3, &[10]).await.unwrap();
        assert!(engine.is_allowed(42, "/reports?page=2", "POST").await);

        engine.sync_role_permissions(3, &[]).await.unwrap();
        engine
            .sync_role_restful_permissions(3, &[RestfulRule::new("/reports", "POST")])
            .await
            .unwrap();
        assert!(engine.is_allowed(42, "/reports?page=2", "POST").await);
    }

    #[test]
    fn access_request_drops_query_and_fragment() {
        let request = AccessRequest::new("/reports?page=2#top", " post ");
        assert_eq!(request.resource, "/reports");
        assert_eq!(request.action, "POST");
    }

    #[tokio::test]
    async fn clearing_user_roles_denies() {
        let (engine, _) = engine();
        engine.sync_user_roles(42, &[3]).await.unwrap();
        engine
            .sync_role_restful_permissions(3, &[RestfulRule::new("/users/*", "*")])
            .await
            .unwrap();
        assert!(engine.is_allowed(42, "/users/1", "GET").await);

        engine.sync_user_roles(42, &[]).await.unwrap();
        assert_eq!(engine.roles_for_principal(42).await.unwrap(), Vec::<i64>::new());
        assert!(!engine.is_allowed(42, "/users/1", "GET").await);
    }

    #[tokio::test]
    async fn delete_role_cascades() {
        let (engine, _) = engine();
        engine
            .save_permission(&permission(10, "report:create", "/reports", "POST"))
            .await
            .unwrap();
        engine.sync_user_roles(42, &[3, 4]).await.unwrap();
        engine.sync_role_permissions(3, &[10]).await.unwrap();
        engine
            .sync_role_restful_permissions(3, &[RestfulRule::new("/users/*", "GET")])
            .await
            .unwrap();

        engine.delete_role(3).await.unwrap();
        assert!(engine.policies_for_role(3).await.unwrap().is_empty());
        assert_eq!(engine.roles_for_principal(42).await.unwrap(), vec![4]);
        assert!(!engine.is_allowed(42, "/reports", "POST").await);
    }

    #[tokio::test]
    async fn delete_permission_unlinks_roles() {
        let (engine, _) = engine();
        engine
            .save_permission(&permission(10, "report:create", "/reports", "POST"))
            .await
            .unwrap();
        engine.sync_role_permissions(3, &[10]).await.unwrap();

        assert!(engine.delete_permission(10).await.unwrap());
        assert!(engine.policies_for_role(3).await.unwrap().is_empty());
        assert!(!engine.delete_permission(10).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_rules_are_rejected_without_changes() {
        let (engine, _) = engine();
        engine
            .sync_role_restful_permissions(3, &[RestfulRule::new("/users/*", "GET")])
            .await
            .unwrap();

        for bad in [
            RestfulRule::new("users/*", "GET"),
            RestfulRule::new("/users/*", ""),
            RestfulRule::new("/users/*", "GET|("),
        ] {
            assert!(matches!(
                engine.sync_role_restful_permissions(3, &[bad]).await,
                Err(AuthzError::Validation(_))
            ));
        }
        assert_eq!(engine.policies_for_role(3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_rules_are_collapsed() {
        let (engine, _) = engine();
        engine
            .sync_role_restful_permissions(
                3,
                &[
                    RestfulRule::new("/users/*", "GET"),
                    RestfulRule::new(" /users/* ", "GET"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(engine.policies_for_role(3).await.unwrap().len(), 1);
    }

    struct Fixed(Verdict, Arc<AtomicUsize>);

    #[async_trait]
    impl AuthorizationStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn evaluate(
            &self,
            _subject: &Subject,
            _request: &AccessRequest,
        ) -> Result<Verdict, StorageError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn first_opinion_wins() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = AuthorizationEngine::with_strategies(
            store,
            vec![
                Arc::new(Fixed(Verdict::NoOpinion, calls.clone())),
                Arc::new(Fixed(Verdict::Deny, calls.clone())),
                Arc::new(Fixed(Verdict::Allow, calls.clone())),
            ],
            TIMEOUT,
        );
        assert_eq!(engine.authorize(1, "/x", "GET").await.unwrap(), Decision::Deny);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct Stalled;

    #[async_trait]
    impl AuthorizationStrategy for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn evaluate(
            &self,
            _subject: &Subject,
            _request: &AccessRequest,
        ) -> Result<Verdict, StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Verdict::Allow)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_evaluation_is_indeterminate_and_denied() {
        let engine = AuthorizationEngine::with_strategies(
            Arc::new(MemoryStore::new()),
            vec![Arc::new(Stalled)],
            TIMEOUT,
        );
        assert!(matches!(
            engine.authorize(1, "/x", "GET").await,
            Err(AuthzError::Indeterminate(_))
        ));
        assert!(!engine.is_allowed(1, "/x", "GET").await);
    }
}
